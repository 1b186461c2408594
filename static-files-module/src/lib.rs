// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Static Files Module for Lantern Web Server
//!
//! This crate serves static files from a root directory.
//!
//! ## Supported functionality
//!
//! * `GET` and `HEAD` requests
//! * Confinement to the root directory, symbolic links leading outside of it are rejected
//! * Configurable directory index files (`index.html` by default)
//! * Directory listings in JSON or HTML format, if enabled for the location (see
//!   `locations-module`)
//! * Conditional requests via `If-Modified-Since`, `If-Unmodified-Since`, `If-Match`,
//!   `If-None-Match` HTTP headers
//! * Byte range requests via `Range` and `If-Range` HTTP headers
//! * Serving pre-compressed versions of the files (gzip and zlib deflate)
//!
//! Requests with multiple byte ranges are not supported and will result in the full file being
//! returned.
//!
//! ## Code example
//!
//! The handler is usually chained with other handlers, the `startup-module` crate runs the
//! server:
//!
//! ```rust
//! use lantern_module_utils::{merge_conf, FromYaml};
//! use startup_module::{DefaultApp, StartupConf};
//! use static_files_module::{StaticFilesConf, StaticFilesHandler};
//!
//! merge_conf! {
//!     struct Conf {
//!         startup: StartupConf,
//!         static_files: StaticFilesConf,
//!     }
//! }
//!
//! let conf = Conf::from_yaml("root: .").unwrap();
//! let app = DefaultApp::<StaticFilesHandler>::from_conf(conf.static_files).unwrap();
//! let server = conf.startup.into_server(app, None);
//!
//! // Do something with the server here, e.g. call server.run_forever()
//! ```
//!
//! ## Compression support
//!
//! The `precompressed` setting makes the handler look for compressed versions of the requested
//! files:
//!
//! ```yaml
//! root: /var/www/html
//! precompressed:
//! - gz
//! - zz
//! ```
//!
//! A client requesting `file.txt` and sending HTTP header `Accept-Encoding: deflate, gzip` will
//! receive `file.txt.zz` file or, if not found, `file.txt.gz` file. If only a compressed file
//! exists, it is served regardless of the client's capabilities. `CompressionHandler` from
//! `compression-module` will decompress it for clients that cannot handle it.

pub mod configuration;
mod file_writer;
mod handler;
pub mod listing;
pub mod metadata;
pub mod mime_types;
pub mod path;
pub mod range;
#[cfg(test)]
mod tests;

pub use configuration::{StaticFilesConf, StaticFilesOpt};
pub use handler::StaticFilesHandler;
