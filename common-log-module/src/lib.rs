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

//! # Common Log Module for Lantern Web Server
//!
//! This crate writes an access log with one line per request, in the
//! [Common Log Format](https://en.wikipedia.org/wiki/Common_Log_Format) or any other format built
//! from a template. A configuration could look like this:
//!
//! ```yaml
//! log_file: access.log
//! log_format: '$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent'
//! ```
//!
//! The `log_file` field is also available as `--log-file` command line option. Special values
//! are `-` (write to standard output, the default) and an empty string (disable logging).
//!
//! The supported variables for the `log_format` setting are:
//!
//! * `$remote_addr`: client's IP address
//! * `$remote_port`: client's TCP port
//! * `$remote_user`: user name supplied with HTTP basic authentication
//! * `$time_local`: date and time of the request, e.g. `10/Oct/2000:13:55:36 -0700`
//! * `$time_iso8601`: date and time in the ISO 8601 format, e.g. `2000-10-10T13:55:36-07:00`
//! * `$request`: request line, e.g. `GET / HTTP/1.1`
//! * `$status`: status code of the response, e.g. `200`
//! * `$bytes_sent`: number of bytes sent to the client
//! * `$body_bytes_sent`: number of response body bytes sent to the client
//! * `$request_time`: time from receiving the request to the end of the response in seconds,
//!   e.g. `0.012`
//! * `$gzip_ratio`: ratio of original to compressed response size if the response has been
//!   compressed, e.g. `3.25`
//! * `$http_<header>`: value of an HTTP request header. For example, `$http_user_agent` adds
//!   the value of the `User-Agent` HTTP header to the log.
//! * `$sent_http_<header>`: value of an HTTP response header. For example,
//!   `$sent_http_content_type` adds the value of the `Content-Type` HTTP header to the log.
//!
//! Variables can also be written as `${status}`. Values that aren't available are logged as `-`,
//! quotes and non-printable characters are escaped as `\xNN`.
//!
//! The default log format is:
//!
//! ```text
//! $remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent" "$http_x_forwarded_for" "$gzip_ratio" "$request_time"
//! ```
//!
//! Log files are written by a dedicated thread, data in already existing files is kept. On
//! Unix-based systems, the process can be sent a `HUP` or `USR1` signal to make it re-open log
//! files. This is useful after the logs have been rotated for example.
//!
//! ## Code example
//!
//! `CommonLogHandler` does nothing in the `request_filter` phase, the log line is produced in the
//! `logging` phase. It should be the first handler in the chain.
//!
//! ```rust
//! use clap::Parser;
//! use common_log_module::{CommonLogHandler, CommonLogOpt};
//! use lantern_module_utils::{chain_handlers, merge_conf, FromYaml, RequestFilter};
//! use startup_module::{DefaultApp, StartupConf, StartupOpt};
//! use static_files_module::StaticFilesHandler;
//!
//! chain_handlers! {
//!     struct Handler {
//!         log: CommonLogHandler,
//!         static_files: StaticFilesHandler,
//!     }
//! }
//!
//! merge_conf! {
//!     struct Conf {
//!         startup: StartupConf,
//!         handler: <Handler as RequestFilter>::Conf,
//!     }
//! }
//!
//! #[derive(Debug, Parser)]
//! struct Opt {
//!     #[clap(flatten)]
//!     startup: StartupOpt,
//!     #[clap(flatten)]
//!     log: CommonLogOpt,
//! }
//!
//! let opt = Opt::parse_from(["server"]);
//! let mut conf = Conf::load_from_files(opt.startup.conf.as_deref().unwrap_or(&[])).unwrap();
//! conf.handler.log.merge_with_opt(opt.log);
//!
//! let app = DefaultApp::<Handler>::from_conf(conf.handler).unwrap();
//! let server = conf.startup.into_server(app, Some(opt.startup));
//!
//! // Do something with the server here, e.g. call server.run_forever()
//! ```

pub mod configuration;
mod handler;
pub mod record;
#[cfg(unix)]
mod signal;
pub mod template;
#[cfg(test)]
mod tests;
mod writer;

pub use configuration::{CommonLogConf, CommonLogOpt};
pub use handler::{CommonLogHandler, RequestCtx};
pub use record::AccessRecord;
pub use template::{LogTemplate, LogVariable, DEFAULT_LOG_FORMAT};
