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

//! Structures required to deserialize Static Files Module configuration from YAML configuration
//! files.

use clap::Parser;
use lantern_module_utils::{CompressionAlgorithm, OneOrMany};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Type of files not matched by the MIME types table
pub const DEFAULT_TYPE: &str = "application/octet-stream";

/// Command line options of the static files module
#[derive(Debug, Default, Parser)]
pub struct StaticFilesOpt {
    /// The root directory.
    #[clap(short, long)]
    pub root: Option<PathBuf>,

    /// Redirect /file%2e.txt to /file.txt and /dir to /dir/.
    #[clap(long)]
    pub canonicalize_uri: Option<bool>,

    /// Index file to look for when displaying a directory. This command line flag can be specified
    /// multiple times.
    #[clap(long)]
    pub index_file: Option<Vec<String>>,
}

/// Configuration file settings of the static files module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StaticFilesConf {
    /// The root directory.
    pub root: Option<PathBuf>,

    /// Redirect /file%2e.txt to /file.txt and /dir to /dir/.
    pub canonicalize_uri: bool,

    /// List of index files to look for in a directory.
    pub index_file: OneOrMany<String>,

    /// List of file extensions to check when looking for pre-compressed versions of a file.
    /// Supported file extensions are gz (gzip) and zz (zlib deflate).
    pub precompressed: OneOrMany<CompressionAlgorithm>,

    /// MIME types by file extension, overriding the built-in table, e.g. `{geojson:
    /// application/geo+json}`
    pub mime_types: HashMap<String, String>,

    /// MIME type of files with an unknown extension
    pub default_type: String,
}

impl StaticFilesConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: StaticFilesOpt) {
        if opt.root.is_some() {
            self.root = opt.root;
        }

        if let Some(canonicalize_uri) = opt.canonicalize_uri {
            self.canonicalize_uri = canonicalize_uri;
        }

        if let Some(index_file) = opt.index_file {
            self.index_file = index_file.into();
        }
    }
}

impl Default for StaticFilesConf {
    fn default() -> Self {
        Self {
            root: None,
            canonicalize_uri: true,
            index_file: vec!["index.html".to_owned()].into(),
            precompressed: Default::default(),
            mime_types: HashMap::new(),
            default_type: DEFAULT_TYPE.to_owned(),
        }
    }
}
