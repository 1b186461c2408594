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

//! Command line options and configuration file settings of the compression module

use clap::Parser;
use lantern_module_utils::{CompressionAlgorithm, OneOrMany};
use serde::Deserialize;

/// Compression level used if none is configured
pub const DEFAULT_LEVEL: u32 = 6;

/// Responses shorter than this are never compressed unless configured otherwise
pub const DEFAULT_MIN_LENGTH: u64 = 1000;

/// MIME types compressed unless configured otherwise
pub const DEFAULT_TYPES: &[&str] = &[
    "text/*",
    "application/javascript",
    "application/json",
    "application/xml",
    "image/svg+xml",
    "*+json",
    "*+xml",
];

/// Command line options of the compression module
#[derive(Debug, Default, Parser)]
pub struct CompressionOpt {
    /// Compression level to be used for dynamic compression, from 1 (fastest) to 9 (best)
    #[clap(long)]
    pub compression_level: Option<u32>,
}

/// Configuration settings of the compression module
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompressionConf {
    /// Compression level to be used for dynamic compression.
    pub compression_level: u32,

    /// Responses with a `Content-Length` below this value are never compressed.
    pub compression_min_length: u64,

    /// MIME types to be compressed. Entries can be exact types (`application/json`), entire
    /// groups (`text/*`), or suffixes (`*+xml`).
    pub compression_types: OneOrMany<String>,

    /// Algorithms to use for dynamic compression, in order of preference. An empty list disables
    /// dynamic compression.
    pub compression_algorithms: OneOrMany<CompressionAlgorithm>,

    /// If `true`, `Vary: Accept-Encoding` is added to all responses eligible for compression.
    pub compression_vary: bool,

    /// If `true`, compressed responses are decompressed for clients not supporting the
    /// compression algorithm.
    pub decompress: bool,
}

impl CompressionConf {
    /// Merges the command line options into the current configuration. Any command line options
    /// present overwrite existing settings.
    pub fn merge_with_opt(&mut self, opt: CompressionOpt) {
        if let Some(compression_level) = opt.compression_level {
            self.compression_level = compression_level;
        }
    }
}

impl Default for CompressionConf {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_LEVEL,
            compression_min_length: DEFAULT_MIN_LENGTH,
            compression_types: DEFAULT_TYPES
                .iter()
                .map(|mime| (*mime).to_owned())
                .collect::<Vec<_>>()
                .into(),
            compression_algorithms: vec![CompressionAlgorithm::Gzip].into(),
            compression_vary: true,
            decompress: true,
        }
    }
}
