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

//! Handles compression algorithms allowed in `Accept-Encoding` and `Content-Encoding` HTTP
//! headers.

use serde::Deserialize;
use std::fmt::Display;
use std::str::FromStr;

/// Represents a compression algorithm choice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum CompressionAlgorithm {
    /// gzip compression
    Gzip,
    /// deflate (zlib) compression
    Deflate,
}

impl CompressionAlgorithm {
    /// Returns the file extension corresponding to the algorithm.
    pub fn ext(&self) -> &'static str {
        match self {
            Self::Gzip => "gz",
            Self::Deflate => "zz",
        }
    }

    /// Determines the algorithm corresponding to the file extension if any.
    pub fn from_ext(ext: &str) -> Option<Self> {
        match ext {
            "gz" => Some(Self::Gzip),
            "zz" => Some(Self::Deflate),
            _ => None,
        }
    }

    /// Returns the algorithm name as used in `Accept-Encoding` HTTP header.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Deflate => "deflate",
        }
    }

    /// Determines the algorithm corresponding to a name from `Accept-Encoding` or
    /// `Content-Encoding` HTTP header.
    pub fn from_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("gzip") || name.eq_ignore_ascii_case("x-gzip") {
            Some(Self::Gzip)
        } else if name.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else {
            None
        }
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = UnsupportedCompressionAlgorithm;

    /// Converts an algorithm name or file extension into a compression algorithm.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
            .or_else(|| Self::from_ext(s))
            .ok_or_else(|| UnsupportedCompressionAlgorithm(s.to_owned()))
    }
}

impl TryFrom<String> for CompressionAlgorithm {
    type Error = UnsupportedCompressionAlgorithm;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.name())
    }
}

/// The error type returned by `CompressionAlgorithm::from_str()`
#[derive(Debug, PartialEq, Eq)]
pub struct UnsupportedCompressionAlgorithm(String);

impl Display for UnsupportedCompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "Unsupported compression algorithm: {}", self.0)
    }
}

impl std::error::Error for UnsupportedCompressionAlgorithm {}

/// Parses an encoding specifier from `Accept-Encoding` HTTP header into an
/// encoding/quality pair. Quality is scaled to the range 0 to 1000.
fn parse_encoding(encoding: &str) -> Option<(&str, u16)> {
    let mut params = encoding.split(';');
    let name = params.next()?.trim();
    if name.is_empty() {
        return None;
    }

    let mut quality = 1000;
    for param in params {
        if let Some((param, value)) = param.split_once('=') {
            if param.trim().eq_ignore_ascii_case("q") {
                if let Ok(value) = f64::from_str(value.trim()) {
                    quality = (value.clamp(0.0, 1.0) * 1000.0) as u16;
                }
            }
        }
    }
    Some((name, quality))
}

/// Compares the requested encodings from `Accept-Encoding` HTTP header with a list of supported
/// algorithms and returns any matches, sorted by the respective quality value. Encodings with
/// quality 0 are explicitly refused and never returned.
pub fn find_matches(
    requested: &str,
    supported: &[CompressionAlgorithm],
) -> Vec<CompressionAlgorithm> {
    let mut requested = requested
        .split(',')
        .filter_map(parse_encoding)
        .collect::<Vec<_>>();
    requested.sort_by_key(|(_, quality)| -i32::from(*quality));

    let mentioned = |algorithm: &CompressionAlgorithm| {
        requested
            .iter()
            .any(|(name, _)| CompressionAlgorithm::from_name(name) == Some(*algorithm))
    };

    let mut result = Vec::new();
    for (name, quality) in &requested {
        if *quality == 0 {
            continue;
        }

        if *name == "*" {
            for algorithm in supported {
                if !mentioned(algorithm) && !result.contains(algorithm) {
                    result.push(*algorithm);
                }
            }
        } else if let Some(algorithm) = CompressionAlgorithm::from_name(name) {
            if supported.contains(&algorithm) && !result.contains(&algorithm) {
                result.push(algorithm);
            }
        }
    }
    result
}

/// Checks whether the value of an `Accept-Encoding` HTTP header allows the given content coding.
pub fn accepts_encoding(requested: &str, encoding: &str) -> bool {
    let mut wildcard = None;
    for (name, quality) in requested.split(',').filter_map(parse_encoding) {
        let same = name.eq_ignore_ascii_case(encoding)
            || CompressionAlgorithm::from_name(name).is_some_and(|algorithm| {
                CompressionAlgorithm::from_name(encoding) == Some(algorithm)
            });
        if same {
            return quality > 0;
        }
        if name == "*" {
            wildcard = Some(quality > 0);
        }
    }
    wildcard.unwrap_or(false)
}
