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

//! Types exchanged between handlers via [`Session::extensions`](crate::Session::extensions)

use serde::Deserialize;

/// Output format of directory listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingFormat {
    /// `application/json` array of entries
    Json,
    /// HTML page with links
    #[default]
    Html,
}

/// Whether directory listings are produced for the current request and in which format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListingPolicy {
    /// Produce a listing for directories without an index file
    pub enabled: bool,
    /// Listing format
    pub format: ListingFormat,
    /// Include entries with names starting with a dot
    pub hidden: bool,
}

/// Ratio between original and compressed response size, available once the response is
/// complete
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionRatio(pub f32);
