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

//! Structures required to deserialize Locations Module configuration from YAML configuration
//! files.

use lantern_module_utils::extensions::ListingFormat;
use lantern_module_utils::OneOrMany;
use serde::Deserialize;

use crate::expiry::Expiry;

/// A single location rule as it appears in the configuration file. Exactly one of `suffix` and
/// `prefix` has to be set.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocationConf {
    /// Matches paths ending with this string, compared case-insensitively, e.g. `.png`
    pub suffix: Option<String>,

    /// Regular expression matched against the start of the path, e.g. `/` or `/data/[0-9]+/`
    pub prefix: Option<String>,

    /// Expiration time of responses, e.g. `1h`, `10s`, `off`, `epoch` or `max`
    pub expires: Option<Expiry>,

    /// If `true`, directories without an index file are listed.
    pub autoindex: bool,

    /// Format of directory listings, `html` or `json`
    pub autoindex_format: ListingFormat,

    /// If `true`, directory listings include entries with names starting with a dot. These are
    /// omitted by default.
    pub autoindex_hidden: bool,
}

/// Configuration file settings of the locations module
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocationsConf {
    /// Location rules. Suffix rules are checked first, then prefix rules, in the order listed.
    pub locations: OneOrMany<LocationConf>,
}
