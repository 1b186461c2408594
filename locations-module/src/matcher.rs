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

//! Matching request paths against the configured location rules

use lantern_module_utils::extensions::{ListingFormat, ListingPolicy};
use lantern_module_utils::{Error, ErrorType};
use regex::Regex;

use crate::configuration::LocationConf;
use crate::expiry::Expiry;

/// Pattern of a location rule
#[derive(Debug, Clone)]
pub enum LocationPattern {
    /// Path ends with this string, stored in lower case
    Suffix(String),
    /// Regular expression anchored at the start of the path
    Prefix(Regex),
}

impl LocationPattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Suffix(suffix) => {
                path.len() >= suffix.len()
                    && path.is_char_boundary(path.len() - suffix.len())
                    && path[path.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
            }
            Self::Prefix(regex) => regex.is_match(path),
        }
    }
}

/// A location rule with its settings
#[derive(Debug, Clone)]
pub struct LocationRule {
    /// Paths this rule applies to
    pub pattern: LocationPattern,
    /// Expiration time of responses
    pub expires: Option<Expiry>,
    /// Whether directory listings are enabled
    pub autoindex: bool,
    /// Format of directory listings
    pub autoindex_format: ListingFormat,
    /// Whether directory listings include dot-files
    pub autoindex_hidden: bool,
}

impl LocationRule {
    /// The rule applying if no other rule matches: no expiration headers and no directory
    /// listings.
    pub fn catch_all() -> Result<Self, Box<Error>> {
        LocationConf {
            prefix: Some("/".to_owned()),
            ..Default::default()
        }
        .try_into()
    }

    /// Directory listing settings of this rule
    pub fn listing_policy(&self) -> ListingPolicy {
        ListingPolicy {
            enabled: self.autoindex,
            format: self.autoindex_format,
            hidden: self.autoindex_hidden,
        }
    }
}

impl TryFrom<LocationConf> for LocationRule {
    type Error = Box<Error>;

    fn try_from(conf: LocationConf) -> Result<Self, Self::Error> {
        let pattern = match (conf.suffix, conf.prefix) {
            (Some(suffix), None) => LocationPattern::Suffix(suffix.to_ascii_lowercase()),
            (None, Some(prefix)) => {
                let regex = Regex::new(&format!("^(?:{prefix})")).map_err(|err| {
                    Error::because(
                        ErrorType::InvalidConfiguration,
                        format!("invalid location prefix {prefix:?}"),
                        err,
                    )
                })?;
                LocationPattern::Prefix(regex)
            }
            _ => {
                return Err(Error::explain(
                    ErrorType::InvalidConfiguration,
                    "a location needs either suffix or prefix",
                ))
            }
        };

        Ok(Self {
            pattern,
            expires: conf.expires,
            autoindex: conf.autoindex,
            autoindex_format: conf.autoindex_format,
            autoindex_hidden: conf.autoindex_hidden,
        })
    }
}

/// Selects the location rule applying to a path
#[derive(Debug, Clone)]
pub struct LocationMatcher {
    suffix_rules: Vec<LocationRule>,
    prefix_rules: Vec<LocationRule>,
    fallback: LocationRule,
}

impl LocationMatcher {
    /// Creates a new matcher from a list of rules.
    pub fn new(rules: impl IntoIterator<Item = LocationRule>) -> Result<Self, Box<Error>> {
        let (suffix_rules, prefix_rules): (Vec<_>, Vec<_>) = rules
            .into_iter()
            .partition(|rule| matches!(rule.pattern, LocationPattern::Suffix(_)));

        Ok(Self {
            suffix_rules,
            prefix_rules,
            fallback: LocationRule::catch_all()?,
        })
    }

    /// Returns the rule applying to a decoded URL path. Suffix rules are checked first, in
    /// configuration order. If none matches, the first matching prefix rule is returned. If no
    /// configured rule matches, a catch-all rule without expiration and listings applies.
    pub fn match_path(&self, path: &str) -> &LocationRule {
        self.suffix_rules
            .iter()
            .chain(self.prefix_rules.iter())
            .find(|rule| rule.pattern.matches(path))
            .unwrap_or(&self.fallback)
    }
}
