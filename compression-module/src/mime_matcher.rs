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

//! Matching MIME types against a list

use mime_guess::Mime;
use std::collections::HashSet;

/// A single entry of the compressible types list
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MimeMatch {
    /// `application/json`
    Exact(String),
    /// `text/*`
    Type(String),
    /// `*+xml`
    Suffix(String),
}

impl From<&str> for MimeMatch {
    fn from(value: &str) -> Self {
        let value = value.trim().to_ascii_lowercase();
        if let Some(type_) = value.strip_suffix("/*") {
            Self::Type(type_.to_owned())
        } else if let Some(suffix) = value.strip_prefix('*') {
            Self::Suffix(suffix.to_owned())
        } else {
            Self::Exact(value)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct MimeMatcher {
    exact: HashSet<String>,
    type_: HashSet<String>,
    suffix: Vec<String>,
}

impl MimeMatcher {
    pub(crate) fn add(&mut self, mime: MimeMatch) {
        match mime {
            MimeMatch::Exact(mime) => {
                self.exact.insert(mime);
            }
            MimeMatch::Type(type_) => {
                self.type_.insert(type_);
            }
            MimeMatch::Suffix(suffix) => self.suffix.push(suffix),
        }
    }

    /// Checks a MIME type, parameters like `charset` are ignored.
    pub(crate) fn matches(&self, mime: &Mime) -> bool {
        let essence = mime.essence_str();
        self.exact.contains(essence)
            || self.type_.contains(mime.type_().as_str())
            || self.suffix.iter().any(|suffix| essence.ends_with(suffix))
    }
}

impl<'a> FromIterator<&'a String> for MimeMatcher {
    fn from_iter<I: IntoIterator<Item = &'a String>>(iter: I) -> Self {
        let mut matcher = Self::default();
        for mime in iter {
            matcher.add(mime.as_str().into());
        }
        matcher
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use test_log::test;

    #[test]
    fn matching() {
        let mut matcher = MimeMatcher::default();
        matcher.add("text/*".into());
        matcher.add("application/javascript".into());
        matcher.add("*+xml".into());

        assert!(matcher.matches(&"text/html".parse().unwrap()));
        assert!(matcher.matches(&"text/html; charset=utf-8".parse().unwrap()));
        assert!(matcher.matches(&"text/xml".parse().unwrap()));
        assert!(!matcher.matches(&"text2/xml".parse().unwrap()));
        assert!(matcher.matches(&"text2/anything+xml".parse().unwrap()));
        assert!(matcher.matches(&"application/javascript".parse().unwrap()));
        assert!(!matcher.matches(&"application/javascript+png".parse().unwrap()));
        assert!(!matcher.matches(&"image/png".parse().unwrap()));
    }
}
