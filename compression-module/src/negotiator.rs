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

//! Deciding whether a response should be compressed or decompressed

use http::{header, HeaderMap, HeaderValue};
use httpdate::parse_http_date;
use lantern_module_utils::compression_algorithm::{accepts_encoding, find_matches};
use lantern_module_utils::CompressionAlgorithm;
use log::trace;
use mime_guess::Mime;
use std::time::SystemTime;

use crate::configuration::CompressionConf;
use crate::mime_matcher::MimeMatcher;

/// What should happen to the response body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionAction {
    /// Response is sent as is
    #[default]
    None,
    /// Response is compressed
    Encode,
    /// Compressed response is decompressed
    Decode,
}

/// Outcome of compression negotiation for one response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionDecision {
    /// Action to take
    pub action: CompressionAction,
    /// Algorithm to encode or decode with, `None` if no action is taken
    pub algorithm: Option<CompressionAlgorithm>,
    /// Compression level, only relevant when encoding
    pub level: u32,
}

impl CompressionDecision {
    fn none() -> Self {
        Self::default()
    }
}

/// Caching properties of a response relevant to compression
#[derive(Debug, Clone, Copy)]
pub struct CacheContext<'a> {
    /// `Cache-Control` response header
    pub cache_control: Option<&'a HeaderValue>,
    /// `Expires` response header
    pub expires: Option<&'a HeaderValue>,
    /// Whether the request carried credentials
    pub authenticated: bool,
    /// Time the response is produced
    pub now: SystemTime,
}

impl<'a> CacheContext<'a> {
    /// Extracts the cache context from request and response headers.
    pub fn from_headers(request: &HeaderMap, response: &'a HeaderMap, now: SystemTime) -> Self {
        Self {
            cache_control: response.get(header::CACHE_CONTROL),
            expires: response.get(header::EXPIRES),
            authenticated: request.contains_key(header::AUTHORIZATION),
            now,
        }
    }

    /// Whether compression is ruled out by the caching properties. Any value that cannot be
    /// interpreted rules compression out as well.
    pub fn excluded(&self) -> bool {
        if self.authenticated {
            trace!("Request is authenticated");
            return true;
        }

        if let Some(cache_control) = self.cache_control {
            let Ok(cache_control) = cache_control.to_str() else {
                return true;
            };
            for directive in cache_control.split(',').map(str::trim) {
                if directive.is_empty() {
                    continue;
                }

                let (name, value) = match directive.split_once('=') {
                    Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                    None => (directive, None),
                };
                if name.is_empty()
                    || !name
                        .bytes()
                        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
                {
                    trace!("Unparsable Cache-Control directive {directive:?}");
                    return true;
                }

                let name = name.to_ascii_lowercase();
                match name.as_str() {
                    "no-cache" | "no-store" | "private" => {
                        trace!("Cache-Control directive {name} excludes compression");
                        return true;
                    }
                    "max-age" | "s-maxage" => match value.map(str::parse::<i64>) {
                        Some(Ok(age)) if age > 0 => {}
                        _ => {
                            trace!("Cache-Control directive {directive:?} means expired or is invalid");
                            return true;
                        }
                    },
                    _ => {}
                }
            }
        }

        if let Some(expires) = self.expires {
            match expires.to_str().ok().map(parse_http_date) {
                Some(Ok(time)) if time > self.now => {}
                _ => {
                    trace!("Expires header means expired or is invalid: {expires:?}");
                    return true;
                }
            }
        }

        false
    }
}

/// Applies the compression rules to responses
#[derive(Debug, Clone)]
pub struct Negotiator {
    level: u32,
    min_length: u64,
    types: MimeMatcher,
    algorithms: Vec<CompressionAlgorithm>,
    decompress: bool,
}

impl Negotiator {
    /// Creates a negotiator from the module configuration.
    pub fn new(conf: &CompressionConf) -> Self {
        Self {
            level: conf.compression_level,
            min_length: conf.compression_min_length,
            types: conf.compression_types.iter().collect(),
            algorithms: conf.compression_algorithms.to_vec(),
            decompress: conf.decompress,
        }
    }

    /// Checks the properties of the response that don't depend on the client: length, type and
    /// caching. The response can only vary with `Accept-Encoding` if this returns `true`.
    pub fn eligible(
        &self,
        content_type: Option<&str>,
        content_length: Option<u64>,
        cache_context: &CacheContext<'_>,
    ) -> bool {
        if content_length.is_some_and(|length| length < self.min_length) {
            trace!("Response too short for compression: {content_length:?}");
            return false;
        }

        let compressible = content_type
            .and_then(|content_type| content_type.parse::<Mime>().ok())
            .is_some_and(|mime| self.types.matches(&mime));
        if !compressible {
            trace!("Content type {content_type:?} is not compressible");
            return false;
        }

        !cache_context.excluded()
    }

    /// Decides what should happen to a response body. `body_encoding` is the response's
    /// `Content-Encoding` if any.
    pub fn decide(
        &self,
        request_headers: &HeaderMap,
        content_type: Option<&str>,
        content_length: Option<u64>,
        cache_context: &CacheContext<'_>,
        body_encoding: Option<&str>,
    ) -> CompressionDecision {
        if !self.eligible(content_type, content_length, cache_context) {
            return CompressionDecision::none();
        }

        let accepted = request_headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");

        let body_encoding = body_encoding
            .map(str::trim)
            .filter(|encoding| !encoding.is_empty() && !encoding.eq_ignore_ascii_case("identity"));
        match body_encoding {
            None => match find_matches(accepted, &self.algorithms).first() {
                Some(algorithm) => CompressionDecision {
                    action: CompressionAction::Encode,
                    algorithm: Some(*algorithm),
                    level: self.level,
                },
                None => CompressionDecision::none(),
            },
            Some(encoding) if accepts_encoding(accepted, encoding) => CompressionDecision::none(),
            Some(encoding) => match CompressionAlgorithm::from_name(encoding) {
                Some(algorithm) if self.decompress => CompressionDecision {
                    action: CompressionAction::Decode,
                    algorithm: Some(algorithm),
                    level: self.level,
                },
                _ => CompressionDecision::none(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use lantern_module_utils::FromYaml;
    use std::time::Duration;
    use test_log::test;

    fn negotiator(conf: &str) -> Negotiator {
        Negotiator::new(&CompressionConf::from_yaml(conf).unwrap())
    }

    fn accept(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, value.parse().unwrap());
        headers
    }

    fn no_cache_info() -> CacheContext<'static> {
        CacheContext {
            cache_control: None,
            expires: None,
            authenticated: false,
            now: SystemTime::now(),
        }
    }

    fn encode(algorithm: CompressionAlgorithm, level: u32) -> CompressionDecision {
        CompressionDecision {
            action: CompressionAction::Encode,
            algorithm: Some(algorithm),
            level,
        }
    }

    #[test]
    fn small_bodies() {
        let negotiator = negotiator("");
        let request = accept("gzip");
        let cache = no_cache_info();
        assert_eq!(
            negotiator.decide(&request, Some("text/html"), Some(999), &cache, None),
            CompressionDecision::none()
        );
        assert_eq!(
            negotiator.decide(&request, Some("text/html"), Some(1000), &cache, None),
            encode(CompressionAlgorithm::Gzip, 6)
        );
        assert_eq!(
            negotiator.decide(&request, Some("text/html"), None, &cache, None),
            encode(CompressionAlgorithm::Gzip, 6)
        );
    }

    #[test]
    fn content_types() {
        let negotiator = negotiator("");
        let request = accept("gzip");
        let cache = no_cache_info();
        for content_type in ["text/plain", "application/json", "image/svg+xml", "application/rss+xml"] {
            assert_eq!(
                negotiator
                    .decide(&request, Some(content_type), Some(50000), &cache, None)
                    .action,
                CompressionAction::Encode,
                "{content_type}"
            );
        }
        for content_type in [None, Some("image/png"), Some("application/octet-stream"), Some("???")] {
            assert_eq!(
                negotiator.decide(&request, content_type, Some(50000), &cache, None),
                CompressionDecision::none(),
                "{content_type:?}"
            );
        }

        let negotiator = self::negotiator("compression_types: image/png");
        assert_eq!(
            negotiator
                .decide(&request, Some("image/png"), Some(50000), &cache, None)
                .action,
            CompressionAction::Encode
        );
        assert_eq!(
            negotiator
                .decide(&request, Some("text/html"), Some(50000), &cache, None)
                .action,
            CompressionAction::None
        );
    }

    #[test]
    fn cache_context() {
        let negotiator = negotiator("");
        let request = accept("gzip");
        let now = SystemTime::now();
        let later = HeaderValue::from_str(&httpdate::fmt_http_date(now + Duration::from_secs(60)))
            .unwrap();
        let earlier =
            HeaderValue::from_str(&httpdate::fmt_http_date(now - Duration::from_secs(60)))
                .unwrap();

        let decide = |cache_control: Option<&str>, expires: Option<&HeaderValue>, auth: bool| {
            let cache_control = cache_control.map(|value| HeaderValue::from_str(value).unwrap());
            let cache = CacheContext {
                cache_control: cache_control.as_ref(),
                expires,
                authenticated: auth,
                now,
            };
            negotiator
                .decide(&request, Some("text/html"), Some(50000), &cache, None)
                .action
        };

        assert_eq!(decide(None, None, false), CompressionAction::Encode);
        assert_eq!(decide(Some("max-age=3600"), Some(&later), false), CompressionAction::Encode);
        assert_eq!(decide(Some("public, max-age=10"), None, false), CompressionAction::Encode);
        assert_eq!(decide(Some("no-cache"), None, false), CompressionAction::None);
        assert_eq!(decide(Some("No-Store"), None, false), CompressionAction::None);
        assert_eq!(decide(Some("private, max-age=10"), None, false), CompressionAction::None);
        assert_eq!(decide(Some("max-age=0"), None, false), CompressionAction::None);
        assert_eq!(decide(Some("max-age=soon"), None, false), CompressionAction::None);
        assert_eq!(decide(Some("max age"), None, false), CompressionAction::None);
        assert_eq!(decide(None, Some(&earlier), false), CompressionAction::None);
        assert_eq!(
            decide(None, Some(&HeaderValue::from_static("tomorrow")), false),
            CompressionAction::None
        );
        assert_eq!(decide(None, None, true), CompressionAction::None);
    }

    #[test]
    fn accept_encoding() {
        let negotiator = negotiator("compression_algorithms: [gzip, deflate]\ncompression_level: 9");
        let cache = no_cache_info();
        let decide = |request: &HeaderMap| {
            negotiator.decide(request, Some("text/html"), Some(50000), &cache, None)
        };

        assert_eq!(decide(&accept("gzip, deflate")), encode(CompressionAlgorithm::Gzip, 9));
        assert_eq!(
            decide(&accept("gzip;q=0.5, deflate")),
            encode(CompressionAlgorithm::Deflate, 9)
        );
        assert_eq!(decide(&accept("br")), CompressionDecision::none());
        assert_eq!(decide(&accept("identity")), CompressionDecision::none());
        assert_eq!(decide(&HeaderMap::new()), CompressionDecision::none());
    }

    #[test]
    fn encoded_bodies() {
        let cache = no_cache_info();
        let decide = |negotiator: &Negotiator, request: &HeaderMap, encoding: &str| {
            negotiator.decide(request, Some("text/html"), Some(50000), &cache, Some(encoding))
        };

        let negotiator = negotiator("");
        assert_eq!(
            decide(&negotiator, &accept("gzip"), "gzip"),
            CompressionDecision::none()
        );
        assert_eq!(
            decide(&negotiator, &accept("*"), "gzip"),
            CompressionDecision::none()
        );
        assert_eq!(
            decide(&negotiator, &accept("br"), "gzip"),
            CompressionDecision {
                action: CompressionAction::Decode,
                algorithm: Some(CompressionAlgorithm::Gzip),
                level: 6,
            }
        );
        assert_eq!(
            decide(&negotiator, &HeaderMap::new(), "deflate").action,
            CompressionAction::Decode
        );
        assert_eq!(
            decide(&negotiator, &accept("gzip"), "identity").action,
            CompressionAction::Encode
        );
        // Unknown encodings cannot be decoded
        assert_eq!(
            decide(&negotiator, &accept("gzip"), "br"),
            CompressionDecision::none()
        );

        let negotiator = self::negotiator("decompress: false");
        assert_eq!(
            decide(&negotiator, &accept("br"), "gzip"),
            CompressionDecision::none()
        );
    }
}
