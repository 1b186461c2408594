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

//! # Compression Module for Lantern Web Server
//!
//! This module compresses `200 OK` responses on the fly if the client supports it. Responses
//! that are already compressed (e.g. pre-compressed static files) are decompressed for clients
//! that cannot handle the compression algorithm.
//!
//! ```yaml
//! compression_level: 6
//! compression_min_length: 1000
//! compression_types: [text/*, application/json, "*+xml"]
//! compression_algorithms: [gzip, deflate]
//! compression_vary: true
//! decompress: true
//! ```
//!
//! A response is never compressed if it is shorter than `compression_min_length`, if its type
//! isn't listed in `compression_types` or if caching headers forbid shared caching
//! (`no-cache`, `no-store`, `private`, expired responses, authenticated requests). The
//! compression level can also be set with the `--compression-level` command line flag.

pub mod body_filter;
pub mod configuration;
mod mime_matcher;
pub mod negotiator;

use async_trait::async_trait;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use lantern_module_utils::{Error, RequestFilter, ResponseHeader, Session};
use log::{debug, trace};
use std::time::SystemTime;

pub use body_filter::CompressionFilter;
pub use configuration::{CompressionConf, CompressionOpt};
pub use negotiator::{CacheContext, CompressionAction, CompressionDecision, Negotiator};

/// Adds `Vary: Accept-Encoding` to the headers unless already present.
pub fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    let present = headers.get_all(header::VARY).iter().any(|value| {
        value.to_str().is_ok_and(|value| {
            value
                .split(',')
                .any(|name| name.trim().eq_ignore_ascii_case("accept-encoding") || name.trim() == "*")
        })
    });
    if !present {
        headers.append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
    }
}

fn weaken_etag(headers: &mut HeaderMap) {
    let Some(etag) = headers.get(header::ETAG) else {
        return;
    };
    if etag.as_bytes().starts_with(b"W/") {
        return;
    }

    let mut weak = b"W/".to_vec();
    weak.extend_from_slice(etag.as_bytes());
    match HeaderValue::from_bytes(&weak) {
        Ok(weak) => {
            headers.insert(header::ETAG, weak);
        }
        Err(_) => {
            headers.remove(header::ETAG);
        }
    }
}

/// Compression module handler
#[derive(Debug)]
pub struct CompressionHandler {
    negotiator: Negotiator,
    vary: bool,
}

impl TryFrom<CompressionConf> for CompressionHandler {
    type Error = Box<Error>;

    fn try_from(conf: CompressionConf) -> Result<Self, Self::Error> {
        debug!("Compression configuration received: {conf:#?}");

        Ok(Self {
            negotiator: Negotiator::new(&conf),
            vary: conf.compression_vary,
        })
    }
}

#[async_trait]
impl RequestFilter for CompressionHandler {
    type Conf = CompressionConf;
    type CTX = ();
    fn new_ctx() -> Self::CTX {}

    fn response_filter(&self, session: &mut Session<'_>, response: &mut ResponseHeader) {
        if response.status != StatusCode::OK {
            return;
        }

        let header_str = |name: HeaderName| {
            response
                .headers
                .get(name)
                .and_then(|value: &HeaderValue| value.to_str().ok())
        };
        let content_type = header_str(header::CONTENT_TYPE);
        let content_length = header_str(header::CONTENT_LENGTH).and_then(|value| value.parse().ok());
        let body_encoding = header_str(header::CONTENT_ENCODING);

        let cache_context = CacheContext::from_headers(
            &session.req_header().headers,
            &response.headers,
            SystemTime::now(),
        );
        let eligible = self
            .negotiator
            .eligible(content_type, content_length, &cache_context);
        let decision = self.negotiator.decide(
            &session.req_header().headers,
            content_type,
            content_length,
            &cache_context,
            body_encoding,
        );
        trace!("Compression decision: {decision:?}");

        if self.vary && (eligible || body_encoding.is_some()) {
            add_vary_accept_encoding(&mut response.headers);
        }

        let filter = match (decision.action, decision.algorithm) {
            (CompressionAction::Encode, Some(algorithm)) => {
                response.headers.insert(
                    header::CONTENT_ENCODING,
                    HeaderValue::from_static(algorithm.name()),
                );
                CompressionFilter::encoder(algorithm, decision.level)
            }
            (CompressionAction::Decode, Some(algorithm)) => {
                response.headers.remove(header::CONTENT_ENCODING);
                CompressionFilter::decoder(algorithm)
            }
            _ => return,
        };

        response.headers.remove(header::CONTENT_LENGTH);
        response.headers.remove(header::ACCEPT_RANGES);
        weaken_etag(&mut response.headers);
        session.set_body_filter(Box::new(filter));
    }
}
