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

//! # Locations Module for Lantern Web Server
//!
//! This module matches the request path against a list of location rules. The matching rule
//! determines the expiration time of the response (`Expires` and `Cache-Control` headers) and
//! whether directories without an index file are listed.
//!
//! ```yaml
//! locations:
//! - suffix: .png
//!   expires: 1h
//! - prefix: /
//!   expires: 10s
//!   autoindex: true
//!   autoindex_format: json
//! ```
//!
//! Suffix rules are checked first, case-insensitively. If no suffix rule matches, the first
//! matching prefix rule applies. Prefix rules are regular expressions matched against the start of
//! the path.

pub mod configuration;
pub mod expiry;
pub mod matcher;

use async_trait::async_trait;
use lantern_module_utils::{
    Error, RequestFilter, RequestFilterResult, ResponseHeader, Session,
};
use log::{debug, trace};
use percent_encoding::percent_decode_str;
use std::time::SystemTime;

pub use configuration::{LocationConf, LocationsConf};
pub use expiry::Expiry;
pub use matcher::{LocationMatcher, LocationPattern, LocationRule};

/// Expiration time of the current request's location, stored in session extensions
#[derive(Debug, Clone, Copy)]
struct LocationExpiry(Expiry);

/// Handler matching request paths against location rules
#[derive(Debug)]
pub struct LocationsHandler {
    matcher: LocationMatcher,
}

impl LocationsHandler {
    /// Provides read-only access to the location matcher
    pub fn matcher(&self) -> &LocationMatcher {
        &self.matcher
    }
}

impl TryFrom<LocationsConf> for LocationsHandler {
    type Error = Box<Error>;

    fn try_from(conf: LocationsConf) -> Result<Self, Self::Error> {
        debug!("Locations configuration received: {conf:#?}");

        let rules = conf
            .locations
            .into_iter()
            .map(LocationRule::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let matcher = LocationMatcher::new(rules)?;

        Ok(Self { matcher })
    }
}

#[async_trait]
impl RequestFilter for LocationsHandler {
    type Conf = LocationsConf;

    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut Session<'_>,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let rule = {
            let path = session.req_header().uri.path();
            let path = percent_decode_str(path).decode_utf8_lossy();
            let rule = self.matcher.match_path(&path);
            trace!("Path {path} matched location rule {rule:?}");
            rule
        };

        session.extensions_mut().insert(rule.listing_policy());
        if let Some(expires) = rule.expires {
            session.extensions_mut().insert(LocationExpiry(expires));
        }

        Ok(RequestFilterResult::Unhandled)
    }

    fn response_filter(&self, session: &mut Session<'_>, response: &mut ResponseHeader) {
        let Some(LocationExpiry(expires)) = session.extensions().get::<LocationExpiry>().copied() else {
            return;
        };

        if !Expiry::applies_to(response.status) {
            trace!("Not adding expiration headers to {} response", response.status);
            return;
        }

        for (name, value) in expires.headers(SystemTime::now()) {
            response.headers.insert(name, value);
        }
    }
}
