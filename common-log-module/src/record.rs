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

//! Data collected about a request for the access log

use http::HeaderMap;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

/// All data known about a completed request, formatted into a log line by
/// [`LogTemplate`](crate::template::LogTemplate)
#[derive(Debug, Clone)]
pub struct AccessRecord {
    /// Client address if known
    pub remote_addr: Option<SocketAddr>,
    /// User name from the `Authorization` header if basic authentication has been used
    pub remote_user: Option<String>,
    /// Time when the request was received
    pub time: SystemTime,
    /// The request line, e.g. `GET / HTTP/1.1`. For malformed requests this is the raw line
    /// received.
    pub request: String,
    /// Response status code, `None` if no response has been sent
    pub status: Option<u16>,
    /// Number of bytes sent to the client including response headers
    pub bytes_sent: usize,
    /// Number of response body bytes sent to the client
    pub body_bytes_sent: usize,
    /// Ratio of uncompressed to compressed size if the response has been compressed
    pub compression_ratio: Option<f32>,
    /// Time from receiving the request to the end of the response
    pub request_time: Duration,
    /// Request headers referenced by the log format
    pub request_headers: HeaderMap,
    /// Response headers referenced by the log format
    pub response_headers: HeaderMap,
}

impl AccessRecord {
    /// Value of the `Referer` request header
    pub fn referer(&self) -> Option<&[u8]> {
        self.request_headers
            .get(http::header::REFERER)
            .map(|value| value.as_bytes())
    }

    /// Value of the `User-Agent` request header
    pub fn user_agent(&self) -> Option<&[u8]> {
        self.request_headers
            .get(http::header::USER_AGENT)
            .map(|value| value.as_bytes())
    }

    /// Value of the `X-Forwarded-For` request header
    pub fn forwarded_for(&self) -> Option<&[u8]> {
        self.request_headers
            .get("x-forwarded-for")
            .map(|value| value.as_bytes())
    }
}
