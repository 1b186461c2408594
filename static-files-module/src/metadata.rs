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

//! File metadata and the response headers and conditional request checks derived from it

use http::{header, HeaderMap, StatusCode};
use httpdate::{fmt_http_date, parse_http_date};
use lantern_module_utils::{CompressionAlgorithm, Error, ResponseHeader};
use std::time::{Duration, SystemTime};

use crate::path::ResolvedTarget;

/// Metadata of the file to be served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    /// MIME type of the file
    pub mime: String,
    /// File size in bytes
    pub size: u64,
    /// Last modified time of the file in the format `Fri, 15 May 2015 15:34:21 GMT` if the time
    /// can be retrieved
    pub modified: Option<String>,
    /// ETag header for the file, encoding last modified time and file size
    pub etag: String,
    /// Compression algorithm if a pre-compressed file is served
    pub encoding: Option<CompressionAlgorithm>,
}

fn truncate_to_seconds(time: SystemTime) -> Option<SystemTime> {
    let secs = time.duration_since(SystemTime::UNIX_EPOCH).ok()?.as_secs();
    Some(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
}

impl Metadata {
    /// Collects the metadata for a resolved file. `mime` overrides the target's content type,
    /// this is used for pre-compressed files.
    pub fn new(target: &ResolvedTarget, mime: Option<&str>) -> Self {
        let mime = mime
            .or(target.content_type.as_deref())
            .unwrap_or(crate::configuration::DEFAULT_TYPE)
            .to_owned();
        let modified = target.modified_time.map(fmt_http_date);
        let etag = format!(
            "\"{:x}-{:x}\"",
            target
                .modified_time
                .and_then(|modified| modified.duration_since(SystemTime::UNIX_EPOCH).ok())
                .map_or(0, |duration| duration.as_secs()),
            target.size
        );

        Self {
            mime,
            size: target.size,
            modified,
            etag,
            encoding: None,
        }
    }

    fn modified_time(&self) -> Option<SystemTime> {
        self.modified
            .as_deref()
            .and_then(|modified| parse_http_date(modified).ok())
            .and_then(truncate_to_seconds)
    }

    fn etag_matches(&self, value: &str, weak: bool) -> bool {
        value.split(',').map(str::trim).any(|candidate| {
            let candidate = if weak {
                candidate.strip_prefix("W/").unwrap_or(candidate)
            } else {
                candidate
            };
            candidate == self.etag
        })
    }

    /// Checks `If-Match` and `If-Unmodified-Since` headers of the request to determine whether
    /// a `412 Precondition Failed` response should be produced.
    pub fn has_failed_precondition(&self, headers: &HeaderMap) -> bool {
        if let Some(value) = headers
            .get(header::IF_MATCH)
            .and_then(|value| value.to_str().ok())
        {
            value.trim() != "*" && !self.etag_matches(value, false)
        } else if let Some(value) = headers
            .get(header::IF_UNMODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
        {
            match (self.modified_time(), parse_http_date(value)) {
                (Some(modified), Ok(since)) => modified > since,
                _ => false,
            }
        } else {
            false
        }
    }

    /// Checks `If-None-Match` and `If-Modified-Since` headers of the request to determine whether
    /// a `304 Not Modified` response should be produced.
    pub fn is_not_modified(&self, headers: &HeaderMap) -> bool {
        if let Some(value) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|value| value.to_str().ok())
        {
            value.trim() == "*" || self.etag_matches(value, true)
        } else if let Some(value) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|value| value.to_str().ok())
        {
            match (self.modified_time(), parse_http_date(value)) {
                (Some(modified), Ok(since)) => modified <= since,
                _ => false,
            }
        } else {
            false
        }
    }

    fn add_common_headers(&self, header: &mut ResponseHeader) -> Result<(), Box<Error>> {
        header.append_header(header::CONTENT_TYPE, &self.mime)?;
        if let Some(modified) = &self.modified {
            header.append_header(header::LAST_MODIFIED, modified)?;
        }
        header.append_header(header::ETAG, &self.etag)?;
        if let Some(encoding) = self.encoding {
            header.append_header(header::CONTENT_ENCODING, encoding.name())?;
        }
        Ok(())
    }

    /// Produces a `200 OK` response and adds headers according to file metadata.
    pub(crate) fn to_response_header(&self, ranges: bool) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::OK, Some(8));
        header.append_header(header::CONTENT_LENGTH, self.size)?;
        if ranges {
            header.append_header(header::ACCEPT_RANGES, "bytes")?;
        }
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }

    /// Produces a `206 Partial Content` response and adds headers according to file metadata.
    pub(crate) fn to_partial_content_header(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(StatusCode::PARTIAL_CONTENT, Some(8));
        header.append_header(header::CONTENT_LENGTH, end - start + 1)?;
        header.append_header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{end}/{}", self.size),
        )?;
        self.add_common_headers(&mut header)?;
        Ok(Box::new(header))
    }

    /// Produces a response with specified status code and no response body.
    pub(crate) fn to_custom_header(&self, status: StatusCode) -> Result<Box<ResponseHeader>, Box<Error>> {
        let mut header = ResponseHeader::build(status, Some(4));
        self.add_common_headers(&mut header)?;
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            header.append_header(header::CONTENT_RANGE, format!("bytes */{}", self.size))?;
        }
        if status != StatusCode::NOT_MODIFIED {
            header.append_header(header::CONTENT_LENGTH, 0)?;
        }
        Ok(Box::new(header))
    }
}
