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

//! Handler for the `logging` phase

use async_trait::async_trait;
use http::{HeaderMap, HeaderName};
use lantern_module_utils::extensions::CompressionRatio;
use lantern_module_utils::{Error, ErrorType, RequestFilter, Session};
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::configuration::CommonLogConf;
use crate::record::AccessRecord;
use crate::template::{LogTemplate, LogVariable, DEFAULT_LOG_FORMAT};
use crate::writer::{self, LogData, WriterMessage};

fn normalize_path(path: PathBuf) -> Result<PathBuf, Box<Error>> {
    if path.as_os_str().is_empty() || path.as_os_str() == "-" {
        // Don't change special paths
        return Ok(path);
    }

    if let Some(parent) = path.parent() {
        let mut parent = if parent.as_os_str().is_empty() {
            PathBuf::from(".").canonicalize()
        } else {
            parent.canonicalize()
        }
        .map_err(|err| {
            Error::because(
                ErrorType::FileOpenError,
                "failed resolving log file's parent directory",
                err,
            )
        })?;
        if let Some(name) = path.file_name() {
            parent.push(name);
        }
        Ok(parent)
    } else {
        // Absolute path in the root, leave unchanged
        Ok(path)
    }
}

fn copy_headers(source: &HeaderMap, names: &[HeaderName]) -> HeaderMap {
    let mut result = HeaderMap::new();
    for name in names {
        if let Some(value) = source.get(name) {
            result.insert(name.clone(), value.clone());
        }
    }
    result
}

/// Handler writing a line to the access log for every request
#[derive(Debug)]
pub struct CommonLogHandler {
    log_file: PathBuf,
    template: Arc<LogTemplate>,
    request_headers: Vec<HeaderName>,
    response_headers: Vec<HeaderName>,
}

impl TryFrom<CommonLogConf> for CommonLogHandler {
    type Error = Box<Error>;

    fn try_from(conf: CommonLogConf) -> Result<Self, Self::Error> {
        // Normalize parent directory in case the same file is specified with different paths
        let log_file = normalize_path(conf.log_file)?;

        let template = match conf.log_format {
            Some(template) => template,
            None => DEFAULT_LOG_FORMAT.parse().map_err(|err| {
                Error::because(
                    ErrorType::InvalidConfiguration,
                    "failed parsing default log format",
                    err,
                )
            })?,
        };

        let mut request_headers = Vec::new();
        let mut response_headers = Vec::new();
        for variable in template.variables() {
            match variable {
                LogVariable::RequestHeader(name) => request_headers.push(name.clone()),
                LogVariable::ResponseHeader(name) => response_headers.push(name.clone()),
                _ => {}
            }
        }

        Ok(Self {
            log_file,
            template: Arc::new(template),
            request_headers,
            response_headers,
        })
    }
}

impl CommonLogHandler {
    /// Whether a log file is configured
    pub fn enabled(&self) -> bool {
        !self.log_file.as_os_str().is_empty()
    }

    /// Collects the data about the request once its processing is complete.
    pub fn record(&self, session: &Session<'_>, ctx: &RequestCtx) -> AccessRecord {
        let response = session.response_written();
        AccessRecord {
            remote_addr: session.client_addr().copied(),
            remote_user: session.remote_user(),
            time: ctx.time,
            request: session.request_line().to_owned(),
            status: response.map(|header| header.status.as_u16()),
            bytes_sent: session.bytes_sent(),
            body_bytes_sent: session.body_bytes_sent(),
            compression_ratio: session
                .extensions()
                .get::<CompressionRatio>()
                .map(|ratio| ratio.0),
            request_time: ctx.start.elapsed(),
            request_headers: copy_headers(&session.req_header().headers, &self.request_headers),
            response_headers: response
                .map(|header| copy_headers(&header.headers, &self.response_headers))
                .unwrap_or_default(),
        }
    }

    /// Waits until all access log records queued so far have been written.
    pub async fn flush(&self) {
        writer::flush().await
    }
}

/// Context data for the log module
#[derive(Debug)]
pub struct RequestCtx {
    time: SystemTime,
    start: Instant,
}

#[async_trait]
impl RequestFilter for CommonLogHandler {
    type Conf = CommonLogConf;
    type CTX = RequestCtx;

    fn new_ctx() -> Self::CTX {
        RequestCtx {
            time: SystemTime::now(),
            start: Instant::now(),
        }
    }

    async fn logging(&self, session: &mut Session<'_>, _e: Option<&Error>, ctx: &mut RequestCtx) {
        if !self.enabled() {
            // Logging disabled
            return;
        }

        let record = self.record(session, ctx);
        debug!("queuing access log record for {}", record.request);
        writer::send(WriterMessage::LogData(Box::new(LogData {
            log_file: self.log_file.clone(),
            template: self.template.clone(),
            record,
        })))
        .await;
    }
}
