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

//! Log line templates like `$remote_addr [$time_local] "$request" $status`

use chrono::{DateTime, Local};
use http::HeaderName;
use serde::Deserialize;
use std::fmt::Display;
use std::io::Write;
use std::str::FromStr;

use crate::record::AccessRecord;

/// The log format used if none is configured
pub const DEFAULT_LOG_FORMAT: &str = r#"$remote_addr - $remote_user [$time_local] "$request" $status $body_bytes_sent "$http_referer" "$http_user_agent" "$http_x_forwarded_for" "$gzip_ratio" "$request_time""#;

/// Error produced when parsing an invalid log format
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidLogFormat(String);

impl Display for InvalidLogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for InvalidLogFormat {}

/// A variable that can be used in the log format
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogVariable {
    /// Client's IP address, `$remote_addr`
    RemoteAddr,
    /// Client's TCP port, `$remote_port`
    RemotePort,
    /// User name from HTTP basic authentication, `$remote_user`
    RemoteUser,
    /// Local time in the Common Log Format, `$time_local`
    TimeLocal,
    /// Local time in the ISO 8601 format, `$time_iso8601`
    TimeIso8601,
    /// Request line like `GET / HTTP/1.1`, `$request`
    Request,
    /// Numeric response status code, `$status`
    Status,
    /// Number of bytes sent including headers, `$bytes_sent`
    BytesSent,
    /// Number of response body bytes sent, `$body_bytes_sent`
    BodyBytesSent,
    /// Seconds from request start to the end of the response with millisecond resolution,
    /// `$request_time`
    RequestTime,
    /// Compression ratio if the response has been compressed, `$gzip_ratio`
    GzipRatio,
    /// A request header, `$http_<header>`
    RequestHeader(HeaderName),
    /// A response header, `$sent_http_<header>`
    ResponseHeader(HeaderName),
}

fn header_name(name: &str) -> Result<HeaderName, InvalidLogFormat> {
    HeaderName::try_from(name.replace('_', "-"))
        .map_err(|err| InvalidLogFormat(format!("invalid header name {name}: {err}")))
}

impl FromStr for LogVariable {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "remote_addr" => Self::RemoteAddr,
            "remote_port" => Self::RemotePort,
            "remote_user" => Self::RemoteUser,
            "time_local" => Self::TimeLocal,
            "time_iso8601" => Self::TimeIso8601,
            "request" => Self::Request,
            "status" => Self::Status,
            "bytes_sent" => Self::BytesSent,
            "body_bytes_sent" => Self::BodyBytesSent,
            "request_time" => Self::RequestTime,
            "gzip_ratio" => Self::GzipRatio,
            name => {
                if let Some(header) = name.strip_prefix("http_") {
                    Self::RequestHeader(header_name(header)?)
                } else if let Some(header) = name.strip_prefix("sent_http_") {
                    Self::ResponseHeader(header_name(header)?)
                } else {
                    return Err(InvalidLogFormat(format!("unsupported log variable ${name}")));
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Variable(LogVariable),
}

/// A parsed log format
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct LogTemplate {
    parts: Vec<TemplatePart>,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

impl FromStr for LogTemplate {
    type Err = InvalidLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = Vec::new();
        let mut literal = String::new();
        let mut rest = s;

        while let Some(pos) = rest.find('$') {
            literal.push_str(&rest[..pos]);
            rest = &rest[pos + 1..];

            let (name, remainder) = if let Some(braced) = rest.strip_prefix('{') {
                let end = braced
                    .find('}')
                    .ok_or_else(|| InvalidLogFormat(format!("unterminated variable in {s:?}")))?;
                if end == 0 {
                    return Err(InvalidLogFormat(format!("empty variable name in {s:?}")));
                }
                (&braced[..end], &braced[end + 1..])
            } else {
                let end = rest.find(|c| !is_name_char(c)).unwrap_or(rest.len());
                (&rest[..end], &rest[end..])
            };

            if name.is_empty() {
                // Lone dollar sign
                literal.push('$');
                continue;
            }

            if !literal.is_empty() {
                parts.push(TemplatePart::Literal(std::mem::take(&mut literal)));
            }
            parts.push(TemplatePart::Variable(name.parse()?));
            rest = remainder;
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(TemplatePart::Literal(literal));
        }

        Ok(Self { parts })
    }
}

impl TryFrom<String> for LogTemplate {
    type Error = InvalidLogFormat;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl LogTemplate {
    /// Variables used by the template, in order of appearance
    pub fn variables(&self) -> impl Iterator<Item = &LogVariable> {
        self.parts.iter().filter_map(|part| match part {
            TemplatePart::Variable(variable) => Some(variable),
            TemplatePart::Literal(_) => None,
        })
    }

    /// Formats a record into `buf` as a single line, including the line break. Values that aren't
    /// available are written as `-`.
    pub fn format(&self, buf: &mut Vec<u8>, record: &AccessRecord) {
        buf.clear();

        for part in &self.parts {
            let _ = match part {
                TemplatePart::Literal(literal) => buf.write_all(literal.as_bytes()),
                TemplatePart::Variable(variable) => write_variable(buf, variable, record),
            };
        }
        buf.push(b'\n');
    }
}

fn write_escaped(buf: &mut Vec<u8>, data: impl AsRef<[u8]>) -> Result<(), std::io::Error> {
    fn is_allowed(byte: u8) -> bool {
        (b' '..=b'~').contains(&byte) && byte != b'"' && byte != b'\\'
    }

    for byte in data.as_ref() {
        if is_allowed(*byte) {
            buf.push(*byte);
        } else {
            write!(buf, "\\x{byte:02x}")?;
        }
    }
    Ok(())
}

fn write_optional<T: AsRef<[u8]>>(buf: &mut Vec<u8>, value: Option<T>) -> Result<(), std::io::Error> {
    match value {
        Some(value) if !value.as_ref().is_empty() => write_escaped(buf, value),
        _ => buf.write_all(b"-"),
    }
}

fn write_variable(
    buf: &mut Vec<u8>,
    variable: &LogVariable,
    record: &AccessRecord,
) -> Result<(), std::io::Error> {
    match variable {
        LogVariable::RemoteAddr => match record.remote_addr {
            Some(addr) => write!(buf, "{}", addr.ip()),
            None => buf.write_all(b"-"),
        },
        LogVariable::RemotePort => match record.remote_addr {
            Some(addr) => write!(buf, "{}", addr.port()),
            None => buf.write_all(b"-"),
        },
        LogVariable::RemoteUser => write_optional(buf, record.remote_user.as_deref()),
        LogVariable::TimeLocal => {
            let time = DateTime::<Local>::from(record.time).format("%d/%b/%Y:%H:%M:%S %z");
            write!(buf, "{time}")
        }
        LogVariable::TimeIso8601 => {
            let time = DateTime::<Local>::from(record.time).to_rfc3339();
            write!(buf, "{time}")
        }
        LogVariable::Request => write_optional(buf, Some(&record.request)),
        LogVariable::Status => match record.status {
            Some(status) => write!(buf, "{status}"),
            None => buf.write_all(b"-"),
        },
        LogVariable::BytesSent => write!(buf, "{}", record.bytes_sent),
        LogVariable::BodyBytesSent => write!(buf, "{}", record.body_bytes_sent),
        LogVariable::RequestTime => write!(buf, "{:.3}", record.request_time.as_secs_f64()),
        LogVariable::GzipRatio => match record.compression_ratio {
            Some(ratio) => write!(buf, "{ratio:.2}"),
            None => buf.write_all(b"-"),
        },
        LogVariable::RequestHeader(name) => {
            write_optional(buf, record.request_headers.get(name).map(|value| value.as_bytes()))
        }
        LogVariable::ResponseHeader(name) => {
            write_optional(buf, record.response_headers.get(name).map(|value| value.as_bytes()))
        }
    }
}
