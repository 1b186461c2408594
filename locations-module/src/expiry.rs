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

//! Expiration settings and the `Expires`/`Cache-Control` headers derived from them

use http::{header, HeaderName, HeaderValue, StatusCode};
use httpdate::fmt_http_date;
use serde::de::{Deserialize, Deserializer, Visitor};
use std::fmt::Display;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// `Expires` value sent for [`Expiry::Epoch`]
pub const EPOCH_DATE: &str = "Thu, 01 Jan 1970 00:00:01 GMT";

/// `Expires` value sent for [`Expiry::Max`]
pub const MAX_DATE: &str = "Thu, 31 Dec 2037 23:55:55 GMT";

/// Seconds since the epoch corresponding to [`MAX_DATE`], later expiration times are clamped
const MAX_TIMESTAMP: u64 = 2_145_916_555;

/// `max-age` value sent for [`Expiry::Max`], ten years
pub const MAX_AGE: i64 = 315_360_000;

/// Expiration time of responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No expiration headers are added
    Off,
    /// Response expired long ago
    Epoch,
    /// Response expires as late as possible
    Max,
    /// Response expires after the given number of seconds, negative values mean that it already
    /// expired.
    Duration(i64),
}

/// Error produced when parsing an invalid expiration time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidExpiry {
    value: String,
}

impl Display for InvalidExpiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid expiration time {:?}", self.value)
    }
}

impl std::error::Error for InvalidExpiry {}

fn unit_seconds(unit: &str) -> Option<i64> {
    Some(match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        "w" => 7 * 24 * 60 * 60,
        "M" => 30 * 24 * 60 * 60,
        "y" => 365 * 24 * 60 * 60,
        _ => return None,
    })
}

fn parse_duration(value: &str) -> Option<i64> {
    let (negative, mut rest) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value.strip_prefix('+').unwrap_or(value)),
    };
    if rest.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        if digits == 0 {
            return None;
        }
        let number: i64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let multiplier = unit_seconds(&rest[..unit_len])?;
        rest = &rest[unit_len..];

        total = total.checked_add(number.checked_mul(multiplier)?)?;
    }

    Some(if negative { -total } else { total })
}

impl FromStr for Expiry {
    type Err = InvalidExpiry;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value {
            "off" => Ok(Self::Off),
            "epoch" => Ok(Self::Epoch),
            "max" => Ok(Self::Max),
            _ => parse_duration(value)
                .map(Self::Duration)
                .ok_or_else(|| InvalidExpiry {
                    value: s.to_owned(),
                }),
        }
    }
}

impl<'de> Deserialize<'de> for Expiry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ExpiryVisitor;

        impl<'de> Visitor<'de> for ExpiryVisitor {
            type Value = Expiry;

            fn expecting(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                formatter.write_str("expiration time like 1h30m, number of seconds, off, epoch or max")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                v.parse().map_err(E::custom)
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Expiry::Duration(v))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                i64::try_from(v)
                    .map(Expiry::Duration)
                    .map_err(|_| E::custom("expiration time too large"))
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v {
                    Err(E::custom("expiration time expected, got true"))
                } else {
                    Ok(Expiry::Off)
                }
            }
        }

        deserializer.deserialize_any(ExpiryVisitor)
    }
}

impl Expiry {
    /// Whether expiration headers should be added to a response with this status
    pub fn applies_to(status: StatusCode) -> bool {
        matches!(
            status.as_u16(),
            200 | 201 | 204 | 206 | 301 | 302 | 303 | 304 | 307 | 308
        )
    }

    /// Produces the `Expires` and `Cache-Control` headers for a response generated at `now`.
    pub fn headers(&self, now: SystemTime) -> Vec<(HeaderName, HeaderValue)> {
        let (expires, cache_control) = match *self {
            Self::Off => return Vec::new(),
            Self::Epoch => (EPOCH_DATE.to_owned(), "no-cache".to_owned()),
            Self::Max => (MAX_DATE.to_owned(), format!("max-age={MAX_AGE}")),
            Self::Duration(seconds) => {
                let offset = Duration::from_secs(seconds.unsigned_abs());
                let max_time = SystemTime::UNIX_EPOCH + Duration::from_secs(MAX_TIMESTAMP);
                let time = if seconds >= 0 {
                    now.checked_add(offset)
                } else {
                    now.checked_sub(offset)
                };
                let expires = match time {
                    Some(time) if time > max_time => return Self::Max.headers(now),
                    Some(time) if time > SystemTime::UNIX_EPOCH => fmt_http_date(time),
                    None if seconds >= 0 => return Self::Max.headers(now),
                    _ => EPOCH_DATE.to_owned(),
                };
                let cache_control = if seconds >= 0 {
                    format!("max-age={seconds}")
                } else {
                    "no-cache".to_owned()
                };
                (expires, cache_control)
            }
        };

        let mut headers = Vec::with_capacity(2);
        if let Ok(value) = HeaderValue::from_str(&expires) {
            headers.push((header::EXPIRES, value));
        }
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            headers.push((header::CACHE_CONTROL, value));
        }
        headers
    }
}
