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

//! Directory listings in JSON and HTML format

use httpdate::fmt_http_date;
use lantern_module_utils::extensions::ListingFormat;
use lantern_module_utils::{Error, ErrorType};
use log::{debug, warn};
use maud::{html, DOCTYPE};
use percent_encoding::utf8_percent_encode;
use serde::{Serialize, Serializer};
use std::path::Path;
use std::time::SystemTime;

use crate::path::URI_ESC_CHARSET;

/// Type of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    /// Regular file or anything else that isn't a directory
    File,
    /// Directory
    Directory,
}

fn serialize_time<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&fmt_http_date(*time))
}

/// A single directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListingEntry {
    /// File name
    pub name: String,
    /// Entry type
    #[serde(rename = "type")]
    pub kind: EntryType,
    /// Size in bytes
    pub size: u64,
    /// Last modification time
    #[serde(serialize_with = "serialize_time")]
    pub modified_time: SystemTime,
}

/// Contents of a directory, sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    /// Output format
    pub format: ListingFormat,
    /// Directory entries
    pub entries: Vec<ListingEntry>,
}

/// Lists all immediate children of a directory, dot-files included. An unreadable directory
/// results in an empty listing.
pub async fn list(directory: &Path, format: ListingFormat) -> Listing {
    let mut read_dir = match tokio::fs::read_dir(directory).await {
        Ok(read_dir) => read_dir,
        Err(err) => {
            warn!("Failed reading directory {directory:?}: {err}");
            return Listing {
                format,
                entries: Vec::new(),
            };
        }
    };

    let mut entries = Vec::new();
    loop {
        let entry = match read_dir.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!("Failed reading directory {directory:?}: {err}");
                break;
            }
        };

        let name = entry.file_name().to_string_lossy().into_owned();

        // Follows symlinks, unlike `entry.metadata()`
        let meta = match tokio::fs::metadata(entry.path()).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!("Skipping directory entry {:?}: {err}", entry.path());
                continue;
            }
        };

        entries.push(ListingEntry {
            name,
            kind: if meta.is_dir() {
                EntryType::Directory
            } else {
                EntryType::File
            },
            size: meta.len(),
            modified_time: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }

    entries.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    Listing { format, entries }
}

impl Listing {
    /// Removes entries with names starting with a dot, as nginx's autoindex does.
    pub fn without_hidden(mut self) -> Self {
        self.entries.retain(|entry| !entry.name.starts_with('.'));
        self
    }

    /// JSON array of entries
    pub fn to_json(&self) -> Result<String, Box<Error>> {
        serde_json::to_string(&self.entries).map_err(|err| {
            Error::because(ErrorType::InternalError, "failed serializing listing", err)
        })
    }

    /// HTML page listing the entries, `uri_path` is the directory's path
    pub fn to_html(&self, uri_path: &str) -> String {
        let title = format!("Index of {uri_path}");
        html! {
            (DOCTYPE)
            html {
                head {
                    meta charset="utf-8";
                    title { (title) }
                }
                body {
                    h1 { (title) }
                    table {
                        tr {
                            th { "Name" }
                            th { "Last modified" }
                            th { "Size" }
                        }
                        @if uri_path != "/" {
                            tr {
                                td { a href="../" { "../" } }
                                td {}
                                td {}
                            }
                        }
                        @for entry in &self.entries {
                            @let suffix = if entry.kind == EntryType::Directory { "/" } else { "" };
                            tr {
                                td {
                                    a href={ (utf8_percent_encode(&entry.name, URI_ESC_CHARSET)) (suffix) } {
                                        (entry.name) (suffix)
                                    }
                                }
                                td { (fmt_http_date(entry.modified_time)) }
                                td {
                                    @if entry.kind == EntryType::Directory { "-" } @else { (entry.size) }
                                }
                            }
                        }
                    }
                }
            }
        }
        .into()
    }

    /// Produces the listing in its format, returns the content type and the body.
    pub fn render(&self, uri_path: &str) -> Result<(&'static str, String), Box<Error>> {
        Ok(match self.format {
            ListingFormat::Json => ("application/json", self.to_json()?),
            ListingFormat::Html => ("text/html; charset=utf-8", self.to_html(uri_path)),
        })
    }
}
