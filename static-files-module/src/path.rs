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

//! Translating URI paths into file system paths confined to the root directory

use http::StatusCode;
use log::{debug, warn};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::ffi::OsString;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::mime_types::MimeTypes;

/// Characters escaped when producing URIs from file names
pub(crate) const URI_ESC_CHARSET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

#[cfg(unix)]
fn path_from_bytes(bytes: Vec<u8>) -> OsString {
    use std::os::unix::ffi::OsStringExt;

    OsString::from_vec(bytes)
}

#[cfg(not(unix))]
fn path_from_bytes(bytes: Vec<u8>) -> OsString {
    // Non-Unicode file names will result in 404 here
    String::from_utf8_lossy(&bytes).into_owned().into()
}

/// Reason why a URI path doesn't resolve to a file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// Nothing exists at this path
    NotFound,
    /// Access to the path has been denied
    Forbidden,
    /// Path leads outside the root directory
    Escaped,
    /// Unexpected I/O error
    Io,
}

impl MissingReason {
    /// Status code of the response for this condition
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::Escaped => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Io => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn from_error(err: &Error) -> Self {
        match err.kind() {
            ErrorKind::NotFound => Self::NotFound,
            ErrorKind::PermissionDenied => Self::Forbidden,
            // ENOTDIR, a path component is a regular file
            _ if cfg!(unix) && err.raw_os_error() == Some(20) => Self::NotFound,
            _ => Self::Io,
        }
    }
}

/// Kind of a resolved target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// No usable file system entry
    Missing(MissingReason),
}

/// Result of resolving a URI path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    /// What has been found
    pub kind: TargetKind,
    /// Canonical file system path, empty unless found
    pub absolute_path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modification time if known
    pub modified_time: Option<SystemTime>,
    /// MIME type, only set for files
    pub content_type: Option<String>,
    /// Normalized URI path: decoding undone where unnecessary, `.` and `..` removed, trailing
    /// slash for directories
    pub canonical_uri: String,
}

impl ResolvedTarget {
    fn missing(reason: MissingReason, canonical_uri: String) -> Self {
        Self {
            kind: TargetKind::Missing(reason),
            absolute_path: PathBuf::new(),
            size: 0,
            modified_time: None,
            content_type: None,
            canonical_uri,
        }
    }

    /// `true` for regular files
    pub fn is_file(&self) -> bool {
        self.kind == TargetKind::File
    }
}

/// Resolves URI paths within a root directory
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    mime_types: MimeTypes,
}

impl Resolver {
    /// Creates a resolver. `root` has to be canonical already.
    pub fn new(root: PathBuf, mime_types: MimeTypes) -> Self {
        Self { root, mime_types }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The MIME types table
    pub fn mime_types(&self) -> &MimeTypes {
        &self.mime_types
    }

    /// Resolves a URI path (without query). Only file metadata is accessed. All failures are
    /// reported as [`TargetKind::Missing`].
    pub async fn resolve(&self, uri_path: &str) -> ResolvedTarget {
        let Some(relative) = uri_path.strip_prefix('/') else {
            debug!("URI path {uri_path:?} is not absolute");
            return ResolvedTarget::missing(MissingReason::NotFound, uri_path.to_owned());
        };

        let mut components = Vec::new();
        for component in relative.split('/') {
            let decoded = percent_decode_str(component).collect::<Vec<_>>();
            if decoded.contains(&b'/') || decoded.contains(&0) {
                warn!("Rejecting URI path {uri_path:?} with encoded slash or NUL");
                return ResolvedTarget::missing(MissingReason::Escaped, uri_path.to_owned());
            }

            match decoded.as_slice() {
                b"" | b"." => {}
                b".." => {
                    if components.pop().is_none() {
                        warn!("URI path {uri_path:?} leads outside the root directory");
                        return ResolvedTarget::missing(
                            MissingReason::Escaped,
                            uri_path.to_owned(),
                        );
                    }
                }
                _ => components.push(decoded),
            }
        }

        let mut canonical_uri = String::from("/");
        let mut path = self.root.clone();
        for (index, component) in components.into_iter().enumerate() {
            if index > 0 {
                canonical_uri.push('/');
            }
            canonical_uri.extend(utf8_percent_encode(
                &String::from_utf8_lossy(&component),
                URI_ESC_CHARSET,
            ));
            path.push(path_from_bytes(component));
        }

        let absolute_path = match tokio::fs::canonicalize(&path).await {
            Ok(absolute_path) => absolute_path,
            Err(err) => {
                let reason = MissingReason::from_error(&err);
                if reason == MissingReason::Io {
                    warn!("Failed resolving path {path:?}: {err}");
                } else {
                    debug!("Failed resolving path {path:?}: {err}");
                }
                return ResolvedTarget::missing(reason, canonical_uri);
            }
        };

        if !absolute_path.starts_with(&self.root) {
            warn!("Path {path:?} resolves to {absolute_path:?} outside the root directory");
            return ResolvedTarget::missing(MissingReason::Escaped, canonical_uri);
        }

        let meta = match tokio::fs::metadata(&absolute_path).await {
            Ok(meta) => meta,
            Err(err) => {
                debug!("Failed retrieving metadata for {absolute_path:?}: {err}");
                return ResolvedTarget::missing(MissingReason::from_error(&err), canonical_uri);
            }
        };

        let (kind, content_type) = if meta.is_file() {
            (
                TargetKind::File,
                Some(self.mime_types.content_type(&absolute_path)),
            )
        } else if meta.is_dir() {
            if !canonical_uri.ends_with('/') {
                canonical_uri.push('/');
            }
            (TargetKind::Directory, None)
        } else {
            warn!("Path {absolute_path:?} is neither a file nor a directory, denying access");
            (TargetKind::Missing(MissingReason::Forbidden), None)
        };

        ResolvedTarget {
            kind,
            absolute_path,
            size: meta.len(),
            modified_time: meta.modified().ok(),
            content_type,
            canonical_uri,
        }
    }
}
