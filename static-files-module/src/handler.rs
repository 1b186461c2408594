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

//! Handler for the `request_filter` phase.

use async_trait::async_trait;
use http::{header, Method, StatusCode};
use lantern_module_utils::compression_algorithm::find_matches;
use lantern_module_utils::extensions::ListingPolicy;
use lantern_module_utils::standard_response::{error_response, redirect_response};
use lantern_module_utils::{
    CompressionAlgorithm, Error, ErrorType, RequestFilter, RequestFilterResult, ResponseHeader,
    Session,
};
use log::{debug, info, warn};
use percent_encoding::utf8_percent_encode;

use crate::configuration::StaticFilesConf;
use crate::file_writer::file_response;
use crate::listing::list;
use crate::metadata::Metadata;
use crate::mime_types::MimeTypes;
use crate::path::{MissingReason, ResolvedTarget, Resolver, TargetKind, URI_ESC_CHARSET};
use crate::range::{extract_range, Range};

/// A file chosen to be sent, possibly a pre-compressed variant of the requested one
#[derive(Debug)]
struct Selected {
    target: ResolvedTarget,
    meta: Metadata,
    ranges: bool,
}

/// Handler serving static files from the root directory
#[derive(Debug)]
pub struct StaticFilesHandler {
    resolver: Option<Resolver>,
    canonicalize_uri: bool,
    index_file: Vec<String>,
    precompressed: Vec<CompressionAlgorithm>,
}

impl TryFrom<StaticFilesConf> for StaticFilesHandler {
    type Error = Box<Error>;

    /// Canonicalizes the path to the root directory, this fails if that path isn't accessible.
    fn try_from(conf: StaticFilesConf) -> Result<Self, Self::Error> {
        debug!("Static files configuration received: {conf:#?}");

        let resolver = match &conf.root {
            Some(root) => {
                let root = root.canonicalize().map_err(|err| {
                    Error::because(
                        ErrorType::InvalidConfiguration,
                        format!("failed accessing root path {root:?}"),
                        err,
                    )
                })?;
                if !root.is_dir() {
                    return Err(Error::explain(
                        ErrorType::InvalidConfiguration,
                        format!("root path {root:?} is not a directory"),
                    ));
                }
                let mime_types = MimeTypes::new(&conf.mime_types, &conf.default_type);
                Some(Resolver::new(root, mime_types))
            }
            None => None,
        };

        Ok(Self {
            resolver,
            canonicalize_uri: conf.canonicalize_uri,
            index_file: conf.index_file.into(),
            precompressed: conf.precompressed.into(),
        })
    }
}

impl StaticFilesHandler {
    /// The path resolver, `None` if no root directory is configured
    pub fn resolver(&self) -> Option<&Resolver> {
        self.resolver.as_ref()
    }

    async fn find_index(&self, resolver: &Resolver, dir: &ResolvedTarget) -> Option<ResolvedTarget> {
        for filename in &self.index_file {
            let uri = format!(
                "{}{}",
                dir.canonical_uri,
                utf8_percent_encode(filename, URI_ESC_CHARSET)
            );
            let candidate = resolver.resolve(&uri).await;
            if candidate.is_file() {
                debug!("using directory index file {filename}");
                return Some(candidate);
            }
        }
        None
    }

    /// Looks for a pre-compressed variant of `uri` with one of the given algorithms.
    async fn find_precompressed(
        resolver: &Resolver,
        uri: &str,
        algorithms: &[CompressionAlgorithm],
    ) -> Option<(ResolvedTarget, CompressionAlgorithm)> {
        for algorithm in algorithms {
            let candidate = resolver.resolve(&format!("{uri}.{}", algorithm.ext())).await;
            if candidate.is_file() {
                return Some((candidate, *algorithm));
            }
        }
        None
    }

    /// Chooses between the file and its pre-compressed variants, `accepted` are the algorithms
    /// the client accepts. `file` is `None` if the file itself doesn't exist, a compressed variant
    /// will be served regardless of client support then.
    async fn select(
        &self,
        resolver: &Resolver,
        uri: &str,
        file: Option<ResolvedTarget>,
        accepted: &[CompressionAlgorithm],
    ) -> Option<Selected> {
        if let Some((target, algorithm)) =
            Self::find_precompressed(resolver, uri, accepted).await
        {
            debug!("serving pre-compressed file {:?}", target.absolute_path);
            let content_type = file.as_ref().map_or_else(
                || resolver.mime_types().content_type(std::path::Path::new(uri)),
                |file| file.content_type.clone().unwrap_or_default(),
            );
            let mut meta = Metadata::new(&target, Some(&content_type));
            meta.encoding = Some(algorithm);
            return Some(Selected {
                target,
                meta,
                ranges: file.is_some(),
            });
        }

        match file {
            Some(file) => Some(Selected {
                meta: Metadata::new(&file, None),
                target: file,
                ranges: true,
            }),
            None => {
                let rest = self
                    .precompressed
                    .iter()
                    .filter(|algorithm| !accepted.contains(algorithm))
                    .copied()
                    .collect::<Vec<_>>();
                let (target, algorithm) = Self::find_precompressed(resolver, uri, &rest).await?;
                debug!(
                    "only a compressed file {:?} exists, serving it",
                    target.absolute_path
                );
                let content_type = resolver.mime_types().content_type(std::path::Path::new(uri));
                let mut meta = Metadata::new(&target, Some(&content_type));
                meta.encoding = Some(algorithm);
                Some(Selected {
                    target,
                    meta,
                    ranges: false,
                })
            }
        }
    }

    async fn send_listing(
        session: &mut Session<'_>,
        dir: &ResolvedTarget,
        policy: ListingPolicy,
    ) -> Result<(), Box<Error>> {
        let mut listing = list(&dir.absolute_path, policy.format).await;
        if !policy.hidden {
            listing = listing.without_hidden();
        }
        let (content_type, body) = listing.render(&dir.canonical_uri)?;

        let mut header = ResponseHeader::build(StatusCode::OK, Some(4));
        header.append_header(header::CONTENT_TYPE, content_type)?;
        header.append_header(header::CONTENT_LENGTH, body.len())?;
        session.write_response_header(Box::new(header), false).await?;
        session.write_response_body(Some(body.into()), true).await
    }

    async fn send_file(&self, session: &mut Session<'_>, selected: Selected) -> Result<(), Box<Error>> {
        let Selected {
            target,
            meta,
            ranges,
        } = selected;

        let (failed_precondition, not_modified, range) = {
            let headers = &session.req_header().headers;
            (
                meta.has_failed_precondition(headers),
                meta.is_not_modified(headers),
                if ranges {
                    extract_range(headers, &meta)
                } else {
                    None
                },
            )
        };

        if failed_precondition {
            debug!("If-Match/If-Unmodified-Since precondition failed");
            let header = meta.to_custom_header(StatusCode::PRECONDITION_FAILED)?;
            return session.write_response_header(header, true).await;
        }

        if not_modified {
            debug!("If-None-Match/If-Modified-Since check resulted in Not Modified");
            let header = meta.to_custom_header(StatusCode::NOT_MODIFIED)?;
            return session.write_response_header(header, true).await;
        }

        let (mut header, start, len) = match range {
            Some(Range::Valid(start, end)) => {
                debug!("bytes range requested: {start}-{end}");
                (meta.to_partial_content_header(start, end)?, start, end - start + 1)
            }
            Some(Range::OutOfBounds) => {
                debug!("requested bytes range is out of bounds");
                let header = meta.to_custom_header(StatusCode::RANGE_NOT_SATISFIABLE)?;
                return session.write_response_header(header, true).await;
            }
            None => (meta.to_response_header(ranges)?, 0, meta.size),
        };

        if !self.precompressed.is_empty() {
            header.append_header(header::VARY, "Accept-Encoding")?;
        }

        let head_only = session.req_header().method == Method::HEAD;
        session
            .write_response_header(header, head_only || len == 0)
            .await?;
        if !head_only && len > 0 {
            file_response(session, &target.absolute_path, start, len).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RequestFilter for StaticFilesHandler {
    type Conf = StaticFilesConf;

    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut Session<'_>,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        let Some(resolver) = &self.resolver else {
            return Ok(RequestFilterResult::Unhandled);
        };

        let uri = session.req_header().uri.clone();
        debug!("received URI path {}", uri.path());

        let target = resolver.resolve(uri.path()).await;
        debug!("resolved into {target:?}");

        let file_missing = target.kind == TargetKind::Missing(MissingReason::NotFound)
            && !self.precompressed.is_empty();
        if let TargetKind::Missing(reason) = target.kind {
            if !file_missing {
                error_response(session, reason.status()).await?;
                return Ok(RequestFilterResult::ResponseSent);
            }
        }

        if self.canonicalize_uri && target.canonical_uri != uri.path() && !file_missing {
            let mut canonical = target.canonical_uri.clone();
            if let Some(query) = uri.query() {
                canonical.push('?');
                canonical.push_str(query);
            }
            info!("redirecting to canonical URI: {canonical}");
            redirect_response(session, StatusCode::MOVED_PERMANENTLY, &canonical).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }

        let method = session.req_header().method.clone();
        if method != Method::GET && method != Method::HEAD {
            warn!("Denying method {method}");
            error_response(session, StatusCode::METHOD_NOT_ALLOWED).await?;
            return Ok(RequestFilterResult::ResponseSent);
        }

        let target_uri = target.canonical_uri.clone();
        let file = match target.kind {
            TargetKind::Directory => match self.find_index(resolver, &target).await {
                Some(index) => Some(index),
                None => {
                    let policy = session
                        .extensions()
                        .get::<ListingPolicy>()
                        .copied()
                        .unwrap_or_default();
                    if policy.enabled {
                        debug!("producing {:?} listing of {:?}", policy.format, target.absolute_path);
                        Self::send_listing(session, &target, policy).await?;
                    } else {
                        debug!("no index file in {:?}, listing disabled", target.absolute_path);
                        error_response(session, StatusCode::FORBIDDEN).await?;
                    }
                    return Ok(RequestFilterResult::ResponseSent);
                }
            },
            TargetKind::File => Some(target),
            TargetKind::Missing(_) => None,
        };

        let file_uri = match &file {
            Some(file) => file.canonical_uri.clone(),
            None => target_uri,
        };
        let accepted = session
            .req_header()
            .headers
            .get(header::ACCEPT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(|value| find_matches(value, &self.precompressed))
            .unwrap_or_default();
        let Some(selected) = self.select(resolver, &file_uri, file, &accepted).await else {
            error_response(session, StatusCode::NOT_FOUND).await?;
            return Ok(RequestFilterResult::ResponseSent);
        };

        info!("serving file {:?}", selected.target.absolute_path);
        self.send_file(session, selected).await?;
        Ok(RequestFilterResult::ResponseSent)
    }
}
