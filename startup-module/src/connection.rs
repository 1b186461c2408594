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

//! Processing of a single client connection: reading requests, running them through the app and
//! keeping the connection alive between requests.

use bytes::{Buf, BytesMut};
use http::{header, Version};
use lantern_module_utils::{Error, ErrorType, RequestFilter, RequestHeader};
use log::{debug, trace};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::{timeout_at, Instant};

use crate::configuration::ConnectionSettings;
use crate::DefaultApp;

/// Maximal size of the request header
pub const MAX_HEADER_SIZE: usize = 8192;

/// Maximal number of request headers
pub const MAX_HEADERS: usize = 64;

/// Request bodies up to this size are read and discarded, larger ones close the connection.
const MAX_DISCARDED_BODY: u64 = 65536;

/// Processing stage of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Connection accepted, nothing read yet
    Accepted,
    /// Reading a request header
    Reading,
    /// Running the request filters
    Processing,
    /// Response produced, running the logging phase
    Responding,
    /// Waiting for the next request
    Idle,
    /// Connection is about to be closed
    Closing,
}

/// Per-connection state
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Address of the client
    pub remote_address: Option<SocketAddr>,
    /// Point in time after which an idle connection is closed
    pub keep_alive_deadline: Option<Instant>,
    /// Number of requests processed on this connection
    pub requests_served: usize,
    /// Current processing stage
    pub state: ConnectionState,
}

impl ConnectionContext {
    fn new(remote_address: Option<SocketAddr>) -> Self {
        Self {
            remote_address,
            keep_alive_deadline: None,
            requests_served: 0,
            state: ConnectionState::Accepted,
        }
    }
}

#[derive(Debug)]
enum RequestBody {
    None,
    Length(u64),
    Chunked,
}

#[derive(Debug)]
enum ReadResult {
    Request(RequestHeader, RequestBody),
    Malformed(String),
    Closed,
}

fn raw_request_line(buf: &[u8]) -> String {
    let buf = buf
        .iter()
        .position(|c| !matches!(c, b'\r' | b'\n'))
        .map(|start| &buf[start..])
        .unwrap_or_default();
    let end = buf
        .iter()
        .position(|c| matches!(c, b'\r' | b'\n'))
        .unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Attempts to parse a request header from the buffer. Returns `Ok(None)` if more data is
/// required, on success the number of bytes consumed is returned along with the request.
fn parse_request(buf: &[u8]) -> Result<Option<(RequestHeader, RequestBody, usize)>, Box<Error>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(err) => {
            return Err(Error::because(
                ErrorType::InvalidRequest,
                "failed parsing request",
                err,
            ))
        }
    };

    let version = match req.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };
    let mut header = RequestHeader::build(
        req.method.unwrap_or_default(),
        req.path.unwrap_or_default().as_bytes(),
        Some(version),
    )?;
    for h in req.headers.iter() {
        header.append_header(h.name, h.value)?;
    }

    let chunked = header
        .headers
        .get_all(header::TRANSFER_ENCODING)
        .iter()
        .any(|value| value.as_bytes().eq_ignore_ascii_case(b"chunked"));
    let body = if chunked {
        RequestBody::Chunked
    } else if let Some(length) = header.headers.get(header::CONTENT_LENGTH) {
        let length = length
            .to_str()
            .ok()
            .and_then(|length| length.trim().parse().ok())
            .ok_or_else(|| Error::explain(ErrorType::InvalidRequest, "invalid Content-Length"))?;
        RequestBody::Length(length)
    } else {
        RequestBody::None
    };

    Ok(Some((header, body, len)))
}

async fn read_request<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    ctx: &mut ConnectionContext,
    settings: &ConnectionSettings,
) -> Result<ReadResult, Box<Error>>
where
    R: AsyncRead + Unpin,
{
    let mut header_deadline = None;
    loop {
        if !buf.is_empty() {
            ctx.state = ConnectionState::Reading;
            match parse_request(buf) {
                Ok(Some((header, body, len))) => {
                    buf.advance(len);
                    return Ok(ReadResult::Request(header, body));
                }
                Ok(None) if buf.len() > MAX_HEADER_SIZE => {
                    debug!("request header exceeds {MAX_HEADER_SIZE} bytes");
                    return Ok(ReadResult::Malformed(raw_request_line(buf)));
                }
                Ok(None) => {}
                Err(err) => {
                    debug!("received malformed request: {err}");
                    return Ok(ReadResult::Malformed(raw_request_line(buf)));
                }
            }
        }

        let deadline = if buf.is_empty() && ctx.requests_served > 0 {
            // Idle connection waiting for the next request
            ctx.keep_alive_deadline
                .unwrap_or_else(|| Instant::now() + settings.keepalive_timeout)
        } else {
            *header_deadline.get_or_insert_with(|| Instant::now() + settings.client_header_timeout)
        };

        match timeout_at(deadline, reader.read_buf(buf)).await {
            Ok(Ok(0)) => {
                if !buf.is_empty() {
                    debug!("connection closed in the middle of a request header");
                }
                return Ok(ReadResult::Closed);
            }
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                return Err(Error::because(
                    ErrorType::ReadError,
                    "failed reading request",
                    err,
                ))
            }
            Err(_) => {
                debug!("timed out waiting for request data");
                return Ok(ReadResult::Closed);
            }
        }
    }
}

/// Reads and drops a request body of the given length. Returns `false` if the body could not be
/// read completely.
async fn discard_body<R>(
    reader: &mut R,
    buf: &mut BytesMut,
    length: u64,
    settings: &ConnectionSettings,
) -> bool
where
    R: AsyncRead + Unpin,
{
    let mut remaining = length;
    let deadline = Instant::now() + settings.client_header_timeout;
    loop {
        let available = remaining.min(buf.len() as u64);
        buf.advance(available as usize);
        remaining -= available;
        if remaining == 0 {
            return true;
        }

        match timeout_at(deadline, reader.read_buf(buf)).await {
            Ok(Ok(0)) | Ok(Err(_)) | Err(_) => return false,
            Ok(Ok(_)) => {}
        }
    }
}

/// Serves requests on a connection until the client closes it, the keep-alive timeout expires or
/// an error occurs. Returns the final connection state.
pub async fn handle_connection<S, H>(
    stream: S,
    remote_address: Option<SocketAddr>,
    app: &DefaultApp<H>,
    settings: &ConnectionSettings,
) -> ConnectionContext
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
    H: RequestFilter,
{
    let mut ctx = ConnectionContext::new(remote_address);
    let (mut reader, writer) = tokio::io::split(stream);
    let mut writer = BufWriter::new(writer);
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let (header, body) = match read_request(&mut reader, &mut buf, &mut ctx, settings).await {
            Ok(ReadResult::Request(header, body)) => (header, body),
            Ok(ReadResult::Malformed(raw_line)) => {
                ctx.state = ConnectionState::Processing;
                app.handle_malformed(raw_line, remote_address, &mut writer)
                    .await;
                ctx.requests_served += 1;
                break;
            }
            Ok(ReadResult::Closed) => break,
            Err(err) => {
                debug!("{err}");
                break;
            }
        };

        ctx.state = ConnectionState::Processing;
        trace!("processing request {header:?}");

        let mut handler_ctx = H::new_ctx();
        let mut session = app.new_session(header, remote_address, &mut writer);
        match body {
            RequestBody::Chunked => session.set_keepalive(false),
            RequestBody::Length(length) if length > MAX_DISCARDED_BODY => {
                session.set_keepalive(false)
            }
            _ => {}
        }
        if ctx.requests_served + 1 >= settings.keepalive_requests {
            session.set_keepalive(false);
        }

        let err = app.process(&mut session, &mut handler_ctx).await;

        ctx.state = ConnectionState::Responding;
        app.logging(&mut session, err.as_deref(), &mut handler_ctx)
            .await;

        let keepalive = session.keepalive() && session.is_finished();
        drop(session);
        ctx.requests_served += 1;

        if let Err(err) = writer.flush().await {
            debug!("failed flushing response: {err}");
            break;
        }
        if !keepalive {
            break;
        }

        if let RequestBody::Length(length) = body {
            if !discard_body(&mut reader, &mut buf, length, settings).await {
                break;
            }
        }

        ctx.state = ConnectionState::Idle;
        ctx.keep_alive_deadline = Some(Instant::now() + settings.keepalive_timeout);
    }

    ctx.state = ConnectionState::Closing;
    if let Err(err) = writer.shutdown().await {
        trace!("failed shutting down connection: {err}");
    }
    ctx
}
