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

//! Request and response headers and the per-request session writing the response to the client
//! connection.

use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use http::{header, Extensions, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};
use httpdate::fmt_http_date;
use log::trace;
use std::fmt::Debug;
use std::net::SocketAddr;
use std::time::SystemTime;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, ErrorType};
use crate::extensions::CompressionRatio;

/// Value of the `Server` response header
pub const SERVER_NAME: &str = "lantern";

type BoxedError = Box<dyn std::error::Error + Send + Sync>;

fn header_pair<N, V>(name: N, value: V) -> Result<(HeaderName, HeaderValue), Box<Error>>
where
    N: TryInto<HeaderName>,
    N::Error: Into<BoxedError>,
    V: TryInto<HeaderValue>,
    V::Error: Into<BoxedError>,
{
    let name = name
        .try_into()
        .map_err(|err| Error::because(ErrorType::InternalError, "invalid header name", err))?;
    let value = value
        .try_into()
        .map_err(|err| Error::because(ErrorType::InternalError, "invalid header value", err))?;
    Ok((name, value))
}

/// Request line and headers of an HTTP request
#[derive(Debug, Clone)]
pub struct RequestHeader {
    /// Request method
    pub method: Method,
    /// Request URI
    pub uri: Uri,
    /// HTTP version
    pub version: Version,
    /// Request headers
    pub headers: HeaderMap,
}

impl RequestHeader {
    /// Creates a request header from method and path, without any headers.
    pub fn build(method: &str, path: &[u8], version: Option<Version>) -> Result<Self, Box<Error>> {
        let method = Method::from_bytes(method.as_bytes())
            .map_err(|err| Error::because(ErrorType::InvalidRequest, "invalid method", err))?;
        let uri = Uri::try_from(path)
            .map_err(|err| Error::because(ErrorType::InvalidRequest, "invalid URI", err))?;
        Ok(Self {
            method,
            uri,
            version: version.unwrap_or(Version::HTTP_11),
            headers: HeaderMap::new(),
        })
    }

    /// Adds a header, keeping existing headers with the same name.
    pub fn append_header<N, V>(&mut self, name: N, value: V) -> Result<(), Box<Error>>
    where
        N: TryInto<HeaderName>,
        N::Error: Into<BoxedError>,
        V: TryInto<HeaderValue>,
        V::Error: Into<BoxedError>,
    {
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Sets a header, replacing existing headers with the same name.
    pub fn insert_header<N, V>(&mut self, name: N, value: V) -> Result<(), Box<Error>>
    where
        N: TryInto<HeaderName>,
        N::Error: Into<BoxedError>,
        V: TryInto<HeaderValue>,
        V::Error: Into<BoxedError>,
    {
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Produces the request line as it would be logged, e.g. `GET /file.txt HTTP/1.1`
    pub fn request_line(&self) -> String {
        let path = self
            .uri
            .path_and_query()
            .map(|p| p.as_str())
            .unwrap_or("");
        format!("{} {path} {:?}", self.method, self.version)
    }

    fn wants_keepalive(&self) -> bool {
        let connection = self
            .headers
            .get(header::CONNECTION)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase());
        let has_token = |token: &str| {
            connection
                .as_deref()
                .is_some_and(|value| value.split(',').any(|t| t.trim() == token))
        };

        match self.version {
            Version::HTTP_10 | Version::HTTP_09 => has_token("keep-alive"),
            _ => !has_token("close"),
        }
    }
}

/// Status and headers of an HTTP response
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHeader {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
}

impl ResponseHeader {
    /// Creates a response header with the given status. `size_hint` is the expected number of
    /// headers.
    pub fn build(status: StatusCode, size_hint: Option<usize>) -> Self {
        Self {
            status,
            headers: HeaderMap::with_capacity(size_hint.unwrap_or(8)),
        }
    }

    /// Adds a header, keeping existing headers with the same name.
    pub fn append_header<N, V>(&mut self, name: N, value: V) -> Result<(), Box<Error>>
    where
        N: TryInto<HeaderName>,
        N::Error: Into<BoxedError>,
        V: TryInto<HeaderValue>,
        V::Error: Into<BoxedError>,
    {
        let (name, value) = header_pair(name, value)?;
        self.headers.append(name, value);
        Ok(())
    }

    /// Sets a header, replacing existing headers with the same name.
    pub fn insert_header<N, V>(&mut self, name: N, value: V) -> Result<(), Box<Error>>
    where
        N: TryInto<HeaderName>,
        N::Error: Into<BoxedError>,
        V: TryInto<HeaderValue>,
        V::Error: Into<BoxedError>,
    {
        let (name, value) = header_pair(name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Removes a header, returning its value if present.
    pub fn remove_header(&mut self, name: &HeaderName) -> Option<HeaderValue> {
        self.headers.remove(name)
    }

    fn to_bytes(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(256);
        buf.extend_from_slice(b"HTTP/1.1 ");
        buf.extend_from_slice(self.status.as_str().as_bytes());
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(self.status.canonical_reason().unwrap_or("").as_bytes());
        buf.extend_from_slice(b"\r\n");
        for (name, value) in &self.headers {
            buf.extend_from_slice(name.as_str().as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
        buf
    }
}

/// A transformation applied to the response body before it is sent, e.g. compression
pub trait BodyFilter: Debug + Send {
    /// Transforms the next chunk of the body. `None` for `data` is a valid input when
    /// `end_of_stream` is set, the filter might need to flush remaining data then.
    fn filter(&mut self, data: Option<Bytes>, end_of_stream: bool) -> Result<Bytes, Box<Error>>;

    /// Ratio between input and output size, only available once the body is complete.
    fn ratio(&self) -> Option<f32> {
        None
    }
}

/// Adjusts response headers right before these are written, implemented by all request filters
pub trait ResponseHeaderFilter {
    /// Modifies the response header.
    fn filter_response_header(&self, session: &mut Session<'_>, response: &mut ResponseHeader);
}

/// State of an individual request: the request header, the connection to write the response to
/// and data attached by handlers.
pub struct Session<'a> {
    req_header: RequestHeader,
    request_line: String,
    client_addr: Option<SocketAddr>,
    writer: &'a mut (dyn AsyncWrite + Send + Unpin),
    response_filter: Option<&'a (dyn ResponseHeaderFilter + Sync)>,
    body_filter: Option<Box<dyn BodyFilter>>,
    response_written: Option<ResponseHeader>,
    send_body: bool,
    chunked: bool,
    finished: bool,
    keepalive: bool,
    bytes_sent: usize,
    body_bytes_sent: usize,
    captured_body: Option<BytesMut>,
    extensions: Extensions,
}

impl Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("req_header", &self.req_header)
            .field("client_addr", &self.client_addr)
            .field("response_written", &self.response_written)
            .field("keepalive", &self.keepalive)
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}

impl<'a> Session<'a> {
    /// Creates a new session for a request, the response will be written to `writer`.
    pub fn new(
        req_header: RequestHeader,
        client_addr: Option<SocketAddr>,
        writer: &'a mut (dyn AsyncWrite + Send + Unpin),
    ) -> Self {
        let request_line = req_header.request_line();
        let keepalive = req_header.wants_keepalive();
        Self {
            req_header,
            request_line,
            client_addr,
            writer,
            response_filter: None,
            body_filter: None,
            response_written: None,
            send_body: true,
            chunked: false,
            finished: false,
            keepalive,
            bytes_sent: 0,
            body_bytes_sent: 0,
            captured_body: None,
            extensions: Extensions::new(),
        }
    }

    /// Sets the filter to be applied to response headers before these are written.
    pub fn with_response_filter(mut self, filter: &'a (dyn ResponseHeaderFilter + Sync)) -> Self {
        self.response_filter = Some(filter);
        self
    }

    /// Overrides the request line as it will be logged. This is used for malformed requests
    /// where the request header had to be substituted.
    pub fn with_request_line(mut self, request_line: String) -> Self {
        self.request_line = request_line;
        self
    }

    /// Makes the session keep a copy of the response body, see [`Session::captured_body`].
    pub fn capture_body(&mut self) {
        self.captured_body = Some(BytesMut::new());
    }

    /// Response body sent so far if [`Session::capture_body`] was called.
    pub fn captured_body(&self) -> Option<&[u8]> {
        self.captured_body.as_deref()
    }

    /// The request header
    pub fn req_header(&self) -> &RequestHeader {
        &self.req_header
    }

    /// Mutable access to the request header
    pub fn req_header_mut(&mut self) -> &mut RequestHeader {
        &mut self.req_header
    }

    /// Original request line, e.g. `GET / HTTP/1.1`
    pub fn request_line(&self) -> &str {
        &self.request_line
    }

    /// Address of the client if known
    pub fn client_addr(&self) -> Option<&SocketAddr> {
        self.client_addr.as_ref()
    }

    /// User name from the `Authorization: Basic` request header if any
    pub fn remote_user(&self) -> Option<String> {
        let value = self
            .req_header
            .headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?;
        let (scheme, credentials) = value.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("basic") {
            return None;
        }
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(credentials.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (user, _) = decoded.split_once(':')?;
        Some(user.to_owned())
    }

    /// Data attached to the request by handlers
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// Mutable access to data attached to the request by handlers
    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Whether the connection can be reused after this request
    pub fn keepalive(&self) -> bool {
        self.keepalive
    }

    /// Prevents (`false`) or allows (`true`) connection reuse. Once the response header has been
    /// written, connection reuse can only be prevented.
    pub fn set_keepalive(&mut self, keepalive: bool) {
        if self.response_written.is_none() || !keepalive {
            self.keepalive = keepalive;
        }
    }

    /// Installs a filter that all response body data will be passed through.
    pub fn set_body_filter(&mut self, filter: Box<dyn BodyFilter>) {
        self.body_filter = Some(filter);
    }

    /// The response header if it has been written already
    pub fn response_written(&self) -> Option<&ResponseHeader> {
        self.response_written.as_ref()
    }

    /// `true` once the complete response has been written
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Total number of bytes sent to the client
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// Number of response body bytes sent to the client
    pub fn body_bytes_sent(&self) -> usize {
        self.body_bytes_sent
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), Box<Error>> {
        self.writer.write_all(data).await.map_err(|err| {
            Error::because(ErrorType::WriteError, "failed writing response", err)
        })?;
        self.bytes_sent += data.len();
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), Box<Error>> {
        self.finished = true;
        self.writer
            .flush()
            .await
            .map_err(|err| Error::because(ErrorType::WriteError, "failed flushing response", err))
    }

    /// Writes the response header to the client. Response header filters are applied first,
    /// then headers controlling the connection and body framing are added.
    pub async fn write_response_header(
        &mut self,
        resp: Box<ResponseHeader>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.response_written.is_some() {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response header written twice",
            ));
        }

        let mut resp = *resp;
        if let Some(filter) = self.response_filter {
            filter.filter_response_header(self, &mut resp);
        }

        self.send_body = self.req_header.method != Method::HEAD
            && !resp.status.is_informational()
            && resp.status != StatusCode::NO_CONTENT
            && resp.status != StatusCode::NOT_MODIFIED;

        if self.send_body && !resp.headers.contains_key(header::CONTENT_LENGTH) {
            if self.req_header.version == Version::HTTP_11 {
                resp.insert_header(header::TRANSFER_ENCODING, "chunked")?;
                self.chunked = true;
            } else {
                // Body delimited by closing the connection
                self.keepalive = false;
            }
        }

        resp.insert_header(header::SERVER, SERVER_NAME)?;
        resp.insert_header(header::DATE, fmt_http_date(SystemTime::now()))?;
        resp.insert_header(
            header::CONNECTION,
            if self.keepalive { "keep-alive" } else { "close" },
        )?;

        trace!("writing response header: {resp:?}");
        let bytes = resp.to_bytes();
        self.response_written = Some(resp);
        self.write(&bytes).await?;

        if end_of_stream {
            self.finish_body().await?;
        }
        Ok(())
    }

    /// Writes a chunk of the response body. `None` for `data` can be used to signal end of
    /// stream without sending more data.
    pub async fn write_response_body(
        &mut self,
        data: Option<Bytes>,
        end_of_stream: bool,
    ) -> Result<(), Box<Error>> {
        if self.response_written.is_none() {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response body written before header",
            ));
        }
        if self.finished {
            return Err(Error::explain(
                ErrorType::InternalError,
                "response body written after end of stream",
            ));
        }

        let data = match &mut self.body_filter {
            Some(filter) => filter.filter(data, end_of_stream)?,
            None => data.unwrap_or_default(),
        };

        if self.send_body && !data.is_empty() {
            if self.chunked {
                self.write(format!("{:x}\r\n", data.len()).as_bytes())
                    .await?;
                self.write(&data).await?;
                self.write(b"\r\n").await?;
            } else {
                self.write(&data).await?;
            }
            self.body_bytes_sent += data.len();
            if let Some(captured) = &mut self.captured_body {
                captured.extend_from_slice(&data);
            }
        }

        if end_of_stream {
            self.finish_body().await?;
        }
        Ok(())
    }

    async fn finish_body(&mut self) -> Result<(), Box<Error>> {
        if self.chunked && self.send_body {
            self.write(b"0\r\n\r\n").await?;
        }
        if let Some(ratio) = self.body_filter.as_ref().and_then(|filter| filter.ratio()) {
            self.extensions.insert(CompressionRatio(ratio));
        }
        self.finish().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn request(method: &str, version: Version) -> RequestHeader {
        RequestHeader::build(method, b"/file.txt?x=1", Some(version)).unwrap()
    }

    fn split_response(output: &[u8]) -> (String, Vec<u8>) {
        let output = output.to_vec();
        let pos = output
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .unwrap();
        (
            String::from_utf8(output[..pos + 4].to_vec()).unwrap(),
            output[pos + 4..].to_vec(),
        )
    }

    #[test]
    fn request_line() {
        assert_eq!(
            request("GET", Version::HTTP_11).request_line(),
            "GET /file.txt?x=1 HTTP/1.1"
        );
        assert_eq!(
            request("HEAD", Version::HTTP_10).request_line(),
            "HEAD /file.txt?x=1 HTTP/1.0"
        );
    }

    #[test]
    fn keepalive_defaults() {
        let mut header = request("GET", Version::HTTP_11);
        assert!(header.wants_keepalive());
        header.insert_header(header::CONNECTION, "Close").unwrap();
        assert!(!header.wants_keepalive());

        let mut header = request("GET", Version::HTTP_10);
        assert!(!header.wants_keepalive());
        header
            .insert_header(header::CONNECTION, "keep-alive")
            .unwrap();
        assert!(header.wants_keepalive());
    }

    #[test]
    fn remote_user() {
        let mut output = Vec::new();
        let mut header = request("GET", Version::HTTP_11);
        // me:secret
        header
            .insert_header(header::AUTHORIZATION, "Basic bWU6c2VjcmV0")
            .unwrap();
        let session = Session::new(header, None, &mut output);
        assert_eq!(session.remote_user().as_deref(), Some("me"));

        let mut output = Vec::new();
        let mut header = request("GET", Version::HTTP_11);
        header
            .insert_header(header::AUTHORIZATION, "Bearer abc")
            .unwrap();
        let session = Session::new(header, None, &mut output);
        assert_eq!(session.remote_user(), None);
    }

    #[test(tokio::test)]
    async fn content_length_response() {
        let mut output = Vec::new();
        let mut session = Session::new(request("GET", Version::HTTP_11), None, &mut output);
        let mut header = ResponseHeader::build(StatusCode::OK, None);
        header.insert_header(header::CONTENT_LENGTH, 4).unwrap();
        session
            .write_response_header(Box::new(header), false)
            .await
            .unwrap();
        session
            .write_response_body(Some("Hi!\n".into()), true)
            .await
            .unwrap();
        assert!(session.is_finished());
        assert_eq!(session.body_bytes_sent(), 4);
        assert!(session.keepalive());
        drop(session);

        let (head, body) = split_response(&output);
        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("content-length: 4\r\n"));
        assert!(head.contains("connection: keep-alive\r\n"));
        assert!(!head.contains("transfer-encoding"));
        assert_eq!(body, b"Hi!\n");
    }

    #[test(tokio::test)]
    async fn chunked_response() {
        let mut output = Vec::new();
        let mut session = Session::new(request("GET", Version::HTTP_11), None, &mut output);
        session
            .write_response_header(Box::new(ResponseHeader::build(StatusCode::OK, None)), false)
            .await
            .unwrap();
        session
            .write_response_body(Some("Hello, ".into()), false)
            .await
            .unwrap();
        session
            .write_response_body(Some("world!".into()), true)
            .await
            .unwrap();
        assert_eq!(session.body_bytes_sent(), 13);
        drop(session);

        let (head, body) = split_response(&output);
        assert!(head.contains("transfer-encoding: chunked\r\n"));
        assert_eq!(body, b"7\r\nHello, \r\n6\r\nworld!\r\n0\r\n\r\n");
    }

    #[test(tokio::test)]
    async fn unframed_http10_response_closes() {
        let mut output = Vec::new();
        let mut header = request("GET", Version::HTTP_10);
        header
            .insert_header(header::CONNECTION, "keep-alive")
            .unwrap();
        let mut session = Session::new(header, None, &mut output);
        session
            .write_response_header(Box::new(ResponseHeader::build(StatusCode::OK, None)), false)
            .await
            .unwrap();
        session
            .write_response_body(Some("data".into()), true)
            .await
            .unwrap();
        assert!(!session.keepalive());
        drop(session);

        let (head, body) = split_response(&output);
        assert!(head.contains("connection: close\r\n"));
        assert_eq!(body, b"data");
    }

    #[test(tokio::test)]
    async fn head_response_has_no_body() {
        let mut output = Vec::new();
        let mut session = Session::new(request("HEAD", Version::HTTP_11), None, &mut output);
        let mut header = ResponseHeader::build(StatusCode::OK, None);
        header.insert_header(header::CONTENT_LENGTH, 4).unwrap();
        session
            .write_response_header(Box::new(header), false)
            .await
            .unwrap();
        session
            .write_response_body(Some("Hi!\n".into()), true)
            .await
            .unwrap();
        assert_eq!(session.body_bytes_sent(), 0);
        drop(session);

        let (head, body) = split_response(&output);
        assert!(head.contains("content-length: 4\r\n"));
        assert!(body.is_empty());
    }

    #[test(tokio::test)]
    async fn header_written_twice() {
        let mut output = Vec::new();
        let mut session = Session::new(request("GET", Version::HTTP_11), None, &mut output);
        session
            .write_response_header(
                Box::new(ResponseHeader::build(StatusCode::NO_CONTENT, None)),
                true,
            )
            .await
            .unwrap();
        let result = session
            .write_response_header(Box::new(ResponseHeader::build(StatusCode::OK, None)), true)
            .await;
        assert_eq!(result.unwrap_err().etype, ErrorType::InternalError);
    }

    #[derive(Debug)]
    struct Uppercase;

    impl BodyFilter for Uppercase {
        fn filter(
            &mut self,
            data: Option<Bytes>,
            _end_of_stream: bool,
        ) -> Result<Bytes, Box<Error>> {
            Ok(data
                .map(|data| Bytes::from(data.to_ascii_uppercase()))
                .unwrap_or_default())
        }

        fn ratio(&self) -> Option<f32> {
            Some(1.0)
        }
    }

    #[test(tokio::test)]
    async fn body_filter() {
        let mut output = Vec::new();
        let mut session = Session::new(request("GET", Version::HTTP_11), None, &mut output);
        session.capture_body();
        session.set_body_filter(Box::new(Uppercase));
        session
            .write_response_header(Box::new(ResponseHeader::build(StatusCode::OK, None)), false)
            .await
            .unwrap();
        session
            .write_response_body(Some("abc".into()), false)
            .await
            .unwrap();
        session.write_response_body(None, true).await.unwrap();
        assert_eq!(session.captured_body(), Some(b"ABC".as_ref()));
        assert_eq!(
            session.extensions().get::<CompressionRatio>(),
            Some(&CompressionRatio(1.0))
        );
    }
}
