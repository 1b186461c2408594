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

use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use bytes::Bytes;
use http::{header, StatusCode};
use lantern_module_utils::{
    chain_handlers, Error, FromYaml, RequestFilter, RequestFilterResult, RequestHeader,
    ResponseHeader, Session,
};
use serde::Deserialize;
use startup_module::DefaultApp;
use std::path::PathBuf;
use test_log::test;

use crate::CommonLogHandler;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ResponderConf {
    response_text: String,
}

#[derive(Debug)]
struct Responder {
    response_text: String,
}

impl TryFrom<ResponderConf> for Responder {
    type Error = Box<Error>;

    fn try_from(conf: ResponderConf) -> Result<Self, Self::Error> {
        Ok(Self {
            response_text: conf.response_text,
        })
    }
}

#[async_trait]
impl RequestFilter for Responder {
    type Conf = ResponderConf;
    type CTX = ();

    fn new_ctx() -> Self::CTX {}

    async fn request_filter(
        &self,
        session: &mut Session<'_>,
        _ctx: &mut Self::CTX,
    ) -> Result<RequestFilterResult, Box<Error>> {
        if session.req_header().uri.path() == "/missing" {
            return Ok(RequestFilterResult::Unhandled);
        }

        let mut header = ResponseHeader::build(StatusCode::OK, None);
        header.insert_header(header::CONTENT_TYPE, "text/plain")?;
        header.insert_header(header::CONTENT_LENGTH, self.response_text.len())?;
        session.write_response_header(Box::new(header), false).await?;
        session
            .write_response_body(Some(Bytes::from(self.response_text.clone())), true)
            .await?;
        Ok(RequestFilterResult::ResponseSent)
    }
}

chain_handlers! {
    struct Handler {
        log: CommonLogHandler,
        responder: Responder,
    }
}

fn log_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "lantern-access-{}-{name}.log",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn make_app(log_file: &PathBuf, log_format: Option<&str>) -> DefaultApp<Handler> {
    let mut conf = format!("log_file: {log_file:?}\nresponse_text: Hello\n");
    if let Some(log_format) = log_format {
        conf.push_str(&format!("log_format: '{log_format}'\n"));
    }
    let conf = <Handler as RequestFilter>::Conf::from_yaml(&conf).unwrap();
    DefaultApp::<Handler>::from_conf(conf).unwrap()
}

async fn read_log(app: &DefaultApp<Handler>, log_file: &PathBuf) -> Vec<String> {
    app.handler().log.flush().await;
    let contents = std::fs::read_to_string(log_file).unwrap_or_default();
    let _ = std::fs::remove_file(log_file);
    contents.lines().map(ToOwned::to_owned).collect()
}

fn request(path: &str, headers: &[(&'static str, &str)]) -> RequestHeader {
    let mut header = RequestHeader::build("GET", path.as_bytes(), None).unwrap();
    for (name, value) in headers {
        header.insert_header(*name, *value).unwrap();
    }
    header
}

#[test(tokio::test)]
async fn default_format() {
    let log_file = log_path("default_format");
    let app = make_app(&log_file, None);

    let result = app
        .handle_request_from(
            request(
                "/hello?x=1",
                &[
                    ("Referer", "https://example.com/"),
                    ("User-Agent", "test \"agent\""),
                ],
            ),
            Some("127.0.0.1:1234".parse().unwrap()),
        )
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));

    let lines = read_log(&app, &log_file).await;
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert!(line.starts_with("127.0.0.1 - - ["), "{line}");
    assert!(
        line.contains(
            "] \"GET /hello?x=1 HTTP/1.1\" 200 5 \"https://example.com/\" \"test \\x22agent\\x22\" \"-\" \"-\" \""
        ),
        "{line}"
    );
    assert!(line.ends_with('"'), "{line}");
}

#[test(tokio::test)]
async fn custom_format() {
    let log_file = log_path("custom_format");
    let app = make_app(
        &log_file,
        Some("$remote_user|$status|$sent_http_content_type|$sent_http_etag|$http_x_missing"),
    );

    let credentials = format!("Basic {}", BASE64_STANDARD.encode("user:secret"));
    app.handle_request(request("/", &[("Authorization", credentials.as_str())]))
        .await;
    app.handle_request(request("/missing", &[])).await;

    let lines = read_log(&app, &log_file).await;
    assert_eq!(
        lines,
        vec![
            "user|200|text/plain|-|-".to_owned(),
            "-|404|text/html; charset=utf-8|-|-".to_owned(),
        ]
    );
}

#[test(tokio::test)]
async fn sizes() {
    let log_file = log_path("sizes");
    let app = make_app(&log_file, Some("$body_bytes_sent $bytes_sent"));

    app.handle_request(request("/", &[])).await;

    let lines = read_log(&app, &log_file).await;
    assert_eq!(lines.len(), 1);
    let (body, total) = lines[0].split_once(' ').unwrap();
    assert_eq!(body, "5");
    assert!(total.parse::<usize>().unwrap() > 5);
}

#[test(tokio::test)]
async fn malformed_request() {
    let log_file = log_path("malformed_request");
    let app = make_app(&log_file, Some("\"$request\" $status"));

    let mut output = Vec::new();
    let err = app
        .handle_malformed("BREW /pot HTCPCP/1.0".to_owned(), None, &mut output)
        .await;
    assert!(err.is_some());
    assert!(output.starts_with(b"HTTP/1.1 400"));

    let lines = read_log(&app, &log_file).await;
    assert_eq!(lines, vec!["\"BREW /pot HTCPCP/1.0\" 400".to_owned()]);
}

#[test(tokio::test)]
async fn disabled() {
    let log_file = PathBuf::new();
    let app = make_app(&log_file, None);
    assert!(!app.handler().log.enabled());

    let result = app.handle_request(request("/", &[])).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
}

#[test(tokio::test)]
async fn reopening() {
    let log_file = log_path("reopening");
    let app = make_app(&log_file, Some("$request"));

    app.handle_request(request("/first", &[])).await;
    app.handler().log.flush().await;

    // Simulate log rotation
    let rotated = log_file.with_extension("log.1");
    std::fs::rename(&log_file, &rotated).unwrap();
    crate::writer::send(crate::writer::WriterMessage::Reopen).await;

    app.handle_request(request("/second", &[])).await;

    let lines = read_log(&app, &log_file).await;
    assert_eq!(lines, vec!["GET /second HTTP/1.1".to_owned()]);

    let rotated_contents = std::fs::read_to_string(&rotated).unwrap();
    let _ = std::fs::remove_file(&rotated);
    assert_eq!(rotated_contents, "GET /first HTTP/1.1\n");
}

#[test]
fn record_accessors() {
    let mut request_headers = http::HeaderMap::new();
    request_headers.insert(header::REFERER, "https://example.com/".parse().unwrap());
    request_headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

    let record = crate::AccessRecord {
        remote_addr: None,
        remote_user: None,
        time: std::time::SystemTime::now(),
        request: String::new(),
        status: None,
        bytes_sent: 0,
        body_bytes_sent: 0,
        compression_ratio: None,
        request_time: std::time::Duration::ZERO,
        request_headers,
        response_headers: http::HeaderMap::new(),
    };
    assert_eq!(record.referer(), Some(b"https://example.com/".as_slice()));
    assert_eq!(record.user_agent(), None);
    assert_eq!(record.forwarded_for(), Some(b"10.0.0.1".as_slice()));
}
