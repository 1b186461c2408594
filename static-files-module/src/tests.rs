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

use crate::handler::StaticFilesHandler;

use compression_module::CompressionHandler;
use flate2::read::GzDecoder;
use http::{header, StatusCode};
use lantern_module_utils::extensions::CompressionRatio;
use lantern_module_utils::standard_response::response_text;
use lantern_module_utils::{chain_handlers, ErrorType, FromYaml, RequestFilter, RequestHeader};
use locations_module::LocationsHandler;
use startup_module::{AppResult, DefaultApp};
use std::io::Read;
use std::path::PathBuf;
use test_log::test;

chain_handlers! {
    struct Handler {
        locations: LocationsHandler,
        compression: CompressionHandler,
        static_files: StaticFilesHandler,
    }
}

const LOCATIONS: &str = r#"
locations:
- suffix: .png
  expires: 1h
- prefix: /
  expires: 10s
  autoindex: true
  autoindex_format: json
"#;

fn root_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("testdata");
    path.push("root");
    if !filename.is_empty() {
        path.push(filename);
    }
    path
}

fn default_conf() -> String {
    format!("root: {}", root_path("").to_str().unwrap())
}

fn extended_conf(conf_str: impl AsRef<str>) -> String {
    format!("{}\n{}", default_conf(), conf_str.as_ref())
}

fn make_app(conf_str: impl AsRef<str>) -> DefaultApp<Handler> {
    DefaultApp::new(
        <Handler as RequestFilter>::Conf::from_yaml(conf_str.as_ref())
            .unwrap()
            .try_into()
            .unwrap(),
    )
}

fn request(method: &str, path: &str, headers: &[(&str, &str)]) -> RequestHeader {
    let mut header = RequestHeader::build(method, path.as_bytes(), None).unwrap();
    for (name, value) in headers {
        header.append_header(*name, *value).unwrap();
    }
    header
}

fn get(path: &str) -> RequestHeader {
    request("GET", path, &[])
}

fn response_header<'a>(result: &'a AppResult, name: header::HeaderName) -> Option<&'a str> {
    result
        .header()
        .unwrap()
        .headers
        .get(name)
        .map(|value| value.to_str().unwrap())
}

fn gunzip(data: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    GzDecoder::new(data).read_to_end(&mut decoded).unwrap();
    decoded
}

#[test(tokio::test)]
async fn image_not_compressed() {
    let app = make_app(extended_conf(LOCATIONS));

    let result = app
        .handle_request(request("GET", "/logo.png", &[("Accept-Encoding", "gzip")]))
        .await;
    assert!(result.err().is_none());
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("image/png"));
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("5000"));
    assert_eq!(response_header(&result, header::CACHE_CONTROL), Some("max-age=3600"));
    assert!(response_header(&result, header::EXPIRES).is_some());
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), None);
    assert_eq!(result.body(), std::fs::read(root_path("logo.png")).unwrap());
}

#[test(tokio::test)]
async fn json_compressed() {
    let app = make_app(extended_conf(LOCATIONS));

    let result = app
        .handle_request(request("GET", "/data.json", &[("Accept-Encoding", "gzip")]))
        .await;
    assert!(result.err().is_none());
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("application/json"));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), Some("gzip"));
    assert_eq!(response_header(&result, header::CACHE_CONTROL), Some("max-age=10"));
    assert_eq!(response_header(&result, header::VARY), Some("Accept-Encoding"));
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), None);
    assert_eq!(response_header(&result, header::ACCEPT_RANGES), None);
    assert!(response_header(&result, header::ETAG).unwrap().starts_with("W/\""));

    let original = std::fs::read(root_path("data.json")).unwrap();
    assert!(result.body().len() < original.len());
    assert_eq!(gunzip(result.body()), original);

    let ratio = result.extensions().get::<CompressionRatio>().unwrap();
    assert!(ratio.0 > 1.0);

    // Same response for the same file
    let again = app
        .handle_request(request("GET", "/data.json", &[("Accept-Encoding", "gzip")]))
        .await;
    assert_eq!(gunzip(again.body()), original);
}

#[test(tokio::test)]
async fn repeated_requests_identical() {
    let app = make_app(extended_conf(LOCATIONS));

    let stable_headers = |result: &AppResult| {
        let mut headers = result.header().unwrap().headers.clone();
        headers.remove(header::DATE);
        headers.remove(header::EXPIRES);
        headers
    };

    for path in ["/data.json", "/file.txt", "/logo.png"] {
        for headers in [&[][..], &[("Accept-Encoding", "gzip")][..]] {
            let first = app.handle_request(request("GET", path, headers)).await;
            let second = app.handle_request(request("GET", path, headers)).await;
            assert!(first.err().is_none());
            assert_eq!(first.status(), Some(StatusCode::OK));
            assert_eq!(first.status(), second.status());
            assert_eq!(stable_headers(&first), stable_headers(&second));
            assert!(!first.body().is_empty());
            assert_eq!(first.body(), second.body());
        }
    }
}

#[test(tokio::test)]
async fn json_listing() {
    let app = make_app(extended_conf(LOCATIONS));

    let result = app.handle_request(get("/reports/")).await;
    assert!(result.err().is_none());
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("application/json"));
    assert_eq!(response_header(&result, header::CACHE_CONTROL), Some("max-age=10"));
    assert_eq!(
        response_header(&result, header::CONTENT_LENGTH),
        Some(result.body().len().to_string().as_str())
    );

    let entries: Vec<serde_json::Value> = serde_json::from_slice(result.body()).unwrap();
    let names = entries
        .iter()
        .map(|entry| {
            (
                entry["name"].as_str().unwrap(),
                entry["type"].as_str().unwrap(),
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![("a.txt", "file"), ("b.txt", "file"), ("sub", "directory")]
    );
    assert_eq!(entries[0]["size"], 2);
    assert!(httpdate::parse_http_date(entries[0]["modified_time"].as_str().unwrap()).is_ok());
}

#[test(tokio::test)]
async fn html_listing() {
    let app = make_app(extended_conf(
        "locations: [{prefix: /, autoindex: true, autoindex_format: html}]",
    ));

    let result = app.handle_request(get("/reports/")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(
        response_header(&result, header::CONTENT_TYPE),
        Some("text/html; charset=utf-8")
    );
    let body = result.body_str();
    assert!(body.contains(r#"<a href="a.txt">a.txt</a>"#));
    assert!(body.contains(r#"<a href="sub/">sub/</a>"#));
    assert!(!body.contains(".hidden"));
}

#[test(tokio::test)]
async fn hidden_listing() {
    let app = make_app(extended_conf(
        "locations: [{prefix: /, autoindex: true, autoindex_format: json, autoindex_hidden: true}]",
    ));

    let result = app.handle_request(get("/reports/")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    let entries: Vec<serde_json::Value> = serde_json::from_slice(result.body()).unwrap();
    let names = entries
        .iter()
        .map(|entry| entry["name"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(names, vec![".hidden", "a.txt", "b.txt", "sub"]);
    assert_eq!(entries[0]["size"], 7);
}

#[test(tokio::test)]
async fn listing_disabled() {
    let app = make_app(default_conf());

    let result = app.handle_request(get("/reports/")).await;
    assert!(result.err().is_none());
    assert_eq!(result.status(), Some(StatusCode::FORBIDDEN));
    assert_eq!(result.body_str(), response_text(StatusCode::FORBIDDEN));
}

#[test(tokio::test)]
async fn escaping_root() {
    let app = make_app(extended_conf(LOCATIONS));

    for path in ["/../../etc/passwd", "/reports/%2E%2E/%2E%2E/etc/passwd", "/a%2F..%2F..%2Fetc"] {
        let result = app.handle_request(get(path)).await;
        assert_eq!(result.status(), Some(StatusCode::NOT_FOUND), "{path}");
        assert_eq!(result.body_str(), response_text(StatusCode::NOT_FOUND));
        assert_eq!(response_header(&result, header::CACHE_CONTROL), None);
    }
}

#[test(tokio::test)]
async fn missing_file() {
    let app = make_app(default_conf());

    let result = app.handle_request(get("/missing.txt")).await;
    assert!(result.err().is_none());
    assert_eq!(result.status(), Some(StatusCode::NOT_FOUND));

    let result = app.handle_request(get("/file.txt/missing")).await;
    assert_eq!(result.status(), Some(StatusCode::NOT_FOUND));
}

#[test(tokio::test)]
async fn dir_index() {
    let app = make_app(extended_conf(LOCATIONS));

    let result = app.handle_request(get("/")).await;
    assert!(result.err().is_none());
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("text/html"));
    assert_eq!(result.body_str(), "<html>Hi!</html>\n");

    let app = make_app(extended_conf("index_file: [missing.html]\n".to_owned() + LOCATIONS));
    let result = app.handle_request(get("/")).await;
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("application/json"));
}

#[test(tokio::test)]
async fn canonical_redirects() {
    let app = make_app(extended_conf(LOCATIONS));

    for (path, location) in [
        ("/reports", "/reports/"),
        ("/reports?x=1", "/reports/?x=1"),
        ("/file%2Etxt", "/file.txt"),
        ("/.//reports/../file.txt?file%2Etxt", "/file.txt?file%2Etxt"),
    ] {
        let result = app.handle_request(get(path)).await;
        assert_eq!(result.status(), Some(StatusCode::MOVED_PERMANENTLY), "{path}");
        assert_eq!(response_header(&result, header::LOCATION), Some(location));
        assert_eq!(result.body_str(), response_text(StatusCode::MOVED_PERMANENTLY));
    }

    let app = make_app(extended_conf("canonicalize_uri: false\n".to_owned() + LOCATIONS));
    let result = app.handle_request(get("/reports")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    let result = app.handle_request(get("/file%2Etxt")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(result.body_str(), "Hi!\n");
}

#[test(tokio::test)]
async fn encoded_names() {
    let app = make_app(default_conf());

    let result = app.handle_request(get("/subdir/with%20space.txt")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(result.body_str(), "Hi!\n");
}

#[test(tokio::test)]
async fn methods() {
    let app = make_app(default_conf());

    for method in ["POST", "PUT", "DELETE"] {
        let result = app.handle_request(request(method, "/file.txt", &[])).await;
        assert!(result.err().is_none());
        assert_eq!(result.status(), Some(StatusCode::METHOD_NOT_ALLOWED), "{method}");
    }

    let result = app.handle_request(request("HEAD", "/file.txt", &[])).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("4"));
    assert!(result.body().is_empty());
}

#[test(tokio::test)]
async fn file_headers() {
    let app = make_app(default_conf());

    let result = app.handle_request(get("/file.txt")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("text/plain"));
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("4"));
    assert_eq!(response_header(&result, header::ACCEPT_RANGES), Some("bytes"));
    assert!(response_header(&result, header::LAST_MODIFIED).is_some());
    assert!(response_header(&result, header::ETAG).unwrap().starts_with('"'));
    assert_eq!(response_header(&result, header::VARY), None);
    assert_eq!(result.body_str(), "Hi!\n");

    let app = make_app(extended_conf(
        "mime_types: {txt: text/x-custom}\ndefault_type: text/x-unknown",
    ));
    let result = app.handle_request(get("/file.txt")).await;
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("text/x-custom"));
}

#[test(tokio::test)]
async fn conditional_requests() {
    let app = make_app(default_conf());

    let result = app.handle_request(get("/file.txt")).await;
    let etag = response_header(&result, header::ETAG).unwrap().to_owned();
    let modified = response_header(&result, header::LAST_MODIFIED).unwrap().to_owned();

    let result = app
        .handle_request(request("GET", "/file.txt", &[("If-None-Match", &etag)]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::NOT_MODIFIED));
    assert_eq!(response_header(&result, header::ETAG), Some(etag.as_str()));
    assert!(result.body().is_empty());

    let result = app
        .handle_request(request("GET", "/file.txt", &[("If-Modified-Since", &modified)]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::NOT_MODIFIED));

    let result = app
        .handle_request(request(
            "GET",
            "/file.txt",
            &[("If-Modified-Since", "Thu, 01 Jan 1970 00:00:00 GMT")],
        ))
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));

    let result = app
        .handle_request(request("GET", "/file.txt", &[("If-Match", "\"xyz\"")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::PRECONDITION_FAILED));
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("0"));

    let result = app
        .handle_request(request("GET", "/file.txt", &[("If-Match", &etag)]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));
}

#[test(tokio::test)]
async fn ranges() {
    let app = make_app(extended_conf(LOCATIONS));

    let result = app
        .handle_request(request("GET", "/file.txt", &[("Range", "bytes=0-1")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::PARTIAL_CONTENT));
    assert_eq!(response_header(&result, header::CONTENT_RANGE), Some("bytes 0-1/4"));
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("2"));
    assert_eq!(result.body_str(), "Hi");

    let result = app
        .handle_request(request("GET", "/file.txt", &[("Range", "bytes=10-")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::RANGE_NOT_SATISFIABLE));
    assert_eq!(response_header(&result, header::CONTENT_RANGE), Some("bytes */4"));
    assert!(result.body().is_empty());

    // Partial responses are never compressed
    let result = app
        .handle_request(request(
            "GET",
            "/large.txt",
            &[("Range", "bytes=100-1199"), ("Accept-Encoding", "gzip")],
        ))
        .await;
    assert_eq!(result.status(), Some(StatusCode::PARTIAL_CONTENT));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), None);
    assert_eq!(result.body().len(), 1100);
    assert!(result.body_str().starts_with("0123456789"));
}

#[test(tokio::test)]
async fn small_files_not_compressed() {
    let app = make_app(extended_conf(LOCATIONS));

    let result = app
        .handle_request(request("GET", "/file.txt", &[("Accept-Encoding", "gzip, deflate")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), None);
    assert_eq!(result.body_str(), "Hi!\n");
    assert!(result.extensions().get::<CompressionRatio>().is_none());
}

#[test(tokio::test)]
async fn expired_not_compressed() {
    let app = make_app(extended_conf("locations: [{prefix: /, expires: -1}]"));

    let result = app
        .handle_request(request("GET", "/data.json", &[("Accept-Encoding", "gzip")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CACHE_CONTROL), Some("no-cache"));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), None);
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("50000"));
}

#[test(tokio::test)]
async fn precompressed() {
    let app = make_app(extended_conf("precompressed: [gz]"));

    let result = app
        .handle_request(request("GET", "/large.txt", &[("Accept-Encoding", "gzip")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("text/plain"));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), Some("gzip"));
    assert_eq!(response_header(&result, header::VARY), Some("Accept-Encoding"));
    assert_eq!(
        result.body(),
        std::fs::read(root_path("large.txt.gz")).unwrap()
    );
    assert_eq!(
        gunzip(result.body()),
        std::fs::read(root_path("large.txt")).unwrap()
    );

    // Client without gzip support gets the original file
    let result = app.handle_request(get("/large.txt")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), None);
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), Some("100001"));
    assert_eq!(response_header(&result, header::VARY), Some("Accept-Encoding"));
}

#[test(tokio::test)]
async fn compressed_only() {
    let app = make_app(extended_conf("precompressed: [gz]"));
    let expected = std::fs::read(root_path("").join("..").join("archive.txt")).unwrap();

    let result = app
        .handle_request(request("GET", "/archive.txt", &[("Accept-Encoding", "gzip")]))
        .await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), Some("gzip"));
    assert_eq!(gunzip(result.body()), expected);

    // Decompressed for clients without gzip support
    let result = app.handle_request(get("/archive.txt")).await;
    assert_eq!(result.status(), Some(StatusCode::OK));
    assert_eq!(response_header(&result, header::CONTENT_TYPE), Some("text/plain"));
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), None);
    assert_eq!(response_header(&result, header::CONTENT_LENGTH), None);
    assert_eq!(result.body(), expected);

    // No decompression if disabled
    let app = make_app(extended_conf("precompressed: [gz]\ndecompress: false"));
    let result = app.handle_request(get("/archive.txt")).await;
    assert_eq!(response_header(&result, header::CONTENT_ENCODING), Some("gzip"));

    // Compressed files aren't considered without precompressed setting
    let app = make_app(default_conf());
    let result = app.handle_request(get("/archive.txt")).await;
    assert_eq!(result.status(), Some(StatusCode::NOT_FOUND));
}

#[test(tokio::test)]
async fn unconfigured() {
    let app = make_app("");

    let result = app.handle_request(get("/file.txt")).await;
    assert_eq!(
        result.err().as_ref().map(|err| err.etype),
        Some(ErrorType::HTTPStatus(404))
    );
    assert_eq!(result.status(), Some(StatusCode::NOT_FOUND));
}

#[test]
fn invalid_root() {
    let conf = <Handler as RequestFilter>::Conf::from_yaml(&format!(
        "root: {}",
        root_path("missing").to_str().unwrap()
    ))
    .unwrap();
    let err = Handler::try_from(conf).unwrap_err();
    assert_eq!(err.etype, ErrorType::InvalidConfiguration);

    let conf = <Handler as RequestFilter>::Conf::from_yaml(&format!(
        "root: {}",
        root_path("file.txt").to_str().unwrap()
    ))
    .unwrap();
    let err = Handler::try_from(conf).unwrap_err();
    assert_eq!(err.etype, ErrorType::InvalidConfiguration);
}
