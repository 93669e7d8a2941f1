//! Forwarding to a live upstream and rewriting its response

mod common;

use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::{StubResolver, http_response, serve, serve_hanging};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use vitrine_common::{Context, VitrineError};
use vitrine_core::{ExhibitProxy, ProxyRequest, Rewriter};

fn proxy(address: String, timeout: Duration) -> ExhibitProxy {
    ExhibitProxy::new(
        Arc::new(StubResolver::new(address)),
        Rewriter::new("localhost", 8080),
        timeout,
    )
    .unwrap()
}

fn gzip(body: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body).unwrap();
    encoder.finish().unwrap()
}

fn gunzip(body: &[u8]) -> String {
    let mut plain = String::new();
    GzDecoder::new(body).read_to_string(&mut plain).unwrap();
    plain
}

fn get(path: &str, headers: &[(&str, &str)]) -> ProxyRequest {
    ProxyRequest {
        method: "GET".to_string(),
        path: path.to_string(),
        query: None,
        headers: headers
            .iter()
            .map(|(n, v)| (n.to_string(), v.as_bytes().to_vec()))
            .collect(),
        body: Bytes::new(),
    }
}

#[tokio::test]
async fn test_plain_body_is_rewritten() {
    let body = b"<a href=\"http://localhost:8080/about\">about</a>";
    let (addr, mut requests) = serve(http_response(
        "200 OK",
        &[("content-type", "text/html"), ("x-upstream", "yes")],
        body,
    ))
    .await;

    let mut request = get("app/page", &[("X-Custom", "1"), ("Connection", "keep-alive")]);
    request.query = Some("x=1".to_string());
    let response = proxy(addr.to_string(), Duration::from_secs(5))
        .forward(&Context::new(), "e1", request)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.body.as_ref(),
        b"<a href=\"http://localhost:8080/exhibit/e1/about\">about</a>"
    );
    assert_eq!(response.header("x-upstream"), Some(&b"yes"[..]));
    assert_eq!(response.header("content-type"), Some(&b"text/html"[..]));
    assert!(response.header("connection").is_none());
    assert!(response.header("content-length").is_none());

    let head = requests.recv().await.unwrap().to_ascii_lowercase();
    assert!(head.starts_with("get /app/page?x=1 http/1.1"));
    assert!(head.contains("x-custom: 1"));
    assert!(!head.contains("keep-alive"));
}

#[tokio::test]
async fn test_gzip_body_is_rewritten() {
    let body = gzip(b"api at http://localhost:8080/api");
    let (addr, mut requests) = serve(http_response(
        "200 OK",
        &[("content-encoding", "gzip")],
        &body,
    ))
    .await;

    let response = proxy(addr.to_string(), Duration::from_secs(5))
        .forward(
            &Context::new(),
            "e1",
            get("", &[("Accept-Encoding", "gzip, deflate, br")]),
        )
        .await
        .unwrap();

    assert_eq!(response.header("content-encoding"), Some(&b"gzip"[..]));
    assert_eq!(gunzip(&response.body), "api at http://localhost:8080/exhibit/e1/api");

    let head = requests.recv().await.unwrap().to_ascii_lowercase();
    assert!(head.contains("accept-encoding: gzip\r\n"));
}

#[tokio::test]
async fn test_redirect_location_is_rewritten() {
    let (addr, _requests) = serve(http_response(
        "302 Found",
        &[("location", "/login")],
        b"",
    ))
    .await;

    let response = proxy(addr.to_string(), Duration::from_secs(5))
        .forward(&Context::new(), "e1", get("admin", &[]))
        .await
        .unwrap();

    assert_eq!(response.status, 302);
    assert_eq!(response.header("location"), Some(&b"/exhibit/e1/login"[..]));
}

#[tokio::test]
async fn test_hanging_upstream_times_out() {
    let addr = serve_hanging().await;

    let result = proxy(addr.to_string(), Duration::from_millis(200))
        .forward(&Context::new(), "e1", get("", &[]))
        .await;

    assert!(matches!(result, Err(VitrineError::Timeout(_))));
}

#[tokio::test]
async fn test_unreachable_upstream_is_transient() {
    let port = common::closed_port().await;

    let result = proxy(format!("127.0.0.1:{}", port), Duration::from_secs(5))
        .forward(&Context::new(), "e1", get("", &[]))
        .await;

    assert!(matches!(result, Err(VitrineError::Transient(_))));
}
