//! HTTP livecheck against real sockets

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{StubResolver, closed_port, http_response, serve};
use vitrine_common::model::{Exhibit, Livecheck as LivecheckConfig, LivecheckKind, Object};
use vitrine_common::{Context, VitrineError};
use vitrine_core::{CheckOutcome, HttpLivecheck, Livecheck};

fn fixture(port: u16, config: &[(&str, &str)]) -> (Exhibit, Object) {
    let object = Object {
        name: "web".to_string(),
        image: "nginx".to_string(),
        port: Some(port.to_string()),
        livecheck: Some(LivecheckConfig {
            kind: LivecheckKind::Http,
            config: config
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }),
        ..Default::default()
    };
    let exhibit = Exhibit {
        id: "e1".to_string(),
        name: "blog".to_string(),
        expose: "web".to_string(),
        objects: vec![object.clone()],
        ..Default::default()
    };
    (exhibit, object)
}

fn livecheck() -> HttpLivecheck {
    HttpLivecheck::new(
        Arc::new(StubResolver::new("127.0.0.1:0")),
        Duration::from_millis(500),
    )
    .unwrap()
}

#[tokio::test]
async fn test_matching_status_is_ready() {
    let (addr, mut requests) = serve(http_response("200 OK", &[], b"ok")).await;
    let (exhibit, object) = fixture(addr.port(), &[("path", "health")]);

    let outcome = livecheck()
        .check(&Context::new(), &exhibit, &object)
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::Ready);
    assert!(requests.recv().await.unwrap().starts_with("GET /health HTTP/1.1"));
}

#[tokio::test]
async fn test_custom_method_and_status() {
    let (addr, mut requests) = serve(http_response("204 No Content", &[], b"")).await;
    let (exhibit, object) = fixture(addr.port(), &[("method", "post"), ("status", "204")]);

    let outcome = livecheck()
        .check(&Context::new(), &exhibit, &object)
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::Ready);
    assert!(requests.recv().await.unwrap().starts_with("POST / HTTP/1.1"));
}

#[tokio::test]
async fn test_unexpected_status_is_retry() {
    let (addr, _requests) = serve(http_response("503 Service Unavailable", &[], b"")).await;
    let (exhibit, object) = fixture(addr.port(), &[]);

    let outcome = livecheck()
        .check(&Context::new(), &exhibit, &object)
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::Retry);
}

#[tokio::test]
async fn test_refused_connection_is_retry() {
    let (exhibit, object) = fixture(closed_port().await, &[]);

    let outcome = livecheck()
        .check(&Context::new(), &exhibit, &object)
        .await
        .unwrap();

    assert_eq!(outcome, CheckOutcome::Retry);
}

#[tokio::test]
async fn test_malformed_status_is_fatal() {
    let (exhibit, object) = fixture(80, &[("status", "ok")]);

    let result = livecheck().check(&Context::new(), &exhibit, &object).await;

    assert!(matches!(result, Err(VitrineError::Fatal(_))));
}

#[tokio::test]
async fn test_cancelled_context_aborts_check() {
    let (exhibit, object) = fixture(closed_port().await, &[]);
    let ctx = Context::new();
    ctx.cancel();

    let result = livecheck().check(&ctx, &exhibit, &object).await;

    assert!(matches!(result, Err(VitrineError::Cancelled)));
}
