//! Dispatch tests: the full router driven in-process against a mock transport.

mod common;

use std::net::SocketAddr;

use axum::body::{to_bytes, Body, Bytes};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderName, Method, Request, Response, StatusCode};
use futures_util::{stream, StreamExt};
use tower::ServiceExt;

use common::{router_with, test_config, MockTransport, API_KEY, SESSION_VALUE};
use mcp_auth_proxy::auth::{HEADER_API_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
use mcp_auth_proxy::http::MAX_ERROR_BODY_BYTES;

const UPSTREAM: &str = "https://upstream.example.com";

async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX).await.unwrap().to_vec()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_discovery_lookup_answered_locally() {
    let transport = MockTransport::respond(StatusCode::OK, "should not be called");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let response = app
        .oneshot(get("/.well-known/oauth-authorization-server/foo"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_bytes(response).await, b"404 page not found\n");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_discovery_path_forwarded_for_other_methods() {
    let transport = MockTransport::respond(StatusCode::OK, "ok");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/.well-known/oauth-authorization-server")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_event_stream_served_locally() {
    let transport = MockTransport::respond(StatusCode::OK, "should not be called");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let response = app.oneshot(get("/mcp/")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

    let mut frames = response.into_body().into_data_stream();
    let first = common::within(frames.next()).await.unwrap().unwrap();
    assert_eq!(&first[..], b":ok\n\n");
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_post_mcp_forwarded_with_signature() {
    let transport = MockTransport::respond(StatusCode::OK, "upstream-ok");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"upstream-ok");

    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    let sent = &calls[0];
    assert_eq!(sent.method, Method::POST);
    assert_eq!(sent.uri.to_string(), "https://upstream.example.com/mcp");
    assert_eq!(&sent.body[..], br#"{"jsonrpc":"2.0","method":"ping","id":1}"#);
    assert_eq!(sent.headers[HEADER_API_KEY], API_KEY);
    assert_eq!(sent.headers[HEADER_TIMESTAMP], "2023-11-14T22:13:20Z");
    assert_eq!(
        sent.headers[HEADER_SIGNATURE],
        "9734646032f19f65659e0b9b7b7567c0803a925a31df7b5f2529bc2d9a626b18"
    );
    assert_eq!(sent.headers["x-session-id"], SESSION_VALUE);
    assert_eq!(sent.headers[header::HOST], "upstream.example.com");
}

#[tokio::test]
async fn test_forwarded_for_uses_peer_address() {
    let transport = MockTransport::respond(StatusCode::OK, "ok");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let peer: SocketAddr = "10.1.2.3:55000".parse().unwrap();
    let mut request = Request::builder()
        .uri("/tools")
        .header("x-forwarded-for", "192.0.2.7")
        .body(Body::empty())
        .unwrap();
    request.extensions_mut().insert(ConnectInfo(peer));

    app.oneshot(request).await.unwrap();

    let sent = &transport.calls()[0];
    assert_eq!(sent.headers["x-forwarded-for"], "192.0.2.7, 10.1.2.3");
    assert_eq!(sent.headers["x-forwarded-proto"], "http");
}

#[tokio::test]
async fn test_upstream_error_body_relayed() {
    let transport = MockTransport::respond(StatusCode::UNAUTHORIZED, "invalid signature");
    let app = router_with(&test_config(UPSTREAM), transport);

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_bytes(response).await, b"invalid signature");
}

#[tokio::test]
async fn test_oversized_error_body_truncated() {
    let transport = MockTransport::respond_with_headers(
        StatusCode::INTERNAL_SERVER_ERROR,
        vec![(header::CONTENT_LENGTH, "102400")],
        vec![b'x'; 100 * 1024],
    );
    let app = router_with(&test_config(UPSTREAM), transport);

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(
        response.headers().get(header::CONTENT_LENGTH).map(|v| v.as_bytes()),
        Some(&b"102400"[..])
    );
    assert_eq!(body_bytes(response).await.len(), MAX_ERROR_BODY_BYTES);
}

#[tokio::test]
async fn test_response_hop_by_hop_headers_stripped() {
    let transport = MockTransport::respond_with_headers(
        StatusCode::OK,
        vec![
            (header::CONNECTION, "close"),
            (HeaderName::from_static("keep-alive"), "timeout=5"),
            (HeaderName::from_static("x-upstream"), "yes"),
            (header::CONTENT_TYPE, "application/json"),
        ],
        "{}",
    );
    let app = router_with(&test_config(UPSTREAM), transport);

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONNECTION).is_none());
    assert!(response.headers().get("keep-alive").is_none());
    assert_eq!(response.headers()["x-upstream"], "yes");
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    assert_eq!(body_bytes(response).await, b"{}");
}

#[tokio::test]
async fn test_transport_failure_returns_bad_gateway() {
    let transport = MockTransport::failing();
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_bytes(response).await, b"Bad Gateway\n");
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_transport_timeout_returns_gateway_timeout() {
    let transport = MockTransport::timing_out();
    let app = router_with(&test_config(UPSTREAM), transport);

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body_bytes(response).await, b"Gateway Timeout\n");
}

#[tokio::test(start_paused = true)]
async fn test_hung_upstream_hits_request_deadline() {
    let transport = MockTransport::hanging();
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_request_body_ends_request() {
    let transport = MockTransport::respond(StatusCode::OK, "should not be called");
    let mut config = test_config(UPSTREAM);
    config.listener.read_timeout_secs = 1;
    let app = router_with(&config, transport.clone());

    // One chunk, then the client goes quiet without finishing the body.
    let body = Body::from_stream(
        stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"{")) })
            .chain(stream::pending()),
    );
    let request = Request::builder()
        .method(Method::POST)
        .uri("/mcp")
        .body(body)
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_server_error_not_retried() {
    let transport = MockTransport::respond(StatusCode::SERVICE_UNAVAILABLE, "busy");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let response = app.oneshot(get("/tools")).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test]
async fn test_request_id_generated_and_echoed() {
    let transport = MockTransport::respond(StatusCode::OK, "ok");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let response = app.oneshot(get("/tools")).await.unwrap();

    let generated = response.headers()["x-request-id"].clone();
    assert!(!generated.is_empty());
    assert_eq!(transport.calls()[0].headers["x-request-id"], generated);
}

#[tokio::test]
async fn test_client_request_id_preserved() {
    let transport = MockTransport::respond(StatusCode::OK, "ok");
    let app = router_with(&test_config(UPSTREAM), transport.clone());

    let request = Request::builder()
        .uri("/tools")
        .header("x-request-id", "client-chosen-id")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "client-chosen-id");
    assert_eq!(transport.calls()[0].headers["x-request-id"], "client-chosen-id");
}
