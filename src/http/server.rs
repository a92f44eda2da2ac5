//! HTTP server setup and request dispatch.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all dispatcher
//! - Wire up middleware (request ID, tracing, request body timeout)
//! - Route each request to the event stream, discovery or forwarding path
//! - Relay upstream responses: stream successes, capture error bodies
//! - Log and count every completed request
//!
//! # Design Decisions
//! - No route table beyond the two shortcut paths
//! - Error bodies are buffered up to `MAX_ERROR_BODY_BYTES` so they can be logged
//! - Success bodies are streamed without buffering

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    serve::ListenerExt,
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Method, Request, Response, StatusCode},
    Router,
};
use futures_util::{StreamExt, TryStreamExt};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::RequestBodyTimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::Signer;
use crate::config::{ProxyConfig, ValidationError};
use crate::http::discovery::{self, is_discovery_path};
use crate::http::event_stream::{self, is_event_stream_path};
use crate::http::forward::{ForwardSettings, Forwarder};
use crate::http::headers::{copy_headers, strip_hop_by_hop};
use crate::http::listener::IdleTimeoutListener;
use crate::http::transport::{HttpTransport, Transport};
use crate::http::X_REQUEST_ID;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;

/// Upper bound on the upstream error body captured for logging and replay.
pub const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Errors raised while assembling the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid proxy configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("failed to build upstream TLS configuration: {0}")]
    Tls(#[from] rustls::Error),
}

/// Application state injected into the dispatcher.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Forwarder,
    pub heartbeat_interval: Duration,
    /// Longest wait for the next chunk of an inbound request body.
    pub read_timeout: Duration,
    pub shutdown: Shutdown,
}

impl AppState {
    /// Build state with the production transport and wall-clock signer.
    pub fn from_config(config: &ProxyConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.upstream)?);
        let signer = Signer::new(config.auth.api_key.clone(), config.auth.api_secret.clone());
        Self::with_parts(config, signer, transport, shutdown)
    }

    /// Build state around an explicit signer and transport.
    pub fn with_parts(
        config: &ProxyConfig,
        signer: Signer,
        transport: Arc<dyn Transport>,
        shutdown: Shutdown,
    ) -> Result<Self, ServerError> {
        let settings = ForwardSettings::from_config(config)?;
        Ok(Self {
            forwarder: Forwarder::new(settings, signer, transport),
            heartbeat_interval: Duration::from_secs(config.event_stream.heartbeat_interval_secs),
            read_timeout: Duration::from_secs(config.listener.read_timeout_secs),
            shutdown,
        })
    }
}

/// HTTP server for the auth proxy.
pub struct HttpServer {
    router: Router,
    idle_timeout: Duration,
    shutdown: Shutdown,
}

impl HttpServer {
    /// Create a server that forwards through the pooled HTTP transport.
    pub fn new(config: &ProxyConfig, shutdown: Shutdown) -> Result<Self, ServerError> {
        let state = AppState::from_config(config, shutdown)?;
        let idle_timeout = Duration::from_secs(config.listener.idle_timeout_secs);
        Ok(Self::from_state(state, idle_timeout))
    }

    /// Create a server from prepared state.
    pub fn from_state(state: AppState, idle_timeout: Duration) -> Self {
        let shutdown = state.shutdown.clone();
        Self {
            router: build_router(state),
            idle_timeout,
            shutdown,
        }
    }

    /// Run the server until the shutdown signal fires and connections drain.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            idle_timeout_secs = self.idle_timeout.as_secs(),
            "HTTP server starting"
        );

        // No-op tap: axum only implements `Connected<SocketAddr>` for
        // `TcpListener` and `TapIo`-wrapped listeners.
        let listener = IdleTimeoutListener::new(listener, self.idle_timeout).tap_io(|_| {});
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(self.shutdown.cancelled_owned())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
pub fn build_router(state: AppState) -> Router {
    let read_timeout = state.read_timeout;
    Router::new()
        .fallback(dispatch)
        .with_state(state)
        .layer(RequestBodyTimeoutLayer::new(read_timeout))
        .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid))
}

/// Per-request fields shared by every log line.
struct RequestLog {
    request_id: String,
    method: Method,
    path: String,
    start: Instant,
}

impl RequestLog {
    fn duration_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn record(&self, status: StatusCode, outcome: &str) {
        metrics::record_request(self.method.as_str(), status.as_u16(), outcome, self.start);
    }
}

/// Main dispatcher. Classifies the request and answers it.
async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response<Body> {
    let log = RequestLog {
        request_id: request
            .headers()
            .get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string(),
        method: request.method().clone(),
        path: request.uri().path().to_string(),
        start: Instant::now(),
    };
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    tracing::debug!(
        request_id = %log.request_id,
        method = %log.method,
        path = %log.path,
        remote_addr = ?client_addr,
        "Dispatching request"
    );

    // 1. Local event stream
    if log.method == Method::GET && is_event_stream_path(&log.path) {
        tracing::info!(request_id = %log.request_id, path = %log.path, "Serving local event stream");
        log.record(StatusCode::OK, "event_stream");
        return event_stream::respond(state.heartbeat_interval, state.shutdown.child_token());
    }

    // 2. Discovery lookup
    if log.method == Method::GET && is_discovery_path(&log.path) {
        tracing::debug!(
            request_id = %log.request_id,
            path = %log.path,
            "Discovery metadata not available; returning 404"
        );
        log.record(StatusCode::NOT_FOUND, "discovery");
        return discovery::not_found();
    }

    // 3. Forward upstream
    match state.forwarder.forward(request, client_addr).await {
        Ok(response) => relay(response, log).await,
        Err(err) => {
            let status = err.status();
            tracing::error!(
                request_id = %log.request_id,
                method = %log.method,
                path = %log.path,
                status = status.as_u16(),
                kind = err.kind(),
                error = %err,
                duration_ms = log.duration_ms(),
                "Request failed"
            );
            log.record(status, err.kind());
            status_response(status)
        }
    }
}

/// Relay an upstream response to the client.
async fn relay(response: Response<Body>, log: RequestLog) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    let status = parts.status;

    let body = if status.as_u16() >= 400 {
        let (captured, read_err) = capture_body(body, MAX_ERROR_BODY_BYTES).await;
        match read_err {
            Some(err) => tracing::error!(
                request_id = %log.request_id,
                status = status.as_u16(),
                error = %err,
                "Failed to read upstream error body"
            ),
            None => tracing::warn!(
                request_id = %log.request_id,
                status = status.as_u16(),
                upstream_body = %String::from_utf8_lossy(&captured),
                "Upstream returned error"
            ),
        }
        // The replayed body may be shorter than what the upstream declared.
        parts.headers.remove(header::CONTENT_LENGTH);
        Body::from(captured)
    } else {
        let request_id = log.request_id.clone();
        let path = log.path.clone();
        let stream = body.into_data_stream().inspect_err(move |err| {
            tracing::error!(
                request_id = %request_id,
                path = %path,
                error = %err,
                "Stream response failed"
            );
        });
        Body::from_stream(stream)
    };

    strip_hop_by_hop(&mut parts.headers);

    let mut relayed = Response::new(body);
    *relayed.status_mut() = status;
    copy_headers(relayed.headers_mut(), &parts.headers);

    tracing::info!(
        request_id = %log.request_id,
        method = %log.method,
        path = %log.path,
        status = status.as_u16(),
        duration_ms = log.duration_ms(),
        "Request proxied"
    );
    log.record(
        status,
        if status.as_u16() >= 400 { "upstream_error" } else { "proxied" },
    );

    relayed
}

/// Read at most `limit` bytes of `body`.
///
/// Returns whatever was captured plus the read error, if one cut it short.
async fn capture_body(body: Body, limit: usize) -> (Bytes, Option<axum::Error>) {
    let mut stream = body.into_data_stream();
    let mut captured = Vec::new();

    while captured.len() < limit {
        match stream.next().await {
            Some(Ok(chunk)) => {
                let take = chunk.len().min(limit - captured.len());
                captured.extend_from_slice(&chunk[..take]);
            }
            Some(Err(err)) => return (Bytes::from(captured), Some(err)),
            None => break,
        }
    }

    (Bytes::from(captured), None)
}

/// Status-only plain-text response, e.g. `Bad Gateway`.
fn status_response(status: StatusCode) -> Response<Body> {
    let text = format!("{}\n", status.canonical_reason().unwrap_or("Error"));
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn test_capture_body_within_limit() {
        let body = Body::from("upstream-error");
        let (captured, err) = capture_body(body, MAX_ERROR_BODY_BYTES).await;
        assert_eq!(&captured[..], b"upstream-error");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_capture_body_truncates_across_chunks() {
        let chunks = vec![
            Ok::<_, std::io::Error>(Bytes::from(vec![b'a'; 6])),
            Ok(Bytes::from(vec![b'b'; 6])),
            Ok(Bytes::from(vec![b'c'; 6])),
        ];
        let body = Body::from_stream(stream::iter(chunks));
        let (captured, err) = capture_body(body, 10).await;
        assert_eq!(&captured[..], b"aaaaaabbbb");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn test_capture_body_keeps_bytes_before_error() {
        let chunks = vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::other("reset")),
        ];
        let body = Body::from_stream(stream::iter(chunks));
        let (captured, err) = capture_body(body, MAX_ERROR_BODY_BYTES).await;
        assert_eq!(&captured[..], b"partial");
        assert!(err.is_some());
    }

    #[test]
    fn test_status_response() {
        let response = status_response(StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
