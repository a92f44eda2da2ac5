//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, Method, Request, Response, StatusCode, Uri};
use axum::Router;
use chrono::DateTime;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use mcp_auth_proxy::auth::{FixedClock, Signer};
use mcp_auth_proxy::http::{build_router, AppState, HttpServer, Transport, TransportError};
use mcp_auth_proxy::{ProxyConfig, Shutdown};

pub const API_KEY: &str = "key-id";
pub const API_SECRET: &str = "secret-value";
pub const SESSION_VALUE: &str = "session-123";

/// 2023-11-14T22:13:20Z
pub const FIXED_TIMESTAMP: i64 = 1_700_000_000;

/// Minimal valid configuration pointing at `upstream_url`.
pub fn test_config(upstream_url: &str) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.upstream.url = upstream_url.to_string();
    config.upstream.request_timeout_secs = 2;
    config.auth.api_key = API_KEY.to_string();
    config.auth.api_secret = API_SECRET.to_string();
    config.auth.session_value = SESSION_VALUE.to_string();
    config
}

/// Signer whose clock is frozen at [`FIXED_TIMESTAMP`].
pub fn fixed_signer() -> Signer {
    let now = DateTime::from_timestamp(FIXED_TIMESTAMP, 0).expect("valid timestamp");
    Signer::with_clock(API_KEY, API_SECRET, Arc::new(FixedClock(now)))
}

/// A request as seen by a mock upstream.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

enum Reply {
    Respond {
        status: StatusCode,
        headers: Vec<(HeaderName, &'static str)>,
        body: Bytes,
    },
    Fail,
    TimeOut,
    Hang,
}

/// In-process transport that records every call and answers from a script.
pub struct MockTransport {
    reply: Reply,
    calls: Mutex<Vec<Captured>>,
}

impl MockTransport {
    fn with_reply(reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            reply,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn respond(status: StatusCode, body: impl Into<Bytes>) -> Arc<Self> {
        Self::respond_with_headers(status, Vec::new(), body)
    }

    pub fn respond_with_headers(
        status: StatusCode,
        headers: Vec<(HeaderName, &'static str)>,
        body: impl Into<Bytes>,
    ) -> Arc<Self> {
        Self::with_reply(Reply::Respond {
            status,
            headers,
            body: body.into(),
        })
    }

    /// Fails like a refused connection.
    pub fn failing() -> Arc<Self> {
        Self::with_reply(Reply::Fail)
    }

    /// Fails like a client-side timeout.
    pub fn timing_out() -> Arc<Self> {
        Self::with_reply(Reply::TimeOut)
    }

    /// Never answers.
    pub fn hanging() -> Arc<Self> {
        Self::with_reply(Reply::Hang)
    }

    pub fn calls(&self) -> Vec<Captured> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError> {
        let (parts, body) = request.into_parts();
        self.calls.lock().unwrap().push(Captured {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        });

        match &self.reply {
            Reply::Respond {
                status,
                headers,
                body,
            } => {
                let mut builder = Response::builder().status(*status);
                for (name, value) in headers {
                    builder = builder.header(name.clone(), *value);
                }
                Ok(builder.body(Body::from(body.clone())).unwrap())
            }
            Reply::Fail => Err(TransportError::Failed(
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused")
                    .into(),
            )),
            Reply::TimeOut => Err(TransportError::Timeout("operation timed out".into())),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// Router backed by `transport` and the fixed-clock signer.
pub fn router_with(config: &ProxyConfig, transport: Arc<MockTransport>) -> Router {
    let state = AppState::with_parts(config, fixed_signer(), transport, Shutdown::new())
        .expect("valid test config");
    build_router(state)
}

pub type CaptureLog = Arc<Mutex<Vec<Captured>>>;

/// Start a real HTTP upstream that records requests and answers with `status` and `body`.
pub async fn start_upstream(status: StatusCode, body: &'static str) -> (SocketAddr, CaptureLog) {
    let log: CaptureLog = Arc::new(Mutex::new(Vec::new()));

    async fn record(
        State((log, status, body)): State<(CaptureLog, StatusCode, &'static str)>,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        payload: Bytes,
    ) -> (StatusCode, &'static str) {
        log.lock().unwrap().push(Captured {
            method,
            uri,
            headers,
            body: payload,
        });
        (status, body)
    }

    let app = Router::new()
        .fallback(record)
        .with_state((log.clone(), status, body));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, log)
}

/// A running proxy bound to an ephemeral port.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl RunningProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the proxy with its production transport and signer.
pub async fn start_proxy(config: &ProxyConfig) -> RunningProxy {
    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, shutdown.clone()).expect("valid test config");

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(server.run(listener));

    RunningProxy {
        addr,
        shutdown,
        handle,
    }
}

/// An address nothing is listening on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Run a future with a deadline so a hung test fails instead of blocking.
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("test step timed out")
}
