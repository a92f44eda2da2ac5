//! Request forwarding to the upstream.
//!
//! # Responsibilities
//! - Capture the inbound body
//! - Rewrite the target URL and headers
//! - Attach the session header and HMAC signature
//! - Perform a single upstream call bounded by the request timeout
//! - Classify failures into gateway-timeout vs bad-gateway
//!
//! # Design Decisions
//! - No retries: one failure is terminal for the request
//! - Dropping the returned future (client disconnect) cancels the upstream call
//! - Error variants carry their cause; `status()` maps them to a status code

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderName, HeaderValue, Request, Response, StatusCode, Uri};
use thiserror::Error;
use url::Url;

use crate::auth::{SignError, Signer};
use crate::config::{ProxyConfig, ValidationError};
use crate::http::headers::{augment_forwarded, copy_headers, strip_hop_by_hop};
use crate::http::target::{host_header, resolve_target};
use crate::http::transport::{BoxError, Transport, TransportError};

/// Failure of a single forwarding attempt.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("read request body: {0}")]
    ReadBody(#[source] axum::Error),

    #[error("build upstream request: {0}")]
    BuildRequest(#[from] axum::http::Error),

    #[error("sign request: {0}")]
    Sign(#[from] SignError),

    #[error("upstream timed out: {0}")]
    Timeout(#[source] BoxError),

    #[error("perform upstream request: {0}")]
    Upstream(#[source] BoxError),
}

impl ForwardError {
    /// Status code reported to the client for this failure.
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ForwardError::ReadBody(_) => "read_body",
            ForwardError::BuildRequest(_) => "build_request",
            ForwardError::Sign(_) => "sign",
            ForwardError::Timeout(_) => "timeout",
            ForwardError::Upstream(_) => "upstream",
        }
    }
}

impl From<TransportError> for ForwardError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout(cause) => ForwardError::Timeout(cause),
            TransportError::Failed(cause) => ForwardError::Upstream(cause),
        }
    }
}

/// Validated, request-independent forwarding settings.
#[derive(Debug, Clone)]
pub struct ForwardSettings {
    /// Upstream base URL requests are resolved against.
    pub base_url: Url,
    /// Static session header, when a session value is configured.
    pub session: Option<(HeaderName, HeaderValue)>,
    /// Deadline for the upstream call.
    pub request_timeout: Duration,
}

impl ForwardSettings {
    /// Derive forwarding settings from the proxy configuration.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, ValidationError> {
        let base_url = config.upstream.base_url()?;
        let session = config.auth.session_header()?;
        Ok(Self {
            base_url,
            session,
            request_timeout: Duration::from_secs(config.upstream.request_timeout_secs),
        })
    }
}

/// Forwards inbound requests to the upstream, one attempt each.
#[derive(Clone)]
pub struct Forwarder {
    settings: ForwardSettings,
    signer: Signer,
    transport: Arc<dyn Transport>,
}

impl Forwarder {
    pub fn new(settings: ForwardSettings, signer: Signer, transport: Arc<dyn Transport>) -> Self {
        Self {
            settings,
            signer,
            transport,
        }
    }

    /// Forward `request` upstream and return the raw upstream response.
    pub async fn forward(
        &self,
        request: Request<Body>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<Body>, ForwardError> {
        let (parts, body) = request.into_parts();

        // 1. Capture body
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(ForwardError::ReadBody)?;

        // 2. Resolve target
        let target = resolve_target(&self.settings.base_url, parts.uri.path(), parts.uri.query())?;

        // 3. Rewrite headers
        let mut outbound = Request::builder()
            .method(parts.method.clone())
            .uri(target.clone())
            .body(body)?;

        let headers = outbound.headers_mut();
        copy_headers(headers, &parts.headers);
        strip_hop_by_hop(headers);
        augment_forwarded(headers, &parts.headers, &parts.uri, client_addr);

        if let Some((name, value)) = &self.settings.session {
            headers.insert(name.clone(), value.clone());
        }

        headers.remove(header::HOST);
        if let Some(host) = host_header(&target) {
            headers.insert(header::HOST, host);
        }

        // 4. Sign
        let signed_path = signing_path(&target);
        self.signer
            .attach(outbound.headers_mut(), &parts.method, &signed_path)?;

        tracing::debug!(
            method = %parts.method,
            target = %target,
            "Forwarding request upstream"
        );

        // 5. Single upstream attempt
        match tokio::time::timeout(self.settings.request_timeout, self.transport.send(outbound)).await {
            Ok(result) => Ok(result?),
            Err(elapsed) => Err(ForwardError::Timeout(Box::new(elapsed))),
        }
    }
}

/// The path component that gets signed: the decoded target path.
fn signing_path(target: &Uri) -> String {
    let raw = target.path();
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
