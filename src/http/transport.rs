//! Outbound transport to the upstream.
//!
//! # Responsibilities
//! - Perform exactly one HTTP exchange per call
//! - Keep a warm connection pool shared by every request task
//! - Report timeouts distinctly from other transport failures
//!
//! # Design Decisions
//! - `Transport` is a trait object so tests can count and script upstream calls
//! - The hyper client never re-parses the request URI, so the path goes out byte for byte
//! - Redirects are never followed; the upstream answer is relayed as-is
//! - Response bodies are streamed under the same deadline as the headers

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{Request, Response};
use futures_util::{stream, StreamExt};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tokio::time::Instant;

use crate::config::UpstreamConfig;

/// Boxed error cause retained for logging.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Transport-level failure of an upstream call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream timed out: {0}")]
    Timeout(#[source] BoxError),

    #[error("upstream request failed: {0}")]
    Failed(#[source] BoxError),
}

/// A capability for sending one request upstream.
///
/// Implementations must be safe for unbounded concurrent callers.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError>;
}

/// Pooled HTTP(S) transport backed by the hyper legacy client.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Build the shared client from upstream settings.
    pub fn new(config: &UpstreamConfig) -> Result<Self, rustls::Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let tls = if config.insecure_skip_verify {
            tracing::warn!("Upstream TLS certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
                .with_no_client_auth()
        } else {
            let roots = RootCertStore {
                roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
            };
            builder.with_root_certificates(roots).with_no_client_auth()
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(config.connect_timeout_secs)));
        http.set_keepalive(Some(Duration::from_secs(30)));

        let https = HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build(https);

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request<Bytes>) -> Result<Response<Body>, TransportError> {
        let deadline = Instant::now() + self.request_timeout;
        let request = request.map(Body::from);

        let upstream = match tokio::time::timeout_at(deadline, self.client.request(request)).await {
            Ok(result) => result.map_err(classify)?,
            Err(elapsed) => return Err(TransportError::Timeout(Box::new(elapsed))),
        };

        // Only status and headers carry over; the client-facing version is the server's own.
        let (parts, body) = upstream.into_parts();
        let mut response = Response::new(with_deadline(Body::new(body), deadline));
        *response.status_mut() = parts.status;
        *response.headers_mut() = parts.headers;
        Ok(response)
    }
}

/// End the body with a `TimedOut` error once `deadline` passes.
fn with_deadline(body: Body, deadline: Instant) -> Body {
    let frames = stream::unfold(Some(body.into_data_stream()), move |state| async move {
        let mut data = state?;
        match tokio::time::timeout_at(deadline, data.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(data))),
            Ok(Some(Err(err))) => Some((Err(io::Error::other(err)), None)),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "upstream response deadline exceeded",
                )),
                None,
            )),
        }
    });
    Body::from_stream(frames)
}

fn classify(err: hyper_util::client::legacy::Error) -> TransportError {
    if caused_by_timeout(&err) {
        TransportError::Timeout(Box::new(err))
    } else {
        TransportError::Failed(Box::new(err))
    }
}

/// Whether any error in the source chain is an I/O timeout.
fn caused_by_timeout(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(io) = err.downcast_ref::<io::Error>() {
            if io.kind() == io::ErrorKind::TimedOut {
                return true;
            }
        }
        current = err.source();
    }
    false
}

/// Certificate verifier for `insecure_skip_verify`. Handshake signatures are still checked.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
