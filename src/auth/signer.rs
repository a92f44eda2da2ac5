//! HMAC request signing.
//!
//! # Responsibilities
//! - Build the canonical signing string `METHOD\nPATH\nTIMESTAMP`
//! - Compute HMAC-SHA256 over it with the shared secret
//! - Produce the `x-api-key-id`, `x-signature` and `x-timestamp` headers
//!
//! # Design Decisions
//! - The clock is injected so signatures are reproducible in tests
//! - Only the path is signed, never the query string
//! - Missing credentials fail the request, never the process

use std::fmt;
use std::sync::Arc;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the configured key identifier.
pub const HEADER_API_KEY: HeaderName = HeaderName::from_static("x-api-key-id");
/// Header carrying the hex-encoded HMAC digest.
pub const HEADER_SIGNATURE: HeaderName = HeaderName::from_static("x-signature");
/// Header carrying the signing timestamp.
pub const HEADER_TIMESTAMP: HeaderName = HeaderName::from_static("x-timestamp");

/// Errors raised while signing a single request.
#[derive(Debug, Error)]
pub enum SignError {
    #[error("signer key and secret must be set")]
    MissingCredentials,

    #[error("invalid HMAC key")]
    InvalidKey,

    #[error("signature header value is not valid: {0}")]
    InvalidHeaderValue(#[from] axum::http::header::InvalidHeaderValue),
}

/// Source of "now" for the signer.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock UTC time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock frozen at a single instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The three authentication header values for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeaders {
    pub api_key_id: String,
    pub signature: String,
    pub timestamp: String,
}

impl SignatureHeaders {
    /// Set the headers on `headers`, replacing any existing values.
    pub fn apply(&self, headers: &mut HeaderMap) -> Result<(), SignError> {
        // Convert all three first so a bad value leaves the map untouched.
        let api_key = HeaderValue::from_str(&self.api_key_id)?;
        let signature = HeaderValue::from_str(&self.signature)?;
        let timestamp = HeaderValue::from_str(&self.timestamp)?;

        headers.insert(HEADER_API_KEY, api_key);
        headers.insert(HEADER_SIGNATURE, signature);
        headers.insert(HEADER_TIMESTAMP, timestamp);
        Ok(())
    }
}

/// Injects HMAC auth headers compatible with the upstream gateway.
#[derive(Clone)]
pub struct Signer {
    key: String,
    secret: String,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Signer {
    /// Create a signer that stamps requests with the wall clock.
    pub fn new(key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self::with_clock(key, secret, Arc::new(SystemClock))
    }

    /// Create a signer with an explicit time source.
    pub fn with_clock(
        key: impl Into<String>,
        secret: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            key: key.into(),
            secret: secret.into(),
            clock,
        }
    }

    /// Compute the signature headers for `method` and `path`.
    pub fn sign(&self, method: &Method, path: &str) -> Result<SignatureHeaders, SignError> {
        if self.key.is_empty() || self.secret.is_empty() {
            return Err(SignError::MissingCredentials);
        }

        let timestamp = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let payload = canonical_string(method.as_str(), path, &timestamp);

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignError::InvalidKey)?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(SignatureHeaders {
            api_key_id: self.key.clone(),
            signature,
            timestamp,
        })
    }

    /// Sign and set the auth headers on `headers`.
    pub fn attach(
        &self,
        headers: &mut HeaderMap,
        method: &Method,
        path: &str,
    ) -> Result<(), SignError> {
        self.sign(method, path)?.apply(headers)
    }
}

fn canonical_string(method: &str, path: &str, timestamp: &str) -> String {
    [method, path, timestamp].join("\n")
}
