//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;

use axum::http::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::validation::ValidationError;

/// Root configuration for the auth proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream endpoint and client tuning.
    pub upstream: UpstreamConfig,

    /// Signing credentials and session header.
    pub auth: AuthConfig,

    /// Local event stream settings.
    pub event_stream: EventStreamConfig,

    /// Startup/shutdown settings.
    pub lifecycle: LifecycleConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Longest gap allowed between chunks of an inbound request body, in seconds.
    pub read_timeout_secs: u64,

    /// Connections with no traffic in either direction are closed after this many seconds.
    pub idle_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            read_timeout_secs: 30,
            idle_timeout_secs: 120,
        }
    }
}

/// Upstream server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Absolute base URL of the upstream (scheme://host[:port][/path]).
    pub url: String,

    /// Skip TLS certificate verification. Development only.
    pub insecure_skip_verify: bool,

    /// Total time allowed for one upstream exchange, in seconds.
    pub request_timeout_secs: u64,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Idle pooled connections are closed after this many seconds.
    pub pool_idle_timeout_secs: u64,

    /// Maximum idle pooled connections kept per upstream host.
    pub pool_max_idle_per_host: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            insecure_skip_verify: false,
            request_timeout_secs: 15,
            connect_timeout_secs: 30,
            pool_idle_timeout_secs: 90,
            pool_max_idle_per_host: 100,
        }
    }
}

impl UpstreamConfig {
    /// Parse and check the upstream base URL.
    pub fn base_url(&self) -> Result<Url, ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::MissingUpstream);
        }

        let invalid = |reason: &str| ValidationError::InvalidUpstream {
            url: self.url.clone(),
            reason: reason.to_string(),
        };

        let url = Url::parse(self.url.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        if url.host_str().is_none() {
            return Err(invalid("missing host"));
        }
        Ok(url)
    }
}

/// Signing credentials and the optional static session header.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Key identifier sent as `x-api-key-id`.
    pub api_key: String,

    /// Shared HMAC secret.
    pub api_secret: String,

    /// Name of the session header injected on every request.
    pub session_header: String,

    /// Session value; the header is only sent when this is non-empty.
    pub session_value: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            session_header: "x-session-id".to_string(),
            session_value: String::new(),
        }
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("session_header", &self.session_header)
            .field("session_value", &self.session_value)
            .finish()
    }
}

impl AuthConfig {
    /// The session header pair, or `None` when no session value is set.
    pub fn session_header(&self) -> Result<Option<(HeaderName, HeaderValue)>, ValidationError> {
        if self.session_value.is_empty() {
            return Ok(None);
        }

        let name = HeaderName::from_bytes(self.session_header.as_bytes())
            .map_err(|_| ValidationError::InvalidSessionHeader(self.session_header.clone()))?;
        let value = HeaderValue::from_str(&self.session_value)
            .map_err(|_| ValidationError::InvalidSessionValue)?;
        Ok(Some((name, value)))
    }
}

/// Local event stream configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EventStreamConfig {
    /// Seconds between keep-alive comments.
    pub heartbeat_interval_secs: u64,
}

impl Default for EventStreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 25,
        }
    }
}

/// Process lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Time allowed for in-flight requests to finish after a shutdown signal.
    pub graceful_shutdown_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            graceful_shutdown_secs: 10,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output for development.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
