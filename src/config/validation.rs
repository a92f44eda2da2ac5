//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate the upstream URL, credentials and session header
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Every problem is collected so one startup failure reports them all
//! - No I/O here; the loader calls this after the env overlay and before
//!   anything is bound or connected

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream url is required")]
    MissingUpstream,

    #[error("invalid upstream url {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("api key is required")]
    MissingApiKey,

    #[error("api secret is required")]
    MissingApiSecret,

    #[error("invalid session header name {0:?}")]
    InvalidSessionHeader(String),

    #[error("invalid session header value")]
    InvalidSessionValue,

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("listener.idle_timeout_secs ({idle}) must exceed event_stream.heartbeat_interval_secs ({heartbeat})")]
    IdleTimeoutTooShort { idle: u64, heartbeat: u64 },

    #[error("invalid log level {0:?}")]
    InvalidLogLevel(String),

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("invalid metrics address {0:?}")]
    InvalidMetricsAddress(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Check `config`, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if let Err(e) = config.upstream.base_url() {
        errors.push(e);
    }

    if config.auth.api_key.is_empty() {
        errors.push(ValidationError::MissingApiKey);
    }
    if config.auth.api_secret.is_empty() {
        errors.push(ValidationError::MissingApiSecret);
    }
    if let Err(e) = config.auth.session_header() {
        errors.push(e);
    }

    let positive = [
        ("listener.read_timeout_secs", config.listener.read_timeout_secs),
        ("listener.idle_timeout_secs", config.listener.idle_timeout_secs),
        ("upstream.request_timeout_secs", config.upstream.request_timeout_secs),
        ("upstream.connect_timeout_secs", config.upstream.connect_timeout_secs),
        ("event_stream.heartbeat_interval_secs", config.event_stream.heartbeat_interval_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    // Heartbeats are the only traffic on an idle event stream.
    let idle = config.listener.idle_timeout_secs;
    let heartbeat = config.event_stream.heartbeat_interval_secs;
    if idle > 0 && heartbeat > 0 && idle <= heartbeat {
        errors.push(ValidationError::IdleTimeoutTooShort { idle, heartbeat });
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::InvalidLogLevel(
            config.observability.log_level.clone(),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
