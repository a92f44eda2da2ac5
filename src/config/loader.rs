//! Configuration loading from disk and the environment.
//!
//! Precedence, lowest to highest: built-in defaults, the optional TOML file,
//! then `MCP_*` environment variables.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::config::schema::{LogFormat, ProxyConfig};
use crate::config::validation::{validate_config, ValidationError};

pub const ENV_LISTEN_ADDR: &str = "MCP_LISTEN_ADDR";
pub const ENV_SERVER_READ_TIMEOUT: &str = "MCP_SERVER_READ_TIMEOUT";
pub const ENV_SERVER_IDLE_TIMEOUT: &str = "MCP_SERVER_IDLE_TIMEOUT";
pub const ENV_UPSTREAM_URL: &str = "MCP_UPSTREAM_URL";
pub const ENV_API_KEY: &str = "MCP_API_KEY";
pub const ENV_API_SECRET: &str = "MCP_API_SECRET";
pub const ENV_SESSION_HEADER: &str = "MCP_SESSION_HEADER";
pub const ENV_SESSION_VALUE: &str = "MCP_SESSION_VALUE";
pub const ENV_REQUEST_TIMEOUT: &str = "MCP_REQUEST_TIMEOUT";
pub const ENV_UPSTREAM_INSECURE: &str = "MCP_UPSTREAM_INSECURE";
pub const ENV_LOG_LEVEL: &str = "MCP_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "MCP_LOG_FORMAT";
pub const ENV_GRACEFUL_SHUTDOWN: &str = "MCP_GRACEFUL_SHUTDOWN";
pub const ENV_HEARTBEAT_INTERVAL: &str = "MCP_HEARTBEAT_INTERVAL";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from an optional TOML file and the process environment.
pub fn load_config(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    load_config_with(path, |key| std::env::var(key).ok())
}

/// Same as [`load_config`] with an injectable environment lookup.
pub fn load_config_with<F>(path: Option<&Path>, env: F) -> Result<ProxyConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => ProxyConfig::default(),
    };

    apply_env(&mut config, env)?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay `MCP_*` variables onto `config`.
///
/// Values are trimmed; unset and empty variables leave the field untouched.
pub fn apply_env<F>(config: &mut ProxyConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        env(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    if let Some(v) = get(ENV_LISTEN_ADDR) {
        config.listener.bind_address = v;
    }
    if let Some(v) = get(ENV_SERVER_READ_TIMEOUT) {
        config.listener.read_timeout_secs = parse_secs(ENV_SERVER_READ_TIMEOUT, &v)?;
    }
    if let Some(v) = get(ENV_SERVER_IDLE_TIMEOUT) {
        config.listener.idle_timeout_secs = parse_secs(ENV_SERVER_IDLE_TIMEOUT, &v)?;
    }
    if let Some(v) = get(ENV_UPSTREAM_URL) {
        config.upstream.url = v;
    }
    if let Some(v) = get(ENV_API_KEY) {
        config.auth.api_key = v;
    }
    if let Some(v) = get(ENV_API_SECRET) {
        config.auth.api_secret = v;
    }
    if let Some(v) = get(ENV_SESSION_HEADER) {
        config.auth.session_header = v;
    }
    if let Some(v) = get(ENV_SESSION_VALUE) {
        config.auth.session_value = v;
    }
    if let Some(v) = get(ENV_REQUEST_TIMEOUT) {
        config.upstream.request_timeout_secs = parse_secs(ENV_REQUEST_TIMEOUT, &v)?;
    }
    if let Some(v) = get(ENV_UPSTREAM_INSECURE) {
        config.upstream.insecure_skip_verify = parse_bool(ENV_UPSTREAM_INSECURE, &v)?;
    }
    if let Some(v) = get(ENV_LOG_LEVEL) {
        config.observability.log_level = v.to_ascii_lowercase();
    }
    if let Some(v) = get(ENV_LOG_FORMAT) {
        config.observability.log_format = match v.to_ascii_lowercase().as_str() {
            "pretty" => LogFormat::Pretty,
            "json" => LogFormat::Json,
            _ => return Err(invalid(ENV_LOG_FORMAT, &v)),
        };
    }
    if let Some(v) = get(ENV_GRACEFUL_SHUTDOWN) {
        config.lifecycle.graceful_shutdown_secs = parse_secs(ENV_GRACEFUL_SHUTDOWN, &v)?;
    }
    if let Some(v) = get(ENV_HEARTBEAT_INTERVAL) {
        config.event_stream.heartbeat_interval_secs = parse_secs(ENV_HEARTBEAT_INTERVAL, &v)?;
    }

    Ok(())
}

fn invalid(key: &'static str, value: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    }
}

/// Whole seconds, rounding sub-second remainders up.
fn parse_secs(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    let duration = parse_duration(value).ok_or_else(|| invalid(key, value))?;
    Ok(duration.as_secs() + u64::from(duration.subsec_nanos() > 0))
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(invalid(key, value)),
    }
}

/// Parse `15`, `15s`, `500ms`, `2m` or compound forms like `1m30s`.
///
/// A bare integer is taken as seconds.
pub fn parse_duration(value: &str) -> Option<Duration> {
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = value;
    while !rest.is_empty() {
        let number_end = rest.find(|c: char| !(c.is_ascii_digit() || c == '.'))?;
        if number_end == 0 {
            return None;
        }
        let number: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            _ => return None,
        };
        total = total.checked_add(Duration::try_from_secs_f64(number * scale).ok()?)?;
        rest = &rest[unit_end..];
    }
    Some(total)
}
