//! Upstream URL resolution.
//!
//! # Responsibilities
//! - Combine the configured upstream base with the inbound path and query
//! - Derive the outbound `Host` value from the resolved target
//!
//! # Design Decisions
//! - Absolute-path reference resolution: the inbound path replaces the base
//!   path entirely instead of being appended to it
//! - The raw path is never re-parsed: percent-encoded bytes, including
//!   `%2e`, reach the upstream exactly as received
//! - Only literal `.` and `..` segments are removed
//! - Scheme and authority always come from the base

use axum::http::uri::{Authority, Scheme};
use axum::http::{HeaderValue, Uri};
use url::Url;

/// Resolve the outbound URI for an inbound request.
///
/// `path` is the raw (still percent-encoded) request path. An empty query is
/// dropped.
pub fn resolve_target(
    base: &Url,
    path: &str,
    query: Option<&str>,
) -> Result<Uri, axum::http::Error> {
    let path = if path.is_empty() {
        "/".to_string()
    } else {
        remove_dot_segments(path)
    };
    let path_and_query = match query.filter(|q| !q.is_empty()) {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };

    // The authority comes from the base, so a "//host" path stays a path.
    Uri::builder()
        .scheme(Scheme::try_from(base.scheme())?)
        .authority(Authority::try_from(base_authority(base).as_str())?)
        .path_and_query(path_and_query)
        .build()
}

/// Remove literal `.` and `..` segments from an absolute path.
///
/// Encoded dots (`%2e`) are ordinary bytes here.
pub fn remove_dot_segments(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    let last = segments.len() - 1;
    let mut output: Vec<&str> = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate().skip(1) {
        match *segment {
            "." => {
                if i == last {
                    output.push("");
                }
            }
            ".." => {
                output.pop();
                if i == last {
                    output.push("");
                }
            }
            other => output.push(other),
        }
    }

    format!("/{}", output.join("/"))
}

/// Host plus port when it is not the scheme default. User info is never included.
fn base_authority(base: &Url) -> String {
    let host = base.host_str().unwrap_or_default();
    match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

/// Host header value for `target`.
pub fn host_header(target: &Uri) -> Option<HeaderValue> {
    let authority = target.authority()?;
    HeaderValue::from_str(authority.as_str()).ok()
}
