//! OAuth discovery short-circuit.
//!
//! MCP clients request `/.well-known/oauth-authorization-server` before
//! connecting. The upstream does not serve that metadata, so the lookup is
//! answered locally instead of producing noisy upstream 404s.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response, StatusCode};

/// Prefix of the well-known discovery paths answered locally.
pub const DISCOVERY_PREFIX: &str = "/.well-known/oauth-authorization-server";

/// Returns true if `path` is an OAuth discovery lookup.
pub fn is_discovery_path(path: &str) -> bool {
    path.starts_with(DISCOVERY_PREFIX)
}

/// Plain-text 404 response for a discovery lookup.
pub fn not_found() -> Response<Body> {
    let mut response = Response::new(Body::from("404 page not found\n"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
