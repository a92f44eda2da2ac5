//! Header manipulation for proxied traffic.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers from outbound requests and relayed responses
//! - Add X-Forwarded-For, X-Forwarded-Proto, X-Forwarded-Host
//! - Copy header sets without losing repeated values
//!
//! # Design Decisions
//! - Header names are matched through `HeaderName`, so lookups are case-insensitive
//! - Forwarded headers are only ever set on the outbound request
//! - An inbound X-Forwarded-Proto is trusted as-is (see DESIGN.md)

use std::net::SocketAddr;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Uri};

/// X-Forwarded-For.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
/// X-Forwarded-Proto.
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
/// X-Forwarded-Host.
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Connection-scoped headers that must never cross the proxy.
pub const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("proxy-connection"),
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove every hop-by-hop header, including all repeated values.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Append every value of every header in `src` to `dst`.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

/// Record the original client context on an outbound request.
///
/// `inbound` and `uri` describe the request as the proxy received it;
/// `client_addr` is the peer socket address when known.
pub fn augment_forwarded(
    headers: &mut HeaderMap,
    inbound: &HeaderMap,
    uri: &Uri,
    client_addr: Option<SocketAddr>,
) {
    if let Some(addr) = client_addr {
        let client_ip = addr.ip().to_string();
        let forwarded_for = match inbound
            .get(&X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            Some(prior) => format!("{prior}, {client_ip}"),
            None => client_ip,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }

    let proto = inbound
        .get(&X_FORWARDED_PROTO)
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| uri.scheme_str().and_then(|s| HeaderValue::from_str(s).ok()))
        .unwrap_or_else(|| HeaderValue::from_static("http"));
    headers.insert(X_FORWARDED_PROTO, proto);

    // HTTP/2 clients send :authority instead of Host.
    let host = inbound.get(header::HOST).cloned().or_else(|| {
        uri.authority()
            .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
    });
    if let Some(host) = host {
        headers.insert(X_FORWARDED_HOST, host);
    }
}
