//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → listener.rs (idle timeout)
//!     → server.rs (Axum setup, request ID, dispatch)
//!         ├─ GET /mcp                 → event_stream.rs (local keep-alive)
//!         ├─ GET /.well-known/oauth-… → discovery.rs (local 404)
//!         └─ everything else          → forward.rs
//!                                         → target.rs (upstream URL)
//!                                         → headers.rs (hop-by-hop, X-Forwarded-*)
//!                                         → auth::signer (HMAC headers)
//!                                         → transport.rs (one pooled call)
//!     → server.rs (relay: stream or capture error body)
//!     → Send to client
//! ```

use axum::http::HeaderName;

pub mod discovery;
pub mod event_stream;
pub mod forward;
pub mod headers;
pub mod listener;
pub mod server;
pub mod target;
pub mod transport;

/// Correlation header set on every request and echoed on the response.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

pub use forward::{ForwardError, ForwardSettings, Forwarder};
pub use listener::IdleTimeoutListener;
pub use server::{build_router, AppState, HttpServer, ServerError, MAX_ERROR_BODY_BYTES};
pub use transport::{HttpTransport, Transport, TransportError};
