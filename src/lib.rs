//! MCP authentication reverse proxy library.
//!
//! Accepts plain HTTP from local MCP clients, answers the event-stream and
//! OAuth discovery lookups itself, and forwards everything else to one
//! upstream with HMAC signature headers attached.

pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use auth::Signer;
pub use config::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
