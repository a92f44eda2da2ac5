//! Upstream authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound request (method, path)
//!     → signer.rs (canonical string → HMAC-SHA256 → hex)
//!     → x-api-key-id / x-signature / x-timestamp headers
//! ```
//!
//! # Design Decisions
//! - Key and secret are read once at construction and never change
//! - Time comes from an injected `Clock`

pub mod signer;

pub use signer::{Clock, FixedClock, SignError, SignatureHeaders, Signer, SystemClock};
pub use signer::{HEADER_API_KEY, HEADER_SIGNATURE, HEADER_TIMESTAMP};
