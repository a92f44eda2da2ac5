//! Local Server-Sent Events keep-alive stream.
//!
//! MCP clients open `GET /mcp` expecting an event stream. When the upstream
//! offers none, the proxy answers locally with comment-only frames so the
//! client handshake completes and the connection stays open.
//!
//! ```text
//! Open ──(":ok")──▶ Heartbeat ──(every interval: ":keepalive")──▶ Heartbeat
//!                      │
//!                      └──(cancelled / client gone)──▶ Closed
//! ```

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Response};
use futures_util::stream::{self, Stream};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::observability::metrics;

/// Canonical MCP streaming endpoint.
pub const EVENT_STREAM_PATH: &str = "/mcp";

/// Default spacing between keep-alive comments.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

const OPEN_FRAME: &[u8] = b":ok\n\n";
const HEARTBEAT_FRAME: &[u8] = b":keepalive\n\n";

/// Returns true for the streaming path, ignoring one trailing slash.
pub fn is_event_stream_path(path: &str) -> bool {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    !trimmed.is_empty() && trimmed == EVENT_STREAM_PATH
}

/// Build the `text/event-stream` response.
///
/// The stream ends when `cancel` fires or when the body is dropped because
/// the client went away.
pub fn respond(heartbeat: Duration, cancel: CancellationToken) -> Response<Body> {
    let mut response = Response::new(Body::from_stream(heartbeat_stream(heartbeat, cancel)));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

struct HeartbeatState {
    opened: bool,
    ticker: Interval,
    cancel: CancellationToken,
    _guard: StreamGuard,
}

/// Logs the close and updates the gauge however the stream ends.
struct StreamGuard;

impl StreamGuard {
    fn open() -> Self {
        tracing::info!("Event stream opened");
        metrics::event_stream_opened();
        StreamGuard
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        tracing::info!("Event stream closed");
        metrics::event_stream_closed();
    }
}

/// Comment frames: `:ok` immediately, then `:keepalive` every `heartbeat`.
pub fn heartbeat_stream(
    heartbeat: Duration,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let state = HeartbeatState {
        opened: false,
        ticker,
        cancel,
        _guard: StreamGuard::open(),
    };

    stream::unfold(state, |mut state| async move {
        if !state.opened {
            state.opened = true;
            return Some((Ok(Bytes::from_static(OPEN_FRAME)), state));
        }

        tokio::select! {
            biased;
            _ = state.cancel.cancelled() => None,
            _ = state.ticker.tick() => {
                tracing::trace!("Sending event stream keepalive");
                Some((Ok(Bytes::from_static(HEARTBEAT_FRAME)), state))
            }
        }
    })
}
