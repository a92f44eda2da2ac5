//! Shutdown coordination for the proxy.

use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// Coordinator for graceful shutdown.
///
/// Wraps a cancellation token that the server, open event streams and any
/// other long-running task observe. Cloning shares the same signal.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the shutdown signal. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Token for a single task; cancelled when shutdown triggers.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Future that resolves once shutdown triggers.
    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }
}
