//! Server-wide shutdown flag.
//!
//! Cancelling the token stops the listener and makes the upgrade handler
//! refuse new connections with 503; open connections are closed by the hub.

use tokio_util::sync::CancellationToken;

/// Shared shutdown token.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Coordinator in the running state.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token the listener waits on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start shutting down. Repeated calls are no-ops.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
