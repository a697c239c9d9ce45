//! Server-side heartbeat errors.

use beacon_core::{ConnectionId, FrameError, StateError};
use thiserror::Error;

use crate::websocket::commands::CommandError;

/// Failures while driving one connection. None of these close the
/// connection by themselves; callers log and move on.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    /// Frame could not be encoded or parsed.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Lifecycle violation.
    #[error(transparent)]
    State(#[from] StateError),
    /// The outbound queue is full; the frame was dropped.
    #[error("outbound queue full for {0}")]
    QueueFull(ConnectionId),
    /// The writer task is gone.
    #[error("connection {0} is closed")]
    ConnectionClosed(ConnectionId),
    /// The command collaborator rejected an application frame.
    #[error(transparent)]
    Command(#[from] CommandError),
}
