//! Client error types.

use beacon_core::{FrameError, SubscriptionId};
use thiserror::Error;

/// Errors raised by the client role.
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket handshake or I/O failure.
    #[error("websocket: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A control frame could not be built or parsed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// A subscription frame could not be encoded.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// No transport is open.
    #[error("not connected")]
    NotConnected,

    /// `detach` named a subscription that is not attached.
    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    /// The multiplexer task has exited.
    #[error("multiplexer stopped")]
    Stopped,
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
