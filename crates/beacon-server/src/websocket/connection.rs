//! Server-side connection handle.

use std::sync::atomic::{AtomicU64, Ordering};

use beacon_core::{
    CloseReason, ConnectionId, ConnectionState, HeartbeatStrategy, Identifiers, Lifecycle,
    NegotiatedProtocol, StateError,
};
use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::HeartbeatError;

/// Work item for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame.
    Text(String),
    /// Send a close frame with this reason, then stop writing.
    Close(CloseReason),
}

/// One accepted WebSocket connection.
///
/// The state mutex is only ever locked for short synchronous sections and
/// never held across an `.await`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    protocol: NegotiatedProtocol,
    strategy: &'static dyn HeartbeatStrategy,
    identifiers: Identifiers,
    state: Mutex<ConnectionState>,
    close_reason: Mutex<Option<CloseReason>>,
    tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// New connection in `Opening`, opened now.
    pub fn new(
        protocol: NegotiatedProtocol,
        identifiers: Identifiers,
        tx: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            strategy: protocol.strategy.strategy(),
            protocol,
            identifiers,
            state: Mutex::new(ConnectionState::new()),
            close_reason: Mutex::new(None),
            tx,
            cancel: CancellationToken::new(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Negotiated subprotocol.
    pub fn protocol(&self) -> &NegotiatedProtocol {
        &self.protocol
    }

    /// Strategy chosen from the negotiated tag.
    pub fn strategy(&self) -> &'static dyn HeartbeatStrategy {
        self.strategy
    }

    /// Identifiers taken from the handshake.
    pub fn identifiers(&self) -> &Identifiers {
        &self.identifiers
    }

    /// Lock the activity state. Do not hold across `.await`.
    pub fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock()
    }

    /// Current lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle()
    }

    /// Whether the connection is `Active`.
    pub fn is_active(&self) -> bool {
        self.state.lock().is_active()
    }

    /// Reason recorded by the first close, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Queue an outbound item without waiting.
    pub fn try_send(&self, item: Outbound) -> Result<(), HeartbeatError> {
        self.tx.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                HeartbeatError::QueueFull(self.id.clone())
            }
            mpsc::error::TrySendError::Closed(_) => HeartbeatError::ConnectionClosed(self.id.clone()),
        })
    }

    /// Queue a text frame without waiting.
    pub fn send_text(&self, text: String) -> Result<(), HeartbeatError> {
        self.try_send(Outbound::Text(text))
    }

    /// Frames dropped because the outbound queue was full.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// `Opening → Active`.
    pub fn activate(&self) -> Result<(), StateError> {
        self.state.lock().transition_to(Lifecycle::Active)
    }

    /// Claim the close. Moves to `Closing` (through `Active` when still
    /// `Opening`) and records `reason`.
    ///
    /// Returns `false` if another caller already started closing.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        let mut state = self.state.lock();
        if matches!(state.lifecycle(), Lifecycle::Closing | Lifecycle::Closed) {
            return false;
        }
        if state.lifecycle() == Lifecycle::Opening {
            // Closed before activation: walk through Active.
            let _ = state.transition_to(Lifecycle::Active);
        }
        if state.transition_to(Lifecycle::Closing).is_err() {
            return false;
        }
        *self.close_reason.lock() = Some(reason);
        true
    }

    /// `Closing → Closed`.
    pub fn finish_close(&self) -> Result<(), StateError> {
        self.state.lock().transition_to(Lifecycle::Closed)
    }

    /// Token cancelled when the connection closes.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the scheduler and reader.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the connection's token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use beacon_core::StrategyKind;

    fn make_connection(cap: usize) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(cap);
        let protocol = NegotiatedProtocol {
            tag: "beacon-v1.1-json".into(),
            strategy: StrategyKind::Pong,
        };
        (Connection::new(protocol, Identifiers::new(), tx), rx)
    }

    #[test]
    fn new_connection_is_opening() {
        let (conn, _rx) = make_connection(4);
        assert_eq!(conn.lifecycle(), Lifecycle::Opening);
        assert_eq!(conn.strategy().kind(), StrategyKind::Pong);
        assert!(conn.id().as_str().starts_with("conn_"));
        assert!(conn.close_reason().is_none());
    }

    #[tokio::test]
    async fn send_text_reaches_writer() {
        let (conn, mut rx) = make_connection(4);
        conn.send_text("hello".into()).unwrap();
        assert_eq!(rx.recv().await, Some(Outbound::Text("hello".into())));
    }

    #[test]
    fn full_queue_counts_drops() {
        let (conn, _rx) = make_connection(1);
        conn.send_text("a".into()).unwrap();
        assert_matches!(conn.send_text("b".into()), Err(HeartbeatError::QueueFull(_)));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_reports_closed() {
        let (conn, rx) = make_connection(1);
        drop(rx);
        assert_matches!(
            conn.send_text("a".into()),
            Err(HeartbeatError::ConnectionClosed(_))
        );
    }

    #[test]
    fn begin_close_is_claimed_once() {
        let (conn, _rx) = make_connection(1);
        conn.activate().unwrap();
        assert!(conn.begin_close(CloseReason::HeartbeatTimeout));
        assert!(!conn.begin_close(CloseReason::PeerClosed));
        assert_eq!(conn.close_reason(), Some(CloseReason::HeartbeatTimeout));
        conn.finish_close().unwrap();
        assert!(!conn.begin_close(CloseReason::PeerClosed));
        assert_eq!(conn.lifecycle(), Lifecycle::Closed);
    }

    #[test]
    fn close_before_activation_passes_through_active() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.begin_close(CloseReason::ServerRestart));
        assert_eq!(conn.lifecycle(), Lifecycle::Closing);
        assert!(conn.activate().is_err());
        conn.finish_close().unwrap();
        assert_eq!(conn.lifecycle(), Lifecycle::Closed);
    }
}
