//! Heartbeat strategies.
//!
//! A strategy is picked once from the negotiated tag and never changes for
//! the connection. Each tick asks the strategy what to do given the current
//! [`ConnectionState`]; the caller performs the I/O.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::protocol::StrategyKind;
use crate::state::ConnectionState;

/// Why a connection was (or is being) closed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Peer went silent past the staleness threshold.
    HeartbeatTimeout,
    /// Server is shutting down; the peer should reconnect.
    ServerRestart,
    /// Peer closed the transport.
    PeerClosed,
    /// Last subscription detached (client role).
    Unsubscribed,
    /// Transport read/write failed.
    TransportError,
}

impl CloseReason {
    /// Reason code used on the wire and in metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::ServerRestart => "server_restart",
            Self::PeerClosed => "peer_closed",
            Self::Unsubscribed => "unsubscribed",
            Self::TransportError => "transport_error",
        }
    }

    /// Whether the peer is invited to reconnect after this close.
    pub fn allows_reconnect(self) -> bool {
        !matches!(self, Self::Unsubscribed)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tick should do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickDecision {
    /// Send a timestamped ping.
    Ping,
    /// Close the connection.
    Close(CloseReason),
}

/// Inbound frame category as seen by a strategy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundKind {
    /// Heartbeat request from the peer.
    Ping,
    /// Heartbeat reply from the peer.
    Pong,
    /// Application frame.
    Application,
}

/// Per-tick liveness policy.
pub trait HeartbeatStrategy: Send + Sync + fmt::Debug {
    /// Which variant this is.
    fn kind(&self) -> StrategyKind;

    /// Decide the tick at `now` with staleness `threshold`.
    fn on_tick(&self, state: &ConnectionState, threshold: Duration, now: Instant) -> TickDecision;

    /// Update `state` for an inbound frame received at `now`.
    fn on_inbound(&self, state: &mut ConnectionState, kind: InboundKind, now: Instant) {
        match kind {
            InboundKind::Pong => state.record_pong_received(now),
            InboundKind::Ping | InboundKind::Application => state.record_inbound(now),
        }
    }
}

/// Pings unconditionally and never closes for silence.
#[derive(Clone, Copy, Debug, Default)]
pub struct Legacy;

impl HeartbeatStrategy for Legacy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Legacy
    }

    fn on_tick(&self, _state: &ConnectionState, _threshold: Duration, _now: Instant) -> TickDecision {
        TickDecision::Ping
    }
}

/// Judges liveness from received pongs only.
#[derive(Clone, Copy, Debug, Default)]
pub struct PongTrackingByPong;

impl HeartbeatStrategy for PongTrackingByPong {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Pong
    }

    fn on_tick(&self, state: &ConnectionState, threshold: Duration, now: Instant) -> TickDecision {
        // No pong yet: measure from open.
        let since = state
            .last_pong_received_at()
            .unwrap_or_else(|| state.opened_at_instant());
        if now.saturating_duration_since(since) > threshold {
            TickDecision::Close(CloseReason::HeartbeatTimeout)
        } else {
            TickDecision::Ping
        }
    }
}

/// Judges liveness from any inbound frame.
#[derive(Clone, Copy, Debug, Default)]
pub struct PongTrackingByAnyMessage;

impl HeartbeatStrategy for PongTrackingByAnyMessage {
    fn kind(&self) -> StrategyKind {
        StrategyKind::AnyMessage
    }

    fn on_tick(&self, state: &ConnectionState, threshold: Duration, now: Instant) -> TickDecision {
        if state.is_stale_at(threshold, now) {
            TickDecision::Close(CloseReason::HeartbeatTimeout)
        } else {
            TickDecision::Ping
        }
    }
}

static LEGACY: Legacy = Legacy;
static BY_PONG: PongTrackingByPong = PongTrackingByPong;
static BY_ANY_MESSAGE: PongTrackingByAnyMessage = PongTrackingByAnyMessage;

impl StrategyKind {
    /// The strategy implementation for this kind.
    pub fn strategy(self) -> &'static dyn HeartbeatStrategy {
        match self {
            Self::Legacy => &LEGACY,
            Self::Pong => &BY_PONG,
            Self::AnyMessage => &BY_ANY_MESSAGE,
        }
    }
}

/// Staleness threshold for a beat interval: two missed beats.
pub fn staleness_threshold(beat_interval: Duration) -> Duration {
    beat_interval.saturating_mul(2)
}
