//! Per-connection lifecycle and activity timestamps.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

/// Connection lifecycle.
///
/// Only [`Lifecycle::Active`] connections process application frames and
/// evaluate heartbeats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Handshake done, not yet activated.
    Opening,
    /// Processing frames, heartbeat running.
    Active,
    /// Teardown in progress.
    Closing,
    /// Terminal.
    Closed,
}

impl Lifecycle {
    /// Whether `self → next` is a legal move. No move skips a state.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Opening, Self::Active)
                | (Self::Active, Self::Closing)
                | (Self::Closing, Self::Closed)
        )
    }

    /// Lowercase name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Opening => "opening",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle violations. These indicate a bug in the caller.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum StateError {
    /// Attempted a transition the lifecycle does not allow.
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        /// State before the attempt.
        from: Lifecycle,
        /// Requested state.
        to: Lifecycle,
    },
}

/// Activity timestamps and lifecycle for one physical connection.
///
/// All instants are monotonic. `last_message_received_at` starts at
/// `opened_at` and only moves forward.
#[derive(Clone, Debug)]
pub struct ConnectionState {
    lifecycle: Lifecycle,
    opened_at: Instant,
    last_message_received_at: Instant,
    last_ping_sent_at: Option<Instant>,
    last_pong_sent_at: Option<Instant>,
    last_pong_received_at: Option<Instant>,
}

impl ConnectionState {
    /// New connection in [`Lifecycle::Opening`], opened now.
    pub fn new() -> Self {
        Self::opened_at(Instant::now())
    }

    /// New connection in [`Lifecycle::Opening`], opened at `at`.
    pub fn opened_at(at: Instant) -> Self {
        Self {
            lifecycle: Lifecycle::Opening,
            opened_at: at,
            last_message_received_at: at,
            last_ping_sent_at: None,
            last_pong_sent_at: None,
            last_pong_received_at: None,
        }
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Whether the connection is [`Lifecycle::Active`].
    pub fn is_active(&self) -> bool {
        self.lifecycle == Lifecycle::Active
    }

    /// When the connection was established.
    pub fn opened_at_instant(&self) -> Instant {
        self.opened_at
    }

    /// Most recent inbound frame of any kind.
    pub fn last_message_received_at(&self) -> Instant {
        self.last_message_received_at
    }

    /// Most recent ping we sent.
    pub fn last_ping_sent_at(&self) -> Option<Instant> {
        self.last_ping_sent_at
    }

    /// Most recent pong we sent.
    pub fn last_pong_sent_at(&self) -> Option<Instant> {
        self.last_pong_sent_at
    }

    /// Most recent pong we received.
    pub fn last_pong_received_at(&self) -> Option<Instant> {
        self.last_pong_received_at
    }

    /// Note an inbound frame. Earlier instants are ignored.
    pub fn record_inbound(&mut self, now: Instant) {
        if now > self.last_message_received_at {
            self.last_message_received_at = now;
        }
    }

    /// Note a received pong (also counts as inbound activity).
    pub fn record_pong_received(&mut self, now: Instant) {
        self.record_inbound(now);
        self.last_pong_received_at = Some(now);
    }

    /// Note an outbound ping.
    pub fn record_ping_sent(&mut self, now: Instant) {
        self.last_ping_sent_at = Some(now);
    }

    /// Note an outbound pong.
    pub fn record_pong_sent(&mut self, now: Instant) {
        self.last_pong_sent_at = Some(now);
    }

    /// Whether nothing has arrived for strictly longer than `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.is_stale_at(threshold, Instant::now())
    }

    /// [`is_stale`](Self::is_stale) evaluated at `now`.
    pub fn is_stale_at(&self, threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_message_received_at) > threshold
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition_to(&mut self, next: Lifecycle) -> Result<(), StateError> {
        if !self.lifecycle.can_transition_to(next) {
            let err = StateError::InvalidTransition {
                from: self.lifecycle,
                to: next,
            };
            tracing::error!(from = %self.lifecycle, to = %next, "invalid lifecycle transition");
            return Err(err);
        }
        self.lifecycle = next;
        Ok(())
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}
