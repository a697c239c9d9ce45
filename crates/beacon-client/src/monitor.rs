//! Client-side liveness monitor for one physical connection.
//!
//! Pure state machine: the multiplexer feeds it inbound frames and ticks
//! and performs whatever it returns.

use std::time::Duration;

use beacon_core::{
    CloseReason, ConnectionId, ConnectionState, HeartbeatFrame, Identifiers, Inbound, InboundKind,
    LatencyRecorder, LatencySample, Lifecycle, NegotiatedProtocol, classify, staleness_threshold,
};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ClientError;

/// What to do with an inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// The server selected an unsupported tag; frames are not interpreted.
    Ignored,
    /// Send this pong back.
    Reply(String),
    /// A pong was consumed.
    Latency(Option<LatencySample>),
    /// An application frame for the caller.
    Application,
}

/// What to do on a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    /// Nothing to send.
    Idle,
    /// Send this ping.
    Ping(String),
    /// The server went silent; close the transport.
    Close(CloseReason),
}

/// Heartbeat bookkeeping for the client end of a connection.
#[derive(Debug)]
pub struct ClientMonitor {
    connection_id: ConnectionId,
    protocol: Option<NegotiatedProtocol>,
    identifiers: Identifiers,
    state: ConnectionState,
    threshold: Duration,
    latency: LatencyRecorder,
    skip_staleness: bool,
}

impl ClientMonitor {
    /// Monitor for a connection opened at `now`. `protocol` is `None` when
    /// the server selected a tag the client does not support.
    pub fn new(
        protocol: Option<NegotiatedProtocol>,
        identifiers: Identifiers,
        beat_interval: Duration,
        latency: LatencyRecorder,
        now: Instant,
    ) -> Self {
        let mut state = ConnectionState::opened_at(now);
        // A fresh state is always in Opening.
        let _ = state.transition_to(Lifecycle::Active);
        Self {
            connection_id: ConnectionId::new(),
            protocol,
            identifiers,
            state,
            threshold: staleness_threshold(beat_interval),
            latency,
            skip_staleness: false,
        }
    }

    /// Local ID used for latency samples.
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Negotiated protocol, if supported.
    pub fn protocol(&self) -> Option<&NegotiatedProtocol> {
        self.protocol.as_ref()
    }

    /// Activity timestamps.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Handle one inbound text frame received at `now`.
    pub fn on_frame(&mut self, raw: &str, now: Instant) -> Result<FrameOutcome, ClientError> {
        let Some(protocol) = &self.protocol else {
            trace!("frame ignored, unsupported subprotocol");
            return Ok(FrameOutcome::Ignored);
        };
        let strategy = protocol.strategy.strategy();

        let classified = classify(raw);
        let kind = match &classified {
            Ok(Inbound::Ping(_)) => InboundKind::Ping,
            Ok(Inbound::Pong(_)) => InboundKind::Pong,
            Ok(Inbound::Application) | Err(_) => InboundKind::Application,
        };
        strategy.on_inbound(&mut self.state, kind, now);

        match classified? {
            Inbound::Ping(payload) => {
                let pong = HeartbeatFrame::pong_echo(payload).encode()?;
                self.state.record_pong_sent(now);
                Ok(FrameOutcome::Reply(pong))
            }
            Inbound::Pong(payload) => Ok(FrameOutcome::Latency(self.latency.record(
                &self.connection_id,
                &self.identifiers,
                payload,
            ))),
            Inbound::Application => Ok(FrameOutcome::Application),
        }
    }

    /// Evaluate a tick at `now`.
    ///
    /// Staleness is judged from any inbound frame. Client pings are only
    /// sent for strategies whose servers answer them.
    pub fn on_tick(&mut self, now: Instant) -> Result<TickAction, ClientError> {
        let Some(protocol) = &self.protocol else {
            return Ok(TickAction::Idle);
        };

        if std::mem::take(&mut self.skip_staleness) {
            debug!("first tick after resume, staleness not evaluated");
        } else if self.state.is_stale_at(self.threshold, now) {
            return Ok(TickAction::Close(CloseReason::HeartbeatTimeout));
        }

        if !protocol.strategy.expects_pong() {
            return Ok(TickAction::Idle);
        }
        let ping = HeartbeatFrame::ping_at(self.latency.clock().unix_now())?.encode()?;
        self.state.record_ping_sent(now);
        Ok(TickAction::Ping(ping))
    }

    /// Back in the foreground: the next tick pings without judging the
    /// silence accumulated while paused.
    pub fn resume(&mut self) {
        self.skip_staleness = true;
    }
}
