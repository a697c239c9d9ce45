//! Shared per-server connection context.
//!
//! The hub owns the registry and the collaborators, opens and activates
//! connections, and runs the close sequence.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{
    Clock, CloseReason, Identifiers, LatencyRecorder, Lifecycle, NegotiatedProtocol, ProtocolSet,
    ServerNotice, StateError, SystemClock, TelemetrySink, TracingTelemetry,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::commands::{CommandProcessor, SubscriptionLedger};
use super::connection::{Connection, Outbound};
use super::heartbeat::{HeartbeatExit, run_heartbeat};
use super::identity::{IdentityProvider, QueryIdentity};
use super::registry::ConnectionRegistry;
use crate::config::ServerConfig;
use crate::error::HeartbeatError;
use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL};

/// External collaborators plugged into the hub.
#[derive(Clone)]
pub struct Collaborators {
    /// Receives application frames and subscription teardown.
    pub commands: Arc<dyn CommandProcessor>,
    /// Derives identifiers and hears online/offline events.
    pub identity: Arc<dyn IdentityProvider>,
    /// Receives latency samples.
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Wall clock for ping payloads and latency.
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    /// Built-in collaborators for `config`.
    pub fn for_config(config: &ServerConfig) -> Self {
        Self {
            commands: Arc::new(SubscriptionLedger::new()),
            identity: Arc::new(QueryIdentity::new(config.identity_keys.clone())),
            telemetry: Arc::new(TracingTelemetry),
            clock: Arc::new(SystemClock),
        }
    }
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::for_config(&ServerConfig::default())
    }
}

/// Server-wide connection context.
pub struct Hub {
    beat_interval: Duration,
    threshold: Duration,
    outbound_queue_size: usize,
    protocols: ProtocolSet,
    registry: ConnectionRegistry,
    commands: Arc<dyn CommandProcessor>,
    identity: Arc<dyn IdentityProvider>,
    latency: LatencyRecorder,
    clock: Arc<dyn Clock>,
}

impl Hub {
    /// Build a hub from config and collaborators.
    pub fn new(config: &ServerConfig, collaborators: Collaborators) -> Self {
        let latency = LatencyRecorder::new(
            collaborators.telemetry,
            collaborators.clock.clone(),
            config.negative_latency,
        );
        Self {
            beat_interval: config.beat_interval,
            threshold: config.staleness_threshold(),
            outbound_queue_size: config.outbound_queue_size.max(1),
            protocols: config.protocols.clone(),
            registry: ConnectionRegistry::new(),
            commands: collaborators.commands,
            identity: collaborators.identity,
            latency,
            clock: collaborators.clock,
        }
    }

    /// Tick period.
    pub fn beat_interval(&self) -> Duration {
        self.beat_interval
    }

    /// Staleness threshold (`2 × beat_interval`).
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Supported subprotocols.
    pub fn protocols(&self) -> &ProtocolSet {
        &self.protocols
    }

    /// Live connections.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Command collaborator.
    pub fn commands(&self) -> &Arc<dyn CommandProcessor> {
        &self.commands
    }

    /// Identity collaborator.
    pub fn identity(&self) -> &Arc<dyn IdentityProvider> {
        &self.identity
    }

    /// Latency recorder.
    pub fn latency(&self) -> &LatencyRecorder {
        &self.latency
    }

    /// Wall clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create and register a connection in `Opening`.
    ///
    /// The returned receiver feeds the connection's writer task.
    pub async fn open(
        &self,
        protocol: NegotiatedProtocol,
        identifiers: Identifiers,
    ) -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.outbound_queue_size);
        let conn = Arc::new(Connection::new(protocol, identifiers, tx));
        self.registry.insert(conn.clone()).await;

        metrics::counter!(WS_CONNECTIONS_TOTAL, "protocol" => conn.protocol().tag.clone())
            .increment(1);
        metrics::gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
        debug!(
            conn_id = %conn.id(),
            protocol = %conn.protocol().tag,
            strategy = %conn.protocol().strategy,
            "connection opened"
        );
        (conn, rx)
    }

    /// Move to `Active`, greet the peer and start the heartbeat scheduler.
    ///
    /// On failure the connection is closed and the error returned.
    #[instrument(skip_all, fields(conn_id = %conn.id(), protocol = %conn.protocol().tag))]
    pub async fn activate(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
    ) -> Result<JoinHandle<HeartbeatExit>, HeartbeatError> {
        let current = conn.lifecycle();
        if !current.can_transition_to(Lifecycle::Active) {
            return Err(StateError::InvalidTransition {
                from: current,
                to: Lifecycle::Active,
            }
            .into());
        }

        conn.activate()?;
        let greeted = ServerNotice::Welcome
            .encode()
            .map_err(HeartbeatError::from)
            .and_then(|welcome| conn.send_text(welcome));
        if let Err(err) = greeted {
            warn!(error = %err, "failed to greet peer, closing");
            self.close(conn, CloseReason::TransportError).await;
            return Err(err);
        }

        self.identity.connected(conn.id(), conn.identifiers());
        info!(strategy = %conn.strategy().kind(), "connection active");

        Ok(tokio::spawn(run_heartbeat(self.clone(), conn.clone())))
    }

    /// Close `conn` for `reason`. Only the first call for a connection acts.
    ///
    /// Order: detach subscriptions, send the disconnect notice and close
    /// frame, deregister, cancel the scheduler, mark `Closed`.
    #[instrument(skip_all, fields(conn_id = %conn.id(), %reason))]
    pub async fn close(&self, conn: &Arc<Connection>, reason: CloseReason) {
        if !conn.begin_close(reason) {
            debug!("close already in progress");
            return;
        }

        if let Err(err) = self.commands.unsubscribe_all(conn).await {
            warn!(error = %err, "unsubscribe_all failed");
        }

        if !matches!(reason, CloseReason::PeerClosed | CloseReason::TransportError) {
            let notice = ServerNotice::Disconnect {
                reason,
                reconnect: reason.allows_reconnect(),
            };
            match notice.encode() {
                Ok(text) => {
                    if let Err(err) = conn.send_text(text) {
                        debug!(error = %err, "disconnect notice not queued");
                    }
                }
                Err(err) => warn!(error = %err, "failed to encode disconnect notice"),
            }
        }
        if let Err(err) = conn.try_send(Outbound::Close(reason)) {
            debug!(error = %err, "close frame not queued");
        }

        let _ = self.registry.remove(conn.id()).await;
        self.identity.disconnected(conn.id(), conn.identifiers(), reason);
        conn.cancel();
        if let Err(err) = conn.finish_close() {
            warn!(error = %err, "unexpected state at end of close");
        }

        metrics::gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        metrics::counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason.as_str()).increment(1);
        info!("connection closed");
    }

    /// Close every registered connection.
    pub async fn close_all(&self, reason: CloseReason) -> usize {
        let conns = self.registry.all().await;
        let count = conns.len();
        for conn in conns {
            self.close(&conn, reason).await;
        }
        if count > 0 {
            info!(count, %reason, "closed all connections");
        }
        count
    }
}
