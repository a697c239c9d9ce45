//! Per-connection heartbeat scheduler.
//!
//! One task per active connection ticks every `beat_interval` and asks the
//! connection's strategy whether to ping or close. A failing or panicking
//! tick is logged and counted; the cadence continues.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use beacon_core::{CloseReason, HeartbeatFrame, TickDecision};
use futures::FutureExt;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::connection::Connection;
use super::hub::Hub;
use crate::error::HeartbeatError;
use crate::metrics::{
    HEARTBEAT_PINGS_SENT_TOTAL, HEARTBEAT_TICK_FAILURES_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL,
};

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatExit {
    /// The connection's token was cancelled.
    Cancelled,
    /// The strategy closed the connection.
    Closed(CloseReason),
}

/// Result of a single tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A ping was queued.
    Pinged,
    /// The connection was closed.
    Closed(CloseReason),
    /// The connection was not active; nothing happened.
    Skipped,
}

/// Run the scheduler for `conn` until it is cancelled or closed.
///
/// The first tick fires one `beat_interval` after start. Ticks never overlap;
/// a slow tick delays the next one instead of bursting.
pub async fn run_heartbeat(hub: Arc<Hub>, conn: Arc<Connection>) -> HeartbeatExit {
    let beat = hub.beat_interval();
    let mut ticker = time::interval_at(Instant::now() + beat, beat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let cancel = conn.cancel_token();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(conn_id = %conn.id(), "heartbeat cancelled");
                return HeartbeatExit::Cancelled;
            }
            _ = ticker.tick() => {}
        }

        match AssertUnwindSafe(tick(&hub, &conn)).catch_unwind().await {
            Ok(Ok(TickOutcome::Closed(reason))) => return HeartbeatExit::Closed(reason),
            Ok(Ok(_)) => {}
            Ok(Err(err)) => {
                warn!(conn_id = %conn.id(), error = %err, "heartbeat tick failed");
                metrics::counter!(HEARTBEAT_TICK_FAILURES_TOTAL).increment(1);
            }
            Err(panic) => {
                error!(
                    conn_id = %conn.id(),
                    panic = panic_message(panic.as_ref()),
                    "heartbeat tick panicked"
                );
                metrics::counter!(HEARTBEAT_TICK_FAILURES_TOTAL).increment(1);
            }
        }
    }
}

/// Evaluate one tick for `conn`.
pub async fn tick(hub: &Hub, conn: &Arc<Connection>) -> Result<TickOutcome, HeartbeatError> {
    let now = Instant::now();
    let decision = {
        let state = conn.state();
        if !state.is_active() {
            return Ok(TickOutcome::Skipped);
        }
        conn.strategy().on_tick(&state, hub.threshold(), now)
    };

    match decision {
        TickDecision::Ping => {
            let frame = HeartbeatFrame::ping_at(hub.clock().unix_now())?.encode()?;
            conn.send_text(frame)?;
            conn.state().record_ping_sent(now);
            metrics::counter!(HEARTBEAT_PINGS_SENT_TOTAL, "role" => "server").increment(1);
            Ok(TickOutcome::Pinged)
        }
        TickDecision::Close(reason) => {
            info!(
                conn_id = %conn.id(),
                protocol = %conn.protocol().tag,
                %reason,
                "peer is stale, closing"
            );
            if reason == CloseReason::HeartbeatTimeout {
                metrics::counter!(HEARTBEAT_TIMEOUTS_TOTAL, "role" => "server").increment(1);
            }
            hub.close(conn, reason).await;
            Ok(TickOutcome::Closed(reason))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
