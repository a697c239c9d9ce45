//! Control-frame dispatcher for inbound text frames.
//!
//! Every frame is classified by its `type` before the application sees it.
//! Pings are answered immediately with a pong echoing the payload, pongs
//! feed the latency recorder, and everything else goes to the command
//! collaborator unchanged.

use std::sync::Arc;

use beacon_core::{HeartbeatFrame, Inbound, InboundKind, LatencySample, classify};
use tokio::time::Instant;
use tracing::{debug, instrument};

use super::connection::Connection;
use super::hub::Hub;
use crate::error::HeartbeatError;

/// What the dispatcher did with a frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    /// A ping was answered.
    Ponged,
    /// A pong was consumed, yielding a latency sample if the payload was a timestamp.
    Pong(Option<LatencySample>),
    /// Forwarded to the command collaborator.
    Application,
    /// Ignored because the connection is not active.
    Dropped,
}

/// Route one inbound text frame.
///
/// Any frame, even a malformed one, counts as inbound activity. Errors are
/// returned for the caller to log; they never close the connection.
#[instrument(level = "trace", skip_all, fields(conn_id = %conn.id()))]
pub async fn dispatch_frame(
    hub: &Hub,
    conn: &Arc<Connection>,
    raw: &str,
) -> Result<Dispatched, HeartbeatError> {
    if !conn.is_active() {
        debug!(lifecycle = %conn.lifecycle(), "frame on inactive connection dropped");
        return Ok(Dispatched::Dropped);
    }

    let now = Instant::now();
    let classified = classify(raw);
    let kind = match &classified {
        Ok(Inbound::Ping(_)) => InboundKind::Ping,
        Ok(Inbound::Pong(_)) => InboundKind::Pong,
        Ok(Inbound::Application) | Err(_) => InboundKind::Application,
    };
    conn.strategy().on_inbound(&mut conn.state(), kind, now);

    match classified? {
        Inbound::Ping(payload) => {
            let pong = HeartbeatFrame::pong_echo(payload).encode()?;
            conn.send_text(pong)?;
            conn.state().record_pong_sent(now);
            Ok(Dispatched::Ponged)
        }
        Inbound::Pong(payload) => {
            let sample = hub
                .latency()
                .record(conn.id(), conn.identifiers(), payload);
            Ok(Dispatched::Pong(sample))
        }
        Inbound::Application => {
            hub.commands().handle(conn, raw).await?;
            Ok(Dispatched::Application)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use beacon_core::{FrameError, Identifiers, StrategyKind};

    use crate::websocket::connection::Outbound;
    use crate::websocket::hub::tests::{drain, fixture, protocol};

    #[tokio::test]
    async fn ping_answered_with_identical_payload() {
        let fx = fixture(Duration::from_secs(3));
        let (conn, mut rx) = fx.hub.open(protocol(StrategyKind::Pong), Identifiers::new()).await;
        conn.activate().unwrap();

        let out = dispatch_frame(&fx.hub, &conn, r#"{"type":"ping","message":1000.000}"#)
            .await
            .unwrap();
        assert_eq!(out, Dispatched::Ponged);
        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Text(r#"{"type":"pong","message":1000.000}"#.into())]
        );
        assert!(conn.state().last_pong_sent_at().is_some());
    }

    #[tokio::test]
    async fn pong_records_latency_once() {
        let fx = fixture(Duration::from_secs(3));
        let ids = Identifiers::from([("user_id".to_string(), "7".to_string())]);
        let (conn, _rx) = fx.hub.open(protocol(StrategyKind::Pong), ids.clone()).await;
        conn.activate().unwrap();
        fx.clock.set(1000.050);

        let out = dispatch_frame(&fx.hub, &conn, r#"{"type":"pong","message":1000.000}"#)
            .await
            .unwrap();

        let Dispatched::Pong(Some(sample)) = out else {
            panic!("expected a latency sample");
        };
        assert!((sample.value - 0.050).abs() < 1e-9);
        let recorded = fx.telemetry.samples();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].connection_id, *conn.id());
        assert_eq!(recorded[0].identifiers, ids);
        assert!(conn.state().last_pong_received_at().is_some());
    }

    #[tokio::test]
    async fn application_frames_reach_commands_unchanged() {
        let fx = fixture(Duration::from_secs(3));
        let (conn, mut rx) = fx.hub.open(protocol(StrategyKind::AnyMessage), Identifiers::new()).await;
        conn.activate().unwrap();
        let frame = r#"{"command":"subscribe","identifier":"{\"channel\":\"Events\"}"}"#;

        let out = dispatch_frame(&fx.hub, &conn, frame).await.unwrap();
        assert_eq!(out, Dispatched::Application);
        assert_eq!(fx.journal.events(), vec![format!("handle:{frame}")]);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn any_frame_refreshes_activity() {
        let fx = fixture(Duration::from_secs(3));
        let (conn, _rx) = fx.hub.open(protocol(StrategyKind::AnyMessage), Identifiers::new()).await;
        conn.activate().unwrap();
        let before = conn.state().last_message_received_at();

        tokio::time::advance(Duration::from_secs(1)).await;
        let err = dispatch_frame(&fx.hub, &conn, "garbage").await.unwrap_err();
        assert_matches!(err, HeartbeatError::Frame(FrameError::Json(_)));
        let after = conn.state().last_message_received_at();
        assert_eq!(after - before, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn malformed_control_frame_is_an_error() {
        let fx = fixture(Duration::from_secs(3));
        let (conn, mut rx) = fx.hub.open(protocol(StrategyKind::Pong), Identifiers::new()).await;
        conn.activate().unwrap();
        assert_matches!(
            dispatch_frame(&fx.hub, &conn, r#"{"type":"ping"}"#).await,
            Err(HeartbeatError::Frame(FrameError::MissingPayload(_)))
        );
        assert!(drain(&mut rx).is_empty());
        assert!(conn.is_active());
    }

    #[tokio::test]
    async fn frames_before_activation_are_dropped() {
        let fx = fixture(Duration::from_secs(3));
        let (conn, mut rx) = fx.hub.open(protocol(StrategyKind::Pong), Identifiers::new()).await;
        let out = dispatch_frame(&fx.hub, &conn, r#"{"type":"ping","message":1}"#)
            .await
            .unwrap();
        assert_eq!(out, Dispatched::Dropped);
        assert!(drain(&mut rx).is_empty());
        assert!(fx.journal.events().is_empty());
    }

    #[tokio::test]
    async fn non_numeric_pong_yields_no_sample() {
        let fx = fixture(Duration::from_secs(3));
        let (conn, _rx) = fx.hub.open(protocol(StrategyKind::Pong), Identifiers::new()).await;
        conn.activate().unwrap();
        let out = dispatch_frame(&fx.hub, &conn, r#"{"type":"pong","message":"abc"}"#)
            .await
            .unwrap();
        assert_eq!(out, Dispatched::Pong(None));
        assert!(fx.telemetry.is_empty());
    }
}
