//! Socket driver: writer task plus reader loop for one upgraded connection.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use beacon_core::{CloseReason, Identifiers, InboundKind, NegotiatedProtocol};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::connection::{Connection, Outbound};
use super::dispatcher::dispatch_frame;
use super::hub::Hub;

/// How long the writer may take to flush the close sequence.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Drive an upgraded socket from open to close.
#[instrument(skip_all, fields(protocol = %protocol.tag))]
pub async fn serve_socket(
    hub: Arc<Hub>,
    socket: WebSocket,
    protocol: NegotiatedProtocol,
    identifiers: Identifiers,
) {
    let (conn, rx) = hub.open(protocol, identifiers).await;
    let (sink, mut stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, rx, conn.clone()));

    if hub.activate(&conn).await.is_ok() {
        // `None` without a recorded reason means the writer gave up.
        let reason = read_loop(&hub, &conn, &mut stream)
            .await
            .unwrap_or(CloseReason::TransportError);
        hub.close(&conn, reason).await;
    }

    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        warn!(conn_id = %conn.id(), "writer did not drain in time, aborting");
        writer.abort();
    }
}

/// Read frames until the peer leaves or the connection is cancelled.
///
/// Returns the close reason when the peer side ended the connection, or
/// `None` when the connection was cancelled. A cancel issued by `Hub::close`
/// has already run the close sequence; one issued by a failed write has not.
async fn read_loop(
    hub: &Hub,
    conn: &Arc<Connection>,
    stream: &mut SplitStream<WebSocket>,
) -> Option<CloseReason> {
    let cancel = conn.cancel_token();
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            next = stream.next() => next,
        };

        match next {
            None => return Some(CloseReason::PeerClosed),
            Some(Err(err)) => {
                debug!(conn_id = %conn.id(), error = %err, "read failed");
                return Some(CloseReason::TransportError);
            }
            Some(Ok(Message::Text(text))) => {
                if let Err(err) = dispatch_frame(hub, conn, text.as_str()).await {
                    warn!(conn_id = %conn.id(), error = %err, "inbound frame dropped");
                }
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(conn_id = %conn.id(), ?frame, "peer sent close");
                return Some(CloseReason::PeerClosed);
            }
            Some(Ok(Message::Binary(bytes))) => {
                conn.strategy()
                    .on_inbound(&mut conn.state(), InboundKind::Application, Instant::now());
                debug!(conn_id = %conn.id(), len = bytes.len(), "binary frame ignored");
            }
            // Transport-level ping/pong; axum answers pings itself.
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                conn.strategy()
                    .on_inbound(&mut conn.state(), InboundKind::Application, Instant::now());
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Outbound>,
    conn: Arc<Connection>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Outbound::Text(text) => {
                if let Err(err) = sink.send(Message::Text(text.into())).await {
                    debug!(conn_id = %conn.id(), error = %err, "write failed");
                    conn.cancel();
                    break;
                }
            }
            Outbound::Close(reason) => {
                let frame = CloseFrame {
                    code: close_code_for(reason),
                    reason: reason.as_str().to_owned().into(),
                };
                if let Err(err) = sink.send(Message::Close(Some(frame))).await {
                    debug!(conn_id = %conn.id(), error = %err, "close frame not sent");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// WebSocket close code for a reason.
pub fn close_code_for(reason: CloseReason) -> u16 {
    match reason {
        CloseReason::ServerRestart => close_code::RESTART,
        CloseReason::TransportError => close_code::ERROR,
        CloseReason::HeartbeatTimeout | CloseReason::PeerClosed | CloseReason::Unsubscribed => {
            close_code::NORMAL
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes() {
        assert_eq!(close_code_for(CloseReason::HeartbeatTimeout), 1000);
        assert_eq!(close_code_for(CloseReason::ServerRestart), 1012);
        assert_eq!(close_code_for(CloseReason::TransportError), 1011);
    }
}
