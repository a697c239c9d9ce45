//! End-to-end tests using a real WebSocket client.

use std::time::Duration;

use beacon_core::{CloseReason, Lifecycle};
use beacon_server::{BeaconServer, ServerConfig, ServerHandle};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn boot_server(beat: Duration) -> (BeaconServer, ServerHandle) {
    let config = ServerConfig {
        beat_interval: beat,
        ..ServerConfig::default()
    };
    let server = BeaconServer::new(config);
    let handle = server.listen().await.unwrap();
    (server, handle)
}

async fn connect(
    handle: &ServerHandle,
    protocols: &'static str,
) -> Result<(WsStream, Option<String>), WsError> {
    let mut request = handle.ws_url("/cable?user_id=7").into_client_request()?;
    let _ = request
        .headers_mut()
        .insert("sec-websocket-protocol", HeaderValue::from_static(protocols));
    let (ws, response) = tokio_tungstenite::connect_async(request).await?;
    let selected = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok((ws, selected))
}

/// Next text frame parsed as JSON, skipping transport frames.
async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn negotiates_server_preference_and_welcomes() {
    let (server, handle) = boot_server(Duration::from_secs(3)).await;
    let (mut ws, selected) = connect(&handle, "beacon-unsupported, beacon-v1.1-json, beacon-v1.2-json")
        .await
        .unwrap();

    assert_eq!(selected.as_deref(), Some("beacon-v1.2-json"));
    assert_eq!(next_json(&mut ws).await["type"], "welcome");
    assert_eq!(server.hub().registry().count().await, 1);

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn ping_is_echoed_as_pong() {
    let (server, handle) = boot_server(Duration::from_secs(3)).await;
    let (mut ws, _) = connect(&handle, "beacon-v1.1-json").await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    ws.send(Message::text(r#"{"type":"ping","message":1000.000}"#))
        .await
        .unwrap();

    let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = msg else {
        panic!("expected text frame, got {msg:?}");
    };
    assert_eq!(text.as_str(), r#"{"type":"pong","message":1000.000}"#);

    let _ = server.shutdown().await;
}

#[tokio::test]
async fn silent_pong_peer_is_closed() {
    let (server, handle) = boot_server(Duration::from_millis(100)).await;
    let (mut ws, _) = connect(&handle, "beacon-v1.1-json").await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    let mut pings = 0;
    let mut notice = None;
    let close = loop {
        let msg = timeout(TIMEOUT, ws.next()).await.unwrap();
        match msg {
            Some(Ok(Message::Text(text))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                match value["type"].as_str() {
                    Some("ping") => pings += 1,
                    Some("disconnect") => notice = Some(value),
                    other => panic!("unexpected frame type {other:?}"),
                }
            }
            Some(Ok(Message::Close(frame))) => break frame,
            Some(Ok(_)) => {}
            Some(Err(err)) => panic!("read error: {err}"),
            None => panic!("stream ended without close frame"),
        }
    };

    assert!(pings >= 1);
    let notice = notice.expect("disconnect notice");
    assert_eq!(notice["reason"], "heartbeat_timeout");
    assert_eq!(notice["reconnect"], true);
    assert_eq!(close.unwrap().reason.as_str(), "heartbeat_timeout");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.hub().registry().count().await, 0);
}

#[tokio::test]
async fn unknown_protocol_rejected_before_upgrade() {
    let (server, handle) = boot_server(Duration::from_secs(3)).await;
    let err = connect(&handle, "proto-v2-json").await.unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 400),
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert_eq!(server.hub().registry().count().await, 0);
}

#[tokio::test]
async fn shutdown_sends_server_restart() {
    let (server, handle) = boot_server(Duration::from_secs(3)).await;
    let (mut ws, _) = connect(&handle, "beacon-v1.2-json").await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    assert_eq!(server.shutdown().await, 1);

    let notice = next_json(&mut ws).await;
    assert_eq!(notice["type"], "disconnect");
    assert_eq!(notice["reason"], "server_restart");
    let msg = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Close(Some(frame)) = msg else {
        panic!("expected close frame, got {msg:?}");
    };
    assert_eq!(u16::from(frame.code), 1012);
}

#[tokio::test]
async fn failed_write_still_runs_close_sequence() {
    let (server, handle) = boot_server(Duration::from_secs(3)).await;
    let (mut ws, _) = connect(&handle, "beacon-v1.2-json").await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "welcome");

    let conns = server.hub().registry().all().await;
    assert_eq!(conns.len(), 1);
    let conn = conns[0].clone();
    // What the writer does when a send fails.
    conn.cancel();

    timeout(TIMEOUT, async {
        while server.hub().registry().count().await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connection never deregistered");
    assert_eq!(conn.lifecycle(), Lifecycle::Closed);
    assert_eq!(conn.close_reason(), Some(CloseReason::TransportError));
}
