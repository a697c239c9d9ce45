//! Client transport seam.
//!
//! The multiplexer only ever talks to a [`ClientTransport`]; [`WsTransport`]
//! is the production implementation over `tokio-tungstenite`.

use async_trait::async_trait;
use beacon_core::CloseReason;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tracing::{debug, info, warn};

use crate::error::ClientError;

const INBOUND_QUEUE: usize = 256;
const OUTBOUND_QUEUE: usize = 256;

/// A freshly opened physical connection.
#[derive(Debug)]
pub struct OpenedTransport {
    /// Tag the server echoed in `Sec-WebSocket-Protocol`, if any.
    pub selected_protocol: Option<String>,
    /// Inbound text frames. Closes when the connection ends.
    pub inbound: mpsc::Receiver<String>,
}

/// One physical connection at a time.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Connect, advertising `offered` tags in preference order.
    async fn open(&self, offered: &[String]) -> Result<OpenedTransport, ClientError>;

    /// Send a text frame on the open connection.
    async fn send(&self, frame: String) -> Result<(), ClientError>;

    /// Close the open connection. `allow_reconnect = false` tells the
    /// transport the close is final.
    async fn close(&self, reason: CloseReason, allow_reconnect: bool) -> Result<(), ClientError>;
}

/// `tokio-tungstenite` transport.
#[derive(Debug)]
pub struct WsTransport {
    url: String,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

impl WsTransport {
    /// Transport connecting to `url` (`ws://` or `wss://`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            outbound: Mutex::new(None),
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn sender(&self) -> Result<mpsc::Sender<Message>, ClientError> {
        self.outbound.lock().clone().ok_or(ClientError::NotConnected)
    }
}

#[async_trait]
impl ClientTransport for WsTransport {
    async fn open(&self, offered: &[String]) -> Result<OpenedTransport, ClientError> {
        let mut request = self.url.as_str().into_client_request()?;
        let header = HeaderValue::from_str(&offered.join(", "))
            .map_err(|err| tungstenite::Error::HttpFormat(err.into()))?;
        let _ = request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, header);

        let (ws, response) = tokio_tungstenite::connect_async(request).await?;
        let selected_protocol = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        info!(url = %self.url, selected = ?selected_protocol, "connected");

        let (mut sink, mut stream) = ws.split();
        let (in_tx, in_rx) = mpsc::channel(INBOUND_QUEUE);
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE);

        let _reader = tokio::spawn(async move {
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "server closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        debug!(error = %err, "read failed");
                        break;
                    }
                }
            }
        });

        let _writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(err) = sink.send(msg).await {
                    debug!(error = %err, "write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        *self.outbound.lock() = Some(out_tx);
        Ok(OpenedTransport {
            selected_protocol,
            inbound: in_rx,
        })
    }

    async fn send(&self, frame: String) -> Result<(), ClientError> {
        self.sender()?
            .send(Message::text(frame))
            .await
            .map_err(|_| ClientError::NotConnected)
    }

    async fn close(&self, reason: CloseReason, allow_reconnect: bool) -> Result<(), ClientError> {
        let taken = self.outbound.lock().take();
        let Some(tx) = taken else {
            return Err(ClientError::NotConnected);
        };
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: Utf8Bytes::from_static(reason.as_str()),
        };
        if tx.send(Message::Close(Some(frame))).await.is_err() {
            warn!(%reason, "connection already gone");
        }
        debug!(%reason, allow_reconnect, "transport closed");
        Ok(())
    }
}
