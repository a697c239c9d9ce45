//! Upgrade admission: subprotocol negotiation and capacity checks.

use axum::http::header::SEC_WEBSOCKET_PROTOCOL;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use beacon_core::{NegotiatedProtocol, NegotiationError, parse_protocol_header};
use thiserror::Error;
use tracing::{debug, warn};

use super::hub::Hub;
use crate::metrics::NEGOTIATION_FAILURES_TOTAL;

/// Why an upgrade request was refused.
#[derive(Debug, Error)]
pub enum Rejection {
    /// No `Sec-WebSocket-Protocol` header, or an empty one.
    #[error("missing Sec-WebSocket-Protocol header")]
    NoProtocolHeader,
    /// The peer's tags do not overlap the server's list.
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// The registry is at `max_connections`.
    #[error("connection limit of {0} reached")]
    AtCapacity(usize),
    /// Shutdown has begun.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NoProtocolHeader | Self::Negotiation(_) => StatusCode::BAD_REQUEST,
            Self::AtCapacity(_) | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, self.to_string()).into_response()
    }
}

/// Every tag the peer advertised, across repeated header lines.
pub fn offered_protocols(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(parse_protocol_header)
        .collect()
}

/// Negotiate the subprotocol for an upgrade request.
pub fn select_protocol(hub: &Hub, headers: &HeaderMap) -> Result<NegotiatedProtocol, Rejection> {
    let offered = offered_protocols(headers);
    let result = if offered.is_empty() {
        Err(Rejection::NoProtocolHeader)
    } else {
        hub.protocols().negotiate(offered.as_slice()).map_err(Rejection::from)
    };
    match &result {
        Ok(selected) => debug!(?offered, selected = %selected.tag, "subprotocol negotiated"),
        Err(err) => {
            warn!(?offered, error = %err, "upgrade rejected");
            metrics::counter!(NEGOTIATION_FAILURES_TOTAL).increment(1);
        }
    }
    result
}

/// Full admission check: shutdown, capacity, then negotiation.
pub async fn admit(
    hub: &Hub,
    headers: &HeaderMap,
    max_connections: usize,
    shutting_down: bool,
) -> Result<NegotiatedProtocol, Rejection> {
    if shutting_down {
        return Err(Rejection::ShuttingDown);
    }
    if hub.registry().count().await >= max_connections {
        warn!(max_connections, "upgrade rejected at capacity");
        return Err(Rejection::AtCapacity(max_connections));
    }
    select_protocol(hub, headers)
}
