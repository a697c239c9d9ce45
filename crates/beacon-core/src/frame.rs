//! Control frames and inbound classification.
//!
//! Wire format: `{"type":"ping"|"pong","message":<timestamp-or-echo>}`.
//! A pong carries the ping's payload byte for byte, so payloads are kept as
//! [`RawValue`] and never re-encoded.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::strategy::CloseReason;

/// Heartbeat frame type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatKind {
    /// Liveness request.
    Ping,
    /// Liveness reply.
    Pong,
}

/// Outbound heartbeat control frame.
#[derive(Debug, Serialize)]
pub struct HeartbeatFrame {
    /// Frame type.
    #[serde(rename = "type")]
    pub kind: HeartbeatKind,
    /// Timestamp (pings) or echoed payload (pongs).
    pub message: Box<RawValue>,
}

impl HeartbeatFrame {
    /// A ping whose payload is `unix_secs`.
    pub fn ping_at(unix_secs: f64) -> Result<Self, FrameError> {
        if !unix_secs.is_finite() {
            return Err(FrameError::NonFiniteTimestamp);
        }
        Ok(Self {
            kind: HeartbeatKind::Ping,
            message: serde_json::value::to_raw_value(&unix_secs)?,
        })
    }

    /// A pong echoing `payload` verbatim.
    pub fn pong_echo(payload: &RawValue) -> Self {
        Self {
            kind: HeartbeatKind::Pong,
            message: payload.to_owned(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server-originated notices that are neither heartbeats nor application data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNotice {
    /// Sent once the connection becomes active.
    Welcome,
    /// Sent right before the server closes the transport.
    Disconnect {
        /// Machine-readable reason code.
        reason: CloseReason,
        /// Whether the client may reconnect.
        reconnect: bool,
    },
}

impl ServerNotice {
    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frame encoding / classification failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Frame is not valid JSON, or has a non-string `type`.
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    /// Frame is valid JSON but not an object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// A `ping` or `pong` arrived without a payload.
    #[error("{0:?} frame has no payload")]
    MissingPayload(HeartbeatKind),
    /// Timestamps must be finite to be representable in JSON.
    #[error("timestamp is not finite")]
    NonFiniteTimestamp,
}

/// Classification of one inbound text frame.
#[derive(Debug, Clone, Copy)]
pub enum Inbound<'a> {
    /// Heartbeat request; the payload must be echoed in a pong.
    Ping(&'a RawValue),
    /// Heartbeat reply echoing the ping payload.
    Pong(&'a RawValue),
    /// Anything else; handed to the application unchanged.
    Application,
}

#[derive(Deserialize)]
struct RawInbound<'a> {
    #[serde(rename = "type", default, borrow)]
    kind: Option<Cow<'a, str>>,
    #[serde(alias = "timestamp", default, borrow)]
    message: Option<&'a RawValue>,
}

/// Inspect a frame's `type` before any application processing.
///
/// Only the `type` and `message` (or legacy `timestamp`) keys are read;
/// everything else is ignored here and left to the application.
pub fn classify(raw: &str) -> Result<Inbound<'_>, FrameError> {
    if !raw.trim_start().starts_with('{') {
        // Surface invalid JSON as a parse error, valid non-objects as such.
        let _: serde::de::IgnoredAny = serde_json::from_str(raw)?;
        return Err(FrameError::NotAnObject);
    }
    let frame: RawInbound<'_> = serde_json::from_str(raw)?;
    match frame.kind.as_deref() {
        Some("ping") => frame
            .message
            .map(Inbound::Ping)
            .ok_or(FrameError::MissingPayload(HeartbeatKind::Ping)),
        Some("pong") => frame
            .message
            .map(Inbound::Pong)
            .ok_or(FrameError::MissingPayload(HeartbeatKind::Pong)),
        _ => Ok(Inbound::Application),
    }
}

/// Read a payload as float seconds, if it is a JSON number.
pub fn payload_timestamp(payload: &RawValue) -> Option<f64> {
    serde_json::from_str::<f64>(payload.get()).ok()
}
