//! # beacon-core
//!
//! Shared vocabulary for the Beacon connection-liveness protocol.
//!
//! Both the server and the client role depend on this crate:
//!
//! - **IDs**: [`ConnectionId`] newtype (UUID v7)
//! - **Negotiation**: ordered subprotocol tags mapped to heartbeat strategies
//! - **Frames**: `{"type":"ping"|"pong","message":...}` control frames and inbound classification
//! - **Connection state**: lifecycle machine and activity timestamps
//! - **Strategies**: the three heartbeat variants behind one [`HeartbeatStrategy`] interface
//! - **Latency**: [`LatencyRecorder`] and the [`TelemetrySink`] collaborator
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod clock;
pub mod frame;
pub mod ids;
pub mod latency;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod state;
pub mod strategy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use frame::{
    FrameError, HeartbeatFrame, HeartbeatKind, Inbound, ServerNotice, classify, payload_timestamp,
};
pub use ids::{ConnectionId, SubscriptionId};
pub use latency::{
    Identifiers, LatencyRecorder, LatencySample, MemoryTelemetry, NegativeLatencyPolicy,
    TelemetrySink, TracingTelemetry,
};
pub use protocol::{
    LEGACY_SENTINEL, NegotiatedProtocol, NegotiationError, ProtocolEntry, ProtocolSet,
    StrategyKind, negotiate, parse_protocol_header,
};
pub use state::{ConnectionState, Lifecycle, StateError};
pub use strategy::{
    CloseReason, HeartbeatStrategy, InboundKind, Legacy, PongTrackingByAnyMessage,
    PongTrackingByPong, TickDecision, staleness_threshold,
};
