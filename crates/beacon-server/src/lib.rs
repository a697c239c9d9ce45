//! # beacon-server
//!
//! Server role of the Beacon heartbeat protocol.
//!
//! - `GET /cable`: WebSocket upgrade with subprotocol negotiation
//! - Per-connection writer task, reader loop (control-frame dispatcher) and
//!   heartbeat scheduler, all on the tokio runtime
//! - Close-on-staleness with subscription teardown and registry cleanup
//! - `GET /health` and `GET /metrics` (Prometheus)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use error::HeartbeatError;
pub use server::{BeaconServer, ServerHandle};
pub use websocket::{
    Collaborators, CommandError, CommandProcessor, Connection, ConnectionRegistry, Hub,
    IdentityProvider, Outbound, QueryIdentity, SubscriptionLedger,
};
