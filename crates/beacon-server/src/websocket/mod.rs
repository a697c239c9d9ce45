//! WebSocket connection handling.
//!
//! - [`hub`]: per-server context; open, activate and close connections
//! - [`heartbeat`]: per-connection tick loop
//! - [`dispatcher`]: control-frame routing for inbound text
//! - [`session`]: socket reader and writer tasks
//! - [`handler`]: upgrade admission

pub mod commands;
pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod heartbeat;
pub mod hub;
pub mod identity;
pub mod registry;
pub mod session;

pub use commands::{CommandError, CommandProcessor, SubscriptionLedger};
pub use connection::{Connection, Outbound};
pub use dispatcher::{Dispatched, dispatch_frame};
pub use handler::Rejection;
pub use heartbeat::{HeartbeatExit, TickOutcome};
pub use hub::{Collaborators, Hub};
pub use identity::{IdentityProvider, QueryIdentity};
pub use registry::ConnectionRegistry;
