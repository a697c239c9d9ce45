//! # beacon-client
//!
//! Client role of the Beacon heartbeat protocol.
//!
//! - [`SubscriptionMultiplexer`]: many logical subscriptions over one
//!   physical connection, opened on the first attach and closed on the last
//!   detach
//! - [`ClientMonitor`]: answers server pings, sends its own, records latency
//!   and detects a silent server
//! - [`Visibility`]: foreground/background signal that pauses the monitor
//! - [`ClientTransport`]: the socket seam, with [`WsTransport`] over
//!   `tokio-tungstenite`

#![deny(unsafe_code)]

pub mod error;
pub mod monitor;
pub mod multiplexer;
pub mod transport;
pub mod visibility;

pub use error::ClientError;
pub use monitor::{ClientMonitor, FrameOutcome, TickAction};
pub use multiplexer::{ClientConfig, MultiplexerHandle, MultiplexerStatus, SubscriptionMultiplexer};
pub use transport::{ClientTransport, OpenedTransport, WsTransport};
pub use visibility::{Visibility, visibility_channel};
