//! Metric names shared by the server and client roles.
//!
//! Recording goes through the `metrics` facade; the server installs the
//! Prometheus recorder.

/// Connections accepted total (counter, labels: protocol).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Currently open connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connections closed total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Heartbeat pings sent total (counter, labels: role).
pub const HEARTBEAT_PINGS_SENT_TOTAL: &str = "heartbeat_pings_sent_total";
/// Connections closed for heartbeat absence (counter, labels: role).
pub const HEARTBEAT_TIMEOUTS_TOTAL: &str = "heartbeat_timeouts_total";
/// Ticks that failed or panicked (counter).
pub const HEARTBEAT_TICK_FAILURES_TOTAL: &str = "heartbeat_tick_failures_total";
/// Round-trip latency seconds (histogram).
pub const CONNECTION_LATENCY_SECONDS: &str = "connection_latency_seconds";
/// Handshakes rejected for lack of a common subprotocol (counter).
pub const NEGOTIATION_FAILURES_TOTAL: &str = "negotiation_failures_total";
