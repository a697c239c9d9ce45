//! Server configuration.

use std::time::Duration;

use beacon_core::{NegativeLatencyPolicy, ProtocolSet, staleness_threshold};
use beacon_settings::{BeaconSettings, SettingsError};

/// Runtime configuration for [`BeaconServer`](crate::BeaconServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// WebSocket upgrade route.
    pub path: String,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue_size: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Heartbeat tick period.
    pub beat_interval: Duration,
    /// Handling of negative latency samples.
    pub negative_latency: NegativeLatencyPolicy,
    /// Supported subprotocols, most preferred first.
    pub protocols: ProtocolSet,
    /// Query keys copied into each connection's identifiers.
    pub identity_keys: Vec<String>,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &BeaconSettings) -> Result<Self, SettingsError> {
        settings.validate()?;
        Ok(Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            path: settings.server.path.clone(),
            max_connections: settings.server.max_connections,
            outbound_queue_size: settings.server.outbound_queue_size,
            max_message_size: settings.server.max_message_size,
            beat_interval: settings.heartbeat.beat_interval(),
            negative_latency: settings.heartbeat.negative_latency,
            protocols: settings.protocol_set()?,
            identity_keys: settings.identity.query_keys.clone(),
        })
    }

    /// Silence longer than this closes pong-aware connections.
    pub fn staleness_threshold(&self) -> Duration {
        staleness_threshold(self.beat_interval)
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/cable".into(),
            max_connections: 10_000,
            outbound_queue_size: 256,
            max_message_size: 64 * 1024,
            beat_interval: Duration::from_secs(3),
            negative_latency: NegativeLatencyPolicy::Emit,
            protocols: ProtocolSet::default(),
            identity_keys: vec!["user_id".into()],
        }
    }
}
