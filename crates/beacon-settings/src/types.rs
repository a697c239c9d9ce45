//! Settings types.
//!
//! Every struct uses camelCase keys and `#[serde(default)]`, so a settings
//! file only needs the keys it changes.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use beacon_core::protocol::default_entries;
use beacon_core::{NegativeLatencyPolicy, ProtocolEntry, ProtocolSet};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Accepted tick periods in milliseconds.
pub const BEAT_INTERVAL_MS_RANGE: RangeInclusive<u64> = 100..=600_000;

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Listener and transport limits.
    pub server: ServerSettings,
    /// Heartbeat cadence and latency policy.
    pub heartbeat: HeartbeatSettings,
    /// Supported subprotocols, most preferred first.
    pub protocols: Vec<ProtocolEntry>,
    /// How connection identifiers are derived.
    pub identity: IdentitySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            protocols: default_entries(),
            identity: IdentitySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BeaconSettings {
    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !BEAT_INTERVAL_MS_RANGE.contains(&self.heartbeat.beat_interval_ms) {
            return Err(SettingsError::InvalidValue(format!(
                "heartbeat.beatIntervalMs must be within {}..={}, got {}",
                BEAT_INTERVAL_MS_RANGE.start(),
                BEAT_INTERVAL_MS_RANGE.end(),
                self.heartbeat.beat_interval_ms
            )));
        }
        if self.protocols.is_empty() {
            return Err(SettingsError::InvalidValue(
                "protocols must list at least one subprotocol".into(),
            ));
        }
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/', got {:?}",
                self.server.path
            )));
        }
        if self.server.outbound_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueueSize must be > 0".into(),
            ));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be > 0".into(),
            ));
        }
        let mut seen = HashSet::new();
        for key in &self.identity.query_keys {
            if !seen.insert(key.as_str()) {
                return Err(SettingsError::InvalidValue(format!(
                    "identity.queryKeys lists {key:?} twice"
                )));
            }
        }
        let _ = self.protocol_set()?;
        Ok(())
    }

    /// The validated protocol list, legacy sentinel included.
    pub fn protocol_set(&self) -> Result<ProtocolSet> {
        Ok(ProtocolSet::new(self.protocols.clone())?)
    }
}

/// Listener and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// WebSocket upgrade route.
    pub path: String,
    /// Open connections beyond this are refused with 503.
    pub max_connections: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue_size: usize,
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/cable".to_string(),
            max_connections: 10_000,
            outbound_queue_size: 256,
            max_message_size: 64 * 1024,
        }
    }
}

/// Heartbeat settings shared by both roles.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeartbeatSettings {
    /// Tick period in milliseconds.
    pub beat_interval_ms: u64,
    /// Handling of negative latency samples.
    pub negative_latency: NegativeLatencyPolicy,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            beat_interval_ms: 3_000,
            negative_latency: NegativeLatencyPolicy::Emit,
        }
    }
}

impl HeartbeatSettings {
    /// Tick period.
    pub fn beat_interval(&self) -> Duration {
        Duration::from_millis(self.beat_interval_ms)
    }
}

/// Identifier extraction from the handshake.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Query-string keys copied into each connection's identifier map.
    pub query_keys: Vec<String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            query_keys: vec!["user_id".to_string()],
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// One JSON object per line instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
