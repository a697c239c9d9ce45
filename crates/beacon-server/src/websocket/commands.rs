//! Application command collaborator.
//!
//! Frames that are not heartbeats are handed to a [`CommandProcessor`]. The
//! built-in [`SubscriptionLedger`] understands the subscribe/unsubscribe
//! envelope and records which channels each connection is attached to;
//! delivering broadcasts is left to whoever owns the ledger.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use beacon_core::ConnectionId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::connection::Connection;

/// Failures handling an application frame.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Frame is not a command envelope.
    #[error("malformed command: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Envelope names a command we do not handle.
    #[error("unknown command: {0}")]
    Unknown(String),
    /// Reply could not be queued.
    #[error("failed to reply on {0}")]
    Reply(ConnectionId),
}

/// Receives application frames and subscription teardown.
#[async_trait]
pub trait CommandProcessor: Send + Sync {
    /// Handle one application frame from `conn`.
    async fn handle(&self, conn: &Connection, frame: &str) -> Result<(), CommandError>;

    /// Detach every subscription held by `conn`.
    async fn unsubscribe_all(&self, conn: &Connection) -> Result<(), CommandError>;
}

/// `{"command": ..., "identifier": ..., "data": ...}`
#[derive(Debug, Deserialize)]
struct CommandEnvelope {
    command: String,
    identifier: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct Confirmation<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    identifier: &'a str,
}

/// Tracks channel subscriptions per connection.
#[derive(Debug, Default)]
pub struct SubscriptionLedger {
    subscriptions: RwLock<HashMap<ConnectionId, BTreeSet<String>>>,
}

impl SubscriptionLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers `conn_id` is subscribed to, sorted.
    pub fn subscriptions_for(&self, conn_id: &ConnectionId) -> Vec<String> {
        self.subscriptions
            .read()
            .get(conn_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total subscriptions across all connections.
    pub fn total(&self) -> usize {
        self.subscriptions.read().values().map(BTreeSet::len).sum()
    }

    fn subscribe(&self, conn_id: &ConnectionId, identifier: &str) -> bool {
        self.subscriptions
            .write()
            .entry(conn_id.clone())
            .or_default()
            .insert(identifier.to_owned())
    }

    fn unsubscribe(&self, conn_id: &ConnectionId, identifier: &str) -> bool {
        let mut subs = self.subscriptions.write();
        let Some(set) = subs.get_mut(conn_id) else {
            return false;
        };
        let removed = set.remove(identifier);
        if set.is_empty() {
            let _ = subs.remove(conn_id);
        }
        removed
    }
}

#[async_trait]
impl CommandProcessor for SubscriptionLedger {
    async fn handle(&self, conn: &Connection, frame: &str) -> Result<(), CommandError> {
        let envelope: CommandEnvelope = serde_json::from_str(frame)?;
        match envelope.command.as_str() {
            "subscribe" => {
                if self.subscribe(conn.id(), &envelope.identifier) {
                    debug!(conn_id = %conn.id(), identifier = %envelope.identifier, "subscribed");
                }
                let reply = serde_json::to_string(&Confirmation {
                    kind: "confirm_subscription",
                    identifier: &envelope.identifier,
                })?;
                conn.send_text(reply)
                    .map_err(|_| CommandError::Reply(conn.id().clone()))
            }
            "unsubscribe" => {
                if self.unsubscribe(conn.id(), &envelope.identifier) {
                    debug!(conn_id = %conn.id(), identifier = %envelope.identifier, "unsubscribed");
                }
                Ok(())
            }
            "message" => {
                debug!(
                    conn_id = %conn.id(),
                    identifier = %envelope.identifier,
                    has_data = envelope.data.is_some(),
                    "channel message"
                );
                Ok(())
            }
            other => Err(CommandError::Unknown(other.to_owned())),
        }
    }

    async fn unsubscribe_all(&self, conn: &Connection) -> Result<(), CommandError> {
        let removed = self.subscriptions.write().remove(conn.id());
        if let Some(set) = removed {
            info!(conn_id = %conn.id(), count = set.len(), "detached all subscriptions");
        }
        Ok(())
    }
}
