//! Connection identity collaborator.

use std::collections::HashMap;

use beacon_core::{CloseReason, ConnectionId, Identifiers};
use tracing::info;

/// Derives identifiers at handshake time and hears lifecycle events.
pub trait IdentityProvider: Send + Sync {
    /// Identifier map for a new connection, from its query string.
    fn identify(&self, query: &HashMap<String, String>) -> Identifiers;

    /// The connection became active.
    fn connected(&self, _conn_id: &ConnectionId, _identifiers: &Identifiers) {}

    /// The connection closed.
    fn disconnected(&self, _conn_id: &ConnectionId, _identifiers: &Identifiers, _reason: CloseReason) {
    }
}

/// Copies a fixed set of query keys into the identifier map.
#[derive(Debug, Clone)]
pub struct QueryIdentity {
    keys: Vec<String>,
}

impl QueryIdentity {
    /// Extract `keys` from each handshake's query string.
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }
}

impl Default for QueryIdentity {
    fn default() -> Self {
        Self::new(vec!["user_id".into()])
    }
}

impl IdentityProvider for QueryIdentity {
    fn identify(&self, query: &HashMap<String, String>) -> Identifiers {
        self.keys
            .iter()
            .filter_map(|key| query.get(key).map(|v| (key.clone(), v.clone())))
            .collect()
    }

    fn connected(&self, conn_id: &ConnectionId, identifiers: &Identifiers) {
        info!(conn_id = %conn_id, ?identifiers, "connection online");
    }

    fn disconnected(&self, conn_id: &ConnectionId, identifiers: &Identifiers, reason: CloseReason) {
        info!(conn_id = %conn_id, ?identifiers, %reason, "connection offline");
    }
}
