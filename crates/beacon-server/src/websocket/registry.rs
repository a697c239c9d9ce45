//! Live connection registry.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::ConnectionId;
use tokio::sync::RwLock;

use super::connection::Connection;

/// All registered connections, keyed by ID.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection.
    pub async fn insert(&self, conn: Arc<Connection>) {
        let _ = self.connections.write().await.insert(conn.id().clone(), conn);
    }

    /// Deregister a connection, returning it if it was present.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(id)
    }

    /// Look up a connection.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Number of registered connections.
    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Snapshot of every registered connection.
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }
}
