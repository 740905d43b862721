//! Set of connections currently eligible to receive broadcasts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::connection::{ConnectionHandle, ConnectionId};

/// Lock-guarded registry of live connections keyed by [`ConnectionId`].
///
/// Every operation takes the lock for its own duration only. Fan-out works
/// on a [`snapshot`](Self::snapshot) so delivery never holds the lock.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a connection a broadcast target. Replaces an entry with the same id.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(handle.id().clone(), handle);
        debug!(total = conns.len(), "connection registered");
    }

    /// Remove a connection. Absent ids are a no-op; returns whether one was removed.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        let removed = conns.remove(id).is_some();
        if removed {
            debug!(conn_id = %id, total = conns.len(), "connection unregistered");
        }
        removed
    }

    /// Point-in-time copy of the live set.
    pub async fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Whether `id` is registered.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}
