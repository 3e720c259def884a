use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};

use glint_types::events::GatewayEvent;
use glint_types::{ConnectionId, UserId};

/// Sending half of one open real-time connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    pub fn new(user_id: UserId, tx: mpsc::UnboundedSender<GatewayEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            user_id,
            tx,
        }
    }

    /// Queues an event for this connection. Returns false if it already closed.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Which connections each user currently holds open.
///
/// Process-local and empty at startup: everyone is offline until they
/// connect. Lookups never fail, a miss is an empty set. The registry only
/// answers queries; it never emits events itself.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    users: Arc<RwLock<HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: ConnectionHandle) {
        self.users
            .write()
            .await
            .entry(handle.user_id)
            .or_default()
            .insert(handle.id, handle);
    }

    /// Drops one connection. The user's entry goes away with its last
    /// connection. Returns false if the connection was not registered.
    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut users = self.users.write().await;
        let Some(connections) = users.get_mut(&user_id) else {
            return false;
        };

        let removed = connections.remove(&connection_id).is_some();
        if connections.is_empty() {
            users.remove(&user_id);
        }
        removed
    }

    pub async fn connections_for(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.users
            .read()
            .await
            .get(&user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.users.read().await.contains_key(&user_id)
    }

    pub async fn online_users(&self) -> usize {
        self.users.read().await.len()
    }
}
