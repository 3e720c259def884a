use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};

use glint_types::events::GatewayEvent;
use glint_types::{ConnectionId, StreamId, UserId};

use crate::presence::{ConnectionHandle, PresenceRegistry};

/// Name of the fan-out group backing a live room.
pub fn room_group(stream_id: StreamId) -> String {
    format!("live_stream_{}", stream_id)
}

/// Inverse of [`room_group`].
pub fn parse_room_group(group: &str) -> Option<StreamId> {
    group.strip_prefix("live_stream_")?.parse().ok()
}

/// The transport: open connections, named groups of connections, and the
/// two fan-out primitives everything else is built on,
/// [`broadcast`](Self::broadcast) and [`deliver_to_user`](Self::deliver_to_user).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    presence: PresenceRegistry,

    /// All open connections: conn_id -> handle
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,

    /// Group membership: group -> conn_ids
    groups: RwLock<HashMap<String, HashSet<ConnectionId>>>,
}

impl Dispatcher {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                presence,
                connections: RwLock::new(HashMap::new()),
                groups: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Opens a connection for `user_id` and registers it as present.
    pub async fn connect(&self, user_id: UserId) -> (ConnectionHandle, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(user_id, tx);

        self.inner
            .connections
            .write()
            .await
            .insert(handle.id, handle.clone());
        self.inner.presence.register(handle.clone()).await;

        debug!("Connection {} opened for user {}", handle.id, user_id);
        (handle, rx)
    }

    /// Forgets a connection entirely: presence, groups and routing.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        {
            let mut groups = self.inner.groups.write().await;
            groups.retain(|_, members| {
                members.remove(&handle.id);
                !members.is_empty()
            });
        }
        self.inner.connections.write().await.remove(&handle.id);
        self.inner.presence.unregister(handle.user_id, handle.id).await;

        debug!("Connection {} closed for user {}", handle.id, handle.user_id);
    }

    /// Adds a connection to a group. Returns false if it was already a member.
    pub async fn join_group(&self, group: &str, connection_id: ConnectionId) -> bool {
        self.inner
            .groups
            .write()
            .await
            .entry(group.to_string())
            .or_default()
            .insert(connection_id)
    }

    /// Removes a connection from a group. Returns false if it was not a member.
    pub async fn leave_group(&self, group: &str, connection_id: ConnectionId) -> bool {
        let mut groups = self.inner.groups.write().await;
        let Some(members) = groups.get_mut(group) else {
            return false;
        };

        let removed = members.remove(&connection_id);
        if members.is_empty() {
            groups.remove(group);
        }
        removed
    }

    /// Drops a whole group, returning its former members.
    pub async fn dissolve_group(&self, group: &str) -> Vec<ConnectionId> {
        self.inner
            .groups
            .write()
            .await
            .remove(group)
            .map(|members| members.into_iter().collect())
            .unwrap_or_default()
    }

    pub async fn groups_of(&self, connection_id: ConnectionId) -> Vec<String> {
        self.inner
            .groups
            .read()
            .await
            .iter()
            .filter(|(_, members)| members.contains(&connection_id))
            .map(|(group, _)| group.clone())
            .collect()
    }

    pub async fn group_size(&self, group: &str) -> usize {
        self.inner
            .groups
            .read()
            .await
            .get(group)
            .map_or(0, HashSet::len)
    }

    /// Whether `user_id` has any connection in `group`.
    pub async fn user_in_group(&self, group: &str, user_id: UserId) -> bool {
        let groups = self.inner.groups.read().await;
        let connections = self.inner.connections.read().await;

        groups.get(group).is_some_and(|members| {
            members
                .iter()
                .filter_map(|id| connections.get(id))
                .any(|handle| handle.user_id == user_id)
        })
    }

    /// Sends an event to every connection in a group. Returns how many
    /// connections it was queued for.
    pub async fn broadcast(&self, group: &str, event: GatewayEvent) -> usize {
        let groups = self.inner.groups.read().await;
        let connections = self.inner.connections.read().await;

        let Some(members) = groups.get(group) else {
            return 0;
        };

        let delivered = members
            .iter()
            .filter_map(|id| connections.get(id))
            .filter(|handle| handle.send(event.clone()))
            .count();

        trace!("{} -> {} ({} connections)", event.name(), group, delivered);
        delivered
    }

    /// Sends an event to every open connection of a user. Returns how many
    /// connections it was queued for; zero means the user is offline.
    pub async fn deliver_to_user(&self, user_id: UserId, event: GatewayEvent) -> usize {
        let delivered = self
            .inner
            .presence
            .connections_for(user_id)
            .await
            .iter()
            .filter(|handle| handle.send(event.clone()))
            .count();

        trace!("{} -> user {} ({} connections)", event.name(), user_id, delivered);
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping(count: i64) -> GatewayEvent {
        GatewayEvent::ViewerCountUpdated {
            stream_id: StreamId(1),
            count,
        }
    }

    #[test]
    fn room_group_names_round_trip() {
        assert_eq!(room_group(StreamId(12)), "live_stream_12");
        assert_eq!(parse_room_group("live_stream_12"), Some(StreamId(12)));
        assert_eq!(parse_room_group("chat_12"), None);
    }

    #[tokio::test]
    async fn broadcast_reaches_only_group_members() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (member, mut member_rx) = dispatcher.connect(UserId(1)).await;
        let (_outsider, mut outsider_rx) = dispatcher.connect(UserId(2)).await;

        assert!(dispatcher.join_group("g", member.id).await);
        assert!(!dispatcher.join_group("g", member.id).await);

        assert_eq!(dispatcher.broadcast("g", ping(1)).await, 1);
        assert!(matches!(member_rx.try_recv(), Ok(GatewayEvent::ViewerCountUpdated { count: 1, .. })));
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_to_user_fans_out_to_every_device() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (_a, mut a_rx) = dispatcher.connect(UserId(5)).await;
        let (_b, mut b_rx) = dispatcher.connect(UserId(5)).await;

        assert_eq!(dispatcher.deliver_to_user(UserId(5), ping(2)).await, 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());

        assert_eq!(dispatcher.deliver_to_user(UserId(6), ping(2)).await, 0);
    }

    #[tokio::test]
    async fn disconnect_cleans_groups_and_presence() {
        let dispatcher = Dispatcher::new(PresenceRegistry::new());
        let (conn, _rx) = dispatcher.connect(UserId(1)).await;
        dispatcher.join_group("g", conn.id).await;
        assert!(dispatcher.user_in_group("g", UserId(1)).await);

        dispatcher.disconnect(&conn).await;
        assert_eq!(dispatcher.group_size("g").await, 0);
        assert!(dispatcher.groups_of(conn.id).await.is_empty());
        assert!(!dispatcher.presence().is_online(UserId(1)).await);
        assert!(!dispatcher.leave_group("g", conn.id).await);
    }
}
