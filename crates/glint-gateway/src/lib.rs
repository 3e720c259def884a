pub mod connection;
pub mod dispatcher;
pub mod gifts;
pub mod negotiator;
pub mod presence;
pub mod rooms;

use std::sync::Arc;

use glint_db::Database;
use glint_types::{CoreError, CoreResult};
use tracing::warn;

use crate::dispatcher::{Dispatcher, parse_room_group};
use crate::gifts::GiftEngine;
use crate::negotiator::JoinNegotiator;
use crate::presence::{ConnectionHandle, PresenceRegistry};
use crate::rooms::RoomCoordinator;

pub use crate::dispatcher::room_group;

/// Runs a blocking store call on the blocking pool.
pub(crate) async fn run_blocking<F, T>(db: &Arc<Database>, f: F) -> CoreResult<T>
where
    F: FnOnce(&Database) -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(CoreError::store)?
}

/// Every real-time component, wired to one transport and one store.
#[derive(Clone)]
pub struct Gateway {
    pub dispatcher: Dispatcher,
    pub rooms: RoomCoordinator,
    pub negotiator: JoinNegotiator,
    pub gifts: GiftEngine,
}

impl Gateway {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_presence(db, PresenceRegistry::new())
    }

    pub fn with_presence(db: Arc<Database>, presence: PresenceRegistry) -> Self {
        let dispatcher = Dispatcher::new(presence);
        let rooms = RoomCoordinator::new(db.clone(), dispatcher.clone());
        let negotiator = JoinNegotiator::new(dispatcher.clone(), rooms.clone());
        let gifts = GiftEngine::new(db, dispatcher.clone(), rooms.clone());

        Self {
            dispatcher,
            rooms,
            negotiator,
            gifts,
        }
    }

    /// Tears down one connection as if it had explicitly left every room it
    /// was in. A user whose last connection in a room goes away also stops
    /// co-broadcasting there.
    pub async fn disconnect(&self, handle: &ConnectionHandle) {
        let streams: Vec<_> = self
            .dispatcher
            .groups_of(handle.id)
            .await
            .iter()
            .filter_map(|group| parse_room_group(group))
            .collect();

        for &stream_id in &streams {
            if let Err(e) = self.rooms.leave_room(stream_id, handle).await {
                warn!("Failed to leave stream {} on disconnect of {}: {}", stream_id, handle.id, e);
            }
        }

        self.dispatcher.disconnect(handle).await;

        for stream_id in self.rooms.co_broadcasting(handle.user_id).await {
            if self
                .dispatcher
                .user_in_group(&room_group(stream_id), handle.user_id)
                .await
            {
                continue;
            }
            if let Err(e) = self
                .negotiator
                .leave_co_broadcast(stream_id, handle.user_id)
                .await
            {
                warn!(
                    "Failed to drop co-broadcaster {} from stream {}: {}",
                    handle.user_id, stream_id, e
                );
            }
        }
    }
}
