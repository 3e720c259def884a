use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use glint_db::Database;
use glint_types::events::GatewayEvent;
use glint_types::models::{LiveRoom, MediaKind, Stream, StreamComment, UserProfile};
use glint_types::{CoreError, CoreResult, StreamId, UserId};

use crate::dispatcher::{Dispatcher, room_group};
use crate::presence::ConnectionHandle;
use crate::run_blocking;

/// In-memory state of one live room. Guarded by the room's lock, which is
/// held across every store commit and broadcast for that stream.
#[derive(Debug, Default)]
pub struct RoomState {
    pub co_broadcasters: BTreeSet<UserId>,
}

type RoomTable = Arc<RwLock<HashMap<StreamId, Arc<Mutex<RoomState>>>>>;

/// Membership, viewer counts and lifecycle of live rooms.
#[derive(Clone)]
pub struct RoomCoordinator {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    rooms: RoomTable,
}

impl RoomCoordinator {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher) -> Self {
        Self {
            db,
            dispatcher,
            rooms: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Lock handle of a room, created on first use.
    pub(crate) async fn room(&self, stream_id: StreamId) -> Arc<Mutex<RoomState>> {
        if let Some(room) = self.rooms.read().await.get(&stream_id) {
            return room.clone();
        }
        self.rooms.write().await.entry(stream_id).or_default().clone()
    }

    pub(crate) async fn existing_room(&self, stream_id: StreamId) -> Option<Arc<Mutex<RoomState>>> {
        self.rooms.read().await.get(&stream_id).cloned()
    }

    /// Streams in which `user_id` is currently a co-broadcaster.
    pub async fn co_broadcasting(&self, user_id: UserId) -> Vec<StreamId> {
        let rooms: Vec<_> = self
            .rooms
            .read()
            .await
            .iter()
            .map(|(id, room)| (*id, room.clone()))
            .collect();

        let mut streams = Vec::new();
        for (stream_id, room) in rooms {
            if room.lock().await.co_broadcasters.contains(&user_id) {
                streams.push(stream_id);
            }
        }
        streams
    }

    pub async fn co_broadcasters(&self, stream_id: StreamId) -> Vec<UserId> {
        match self.existing_room(stream_id).await {
            Some(room) => room.lock().await.co_broadcasters.iter().copied().collect(),
            None => Vec::new(),
        }
    }

    pub(crate) async fn fetch_stream(&self, stream_id: StreamId) -> CoreResult<Stream> {
        run_blocking(&self.db, move |db| Ok(db.get_stream(stream_id)?))
            .await?
            .ok_or(CoreError::NotFound("stream"))
    }

    pub(crate) async fn fetch_profile(&self, user_id: UserId) -> CoreResult<UserProfile> {
        let profile = run_blocking(&self.db, move |db| Ok(db.get_profile(user_id)?)).await?;
        Ok(profile.unwrap_or_else(UserProfile::unknown))
    }

    /// Adds a connection to a live room and returns the new viewer count.
    pub async fn join_room(&self, stream_id: StreamId, handle: &ConnectionHandle) -> CoreResult<i64> {
        let stream = self.fetch_stream(stream_id).await?;
        if !stream.is_live {
            return Err(CoreError::NotLive);
        }

        let room = self.room(stream_id).await;
        let state = room.lock().await;

        let group = room_group(stream_id);
        if !self.dispatcher.join_group(&group, handle.id).await {
            return Err(CoreError::AlreadyMember);
        }

        let count = match run_blocking(&self.db, move |db| Ok(db.increment_viewers(stream_id)?)).await {
            Ok(Some(count)) => count,
            Ok(None) => {
                self.dispatcher.leave_group(&group, handle.id).await;
                return Err(CoreError::NotLive);
            }
            Err(e) => {
                self.dispatcher.leave_group(&group, handle.id).await;
                return Err(e);
            }
        };

        self.dispatcher
            .broadcast(&group, GatewayEvent::ViewerCountUpdated { stream_id, count })
            .await;

        handle.send(GatewayEvent::JoinLiveSuccess {
            stream_id,
            host_id: stream.host_id,
            viewer_count: count,
            co_broadcasters: state.co_broadcasters.iter().copied().collect(),
        });

        if stream.host_id != handle.user_id {
            match self.fetch_profile(handle.user_id).await {
                Ok(viewer) => {
                    let delivered = self
                        .dispatcher
                        .deliver_to_user(stream.host_id, GatewayEvent::NewViewerJoined { stream_id, viewer })
                        .await;
                    if delivered == 0 {
                        debug!("Host {} of stream {} is offline, viewer join not relayed", stream.host_id, stream_id);
                    }
                }
                Err(e) => warn!("Viewer profile lookup failed for {}: {}", handle.user_id, e),
            }
        }

        debug!("User {} joined stream {} ({} viewers)", handle.user_id, stream_id, count);
        Ok(count)
    }

    /// Removes a connection from a room. Returns the new viewer count, or
    /// `None` if the connection was not in the room.
    pub async fn leave_room(&self, stream_id: StreamId, handle: &ConnectionHandle) -> CoreResult<Option<i64>> {
        let Some(room) = self.existing_room(stream_id).await else {
            return Ok(None);
        };
        let _state = room.lock().await;

        let group = room_group(stream_id);
        if !self.dispatcher.leave_group(&group, handle.id).await {
            return Ok(None);
        }

        let count = run_blocking(&self.db, move |db| Ok(db.decrement_viewers(stream_id)?)).await?;
        if let Some(count) = count {
            self.dispatcher
                .broadcast(&group, GatewayEvent::ViewerCountUpdated { stream_id, count })
                .await;
            debug!("User {} left stream {} ({} viewers)", handle.user_id, stream_id, count);
        }

        Ok(count)
    }

    pub async fn send_comment(&self, stream_id: StreamId, user_id: UserId, text: &str) -> CoreResult<StreamComment> {
        let body = text.to_string();
        let stream = self.fetch_stream(stream_id).await?;
        if !stream.is_live {
            return Err(CoreError::NotLive);
        }

        let room = self.room(stream_id).await;
        let _state = room.lock().await;

        let comment = run_blocking(&self.db, move |db| Ok(db.insert_comment(stream_id, user_id, &body)?)).await?;
        let user = self.fetch_profile(user_id).await?;

        self.dispatcher
            .broadcast(
                &room_group(stream_id),
                GatewayEvent::NewComment {
                    stream_id,
                    comment_id: comment.id,
                    user,
                    text: comment.body.clone(),
                    timestamp: comment.created_at,
                },
            )
            .await;

        Ok(comment)
    }

    pub async fn update_stream_status(
        &self,
        stream_id: StreamId,
        caller: UserId,
        muted: bool,
        video_off: bool,
    ) -> CoreResult<()> {
        let stream = self.fetch_stream(stream_id).await?;
        if stream.host_id != caller {
            return Err(CoreError::Forbidden);
        }
        if !stream.is_live {
            return Err(CoreError::NotLive);
        }

        let room = self.room(stream_id).await;
        let _state = room.lock().await;

        self.dispatcher
            .broadcast(
                &room_group(stream_id),
                GatewayEvent::StreamStatusChanged {
                    stream_id,
                    host_id: caller,
                    muted,
                    video_off,
                },
            )
            .await;

        Ok(())
    }

    /// Goes live. A stream the host still had live is closed first.
    pub async fn start_stream(
        &self,
        host: UserId,
        media: MediaKind,
        stream_url: Option<String>,
    ) -> CoreResult<Stream> {
        let (stream, replaced) = run_blocking(&self.db, move |db| {
            Ok(db.start_stream(host, media, stream_url.as_deref())?)
        })
        .await?;

        for stream_id in replaced {
            info!("Stream {} replaced by new stream {} of host {}", stream_id, stream.id, host);
            self.close_room(stream_id, host).await;
        }

        info!("Host {} started {:?} stream {}", host, media, stream.id);
        Ok(stream)
    }

    pub async fn end_stream(&self, stream_id: StreamId, caller: UserId) -> CoreResult<()> {
        let stream = self.fetch_stream(stream_id).await?;
        if stream.host_id != caller {
            return Err(CoreError::Forbidden);
        }

        let room = self.room(stream_id).await;
        let guard = room.lock().await;
        let ended = run_blocking(&self.db, move |db| Ok(db.end_stream(stream_id)?)).await?;
        drop(guard);

        if !ended {
            self.rooms.write().await.remove(&stream_id);
            return Err(CoreError::NotLive);
        }

        self.close_room(stream_id, caller).await;
        info!("Host {} ended stream {}", caller, stream_id);
        Ok(())
    }

    /// Tells the room the stream is over, then dissolves its group and state.
    async fn close_room(&self, stream_id: StreamId, host_id: UserId) {
        let room = self.existing_room(stream_id).await;
        let _state = match &room {
            Some(room) => Some(room.lock().await),
            None => None,
        };

        let group = room_group(stream_id);
        self.dispatcher
            .broadcast(&group, GatewayEvent::StreamEnded { stream_id, host_id })
            .await;
        let members = self.dispatcher.dissolve_group(&group).await;
        self.rooms.write().await.remove(&stream_id);

        debug!("Room of stream {} closed ({} connections released)", stream_id, members.len());
    }

    pub async fn live_streams(&self, media: MediaKind) -> CoreResult<Vec<LiveRoom>> {
        run_blocking(&self.db, move |db| Ok(db.list_live(media)?)).await
    }

    /// Most recent comments of a stream, newest first.
    pub async fn recent_comments(&self, stream_id: StreamId, limit: u32) -> CoreResult<Vec<StreamComment>> {
        self.fetch_stream(stream_id).await?;
        run_blocking(&self.db, move |db| Ok(db.get_comments(stream_id, limit)?)).await
    }
}
