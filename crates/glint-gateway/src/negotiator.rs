use chrono::Utc;
use tracing::{debug, info, warn};

use glint_types::events::GatewayEvent;
use glint_types::{CoreError, CoreResult, StreamId, UserId};

use crate::dispatcher::{Dispatcher, room_group};
use crate::presence::ConnectionHandle;
use crate::rooms::RoomCoordinator;

/// Co-broadcaster handshake between a viewer and a stream's host.
///
/// Requests are never persisted and never time out. A second request while
/// the first is unanswered is simply another independent request.
#[derive(Clone)]
pub struct JoinNegotiator {
    dispatcher: Dispatcher,
    rooms: RoomCoordinator,
}

impl JoinNegotiator {
    pub fn new(dispatcher: Dispatcher, rooms: RoomCoordinator) -> Self {
        Self { dispatcher, rooms }
    }

    /// Asks the host of `stream_id` to let the requester co-broadcast. The
    /// requesting connection gets `join_request_sent` once the host has it.
    pub async fn request_to_join(&self, stream_id: StreamId, requester: &ConnectionHandle) -> CoreResult<UserId> {
        let stream = self.rooms.fetch_stream(stream_id).await?;
        if stream.host_id == requester.user_id {
            return Err(CoreError::SelfRequest);
        }
        if !stream.is_live {
            return Err(CoreError::NotLive);
        }

        let profile = self.rooms.fetch_profile(requester.user_id).await?;
        let delivered = self
            .dispatcher
            .deliver_to_user(
                stream.host_id,
                GatewayEvent::JoinRequestReceived {
                    stream_id,
                    requester: profile,
                    timestamp: Utc::now(),
                },
            )
            .await;
        if delivered == 0 {
            return Err(CoreError::HostUnavailable);
        }

        requester.send(GatewayEvent::JoinRequestSent {
            stream_id,
            host_id: stream.host_id,
        });

        info!("User {} asked to co-broadcast on stream {}", requester.user_id, stream_id);
        Ok(stream.host_id)
    }

    pub async fn respond_to_request(
        &self,
        stream_id: StreamId,
        host: UserId,
        requester: UserId,
        accepted: bool,
    ) -> CoreResult<()> {
        let stream = self.rooms.fetch_stream(stream_id).await?;
        if stream.host_id != host {
            return Err(CoreError::Forbidden);
        }

        if !accepted {
            let delivered = self
                .dispatcher
                .deliver_to_user(
                    requester,
                    GatewayEvent::JoinRequestRejected {
                        stream_id,
                        host_id: host,
                        timestamp: Utc::now(),
                    },
                )
                .await;
            if delivered == 0 {
                debug!("Requester {} went offline before rejection on stream {}", requester, stream_id);
            }
            return Ok(());
        }

        if !stream.is_live {
            return Err(CoreError::NotLive);
        }

        let room = self.rooms.room(stream_id).await;
        let mut state = room.lock().await;

        let delivered = self
            .dispatcher
            .deliver_to_user(
                requester,
                GatewayEvent::JoinRequestAccepted {
                    stream_id,
                    host_id: host,
                    timestamp: Utc::now(),
                },
            )
            .await;
        if delivered == 0 {
            debug!("Requester {} offline, acceptance on stream {} undelivered", requester, stream_id);
        }

        if state.co_broadcasters.insert(requester) {
            self.dispatcher
                .broadcast(
                    &room_group(stream_id),
                    GatewayEvent::CoBroadcasterAdded {
                        stream_id,
                        user_id: requester,
                    },
                )
                .await;
            info!("User {} is co-broadcasting on stream {}", requester, stream_id);
        }

        Ok(())
    }

    /// Stops `user_id` co-broadcasting. Returns false if they were not.
    pub async fn leave_co_broadcast(&self, stream_id: StreamId, user_id: UserId) -> CoreResult<bool> {
        let Some(room) = self.rooms.existing_room(stream_id).await else {
            return Ok(false);
        };
        let mut state = room.lock().await;
        if !state.co_broadcasters.remove(&user_id) {
            return Ok(false);
        }

        let group = room_group(stream_id);
        let event = GatewayEvent::CoBroadcasterRemoved { stream_id, user_id };
        self.dispatcher.broadcast(&group, event.clone()).await;

        // The host usually watches their own room; only reach out if not.
        match self.rooms.fetch_stream(stream_id).await {
            Ok(stream) => {
                if !self.dispatcher.user_in_group(&group, stream.host_id).await {
                    self.dispatcher.deliver_to_user(stream.host_id, event).await;
                }
            }
            Err(e) => warn!("Could not notify host of stream {}: {}", stream_id, e),
        }

        info!("User {} stopped co-broadcasting on stream {}", user_id, stream_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use std::sync::Arc;

    use glint_db::Database;

    use super::*;
    use crate::Gateway;
    use glint_types::models::MediaKind;

    const HOST: UserId = UserId(10);
    const FAN: UserId = UserId(20);

    async fn setup() -> (Gateway, StreamId) {
        let db = Database::open_in_memory().unwrap();
        db.create_user(HOST, "Host", "host", 0).unwrap();
        db.create_user(FAN, "Fan", "fan", 0).unwrap();
        let gateway = Gateway::new(Arc::new(db));
        let stream = gateway.rooms.start_stream(HOST, MediaKind::Video, None).await.unwrap();
        (gateway, stream.id)
    }

    fn drain(rx: &mut UnboundedReceiver<GatewayEvent>) -> Vec<GatewayEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn offline_host_then_accepted_request() {
        let (gateway, stream) = setup().await;
        let negotiator = &gateway.negotiator;
        let (fan, mut fan_rx) = gateway.dispatcher.connect(FAN).await;
        gateway.rooms.join_room(stream, &fan).await.unwrap();
        drain(&mut fan_rx);

        assert_eq!(
            negotiator.request_to_join(stream, &fan).await.unwrap_err(),
            CoreError::HostUnavailable
        );
        assert!(drain(&mut fan_rx).is_empty());

        let (_host, mut host_rx) = gateway.dispatcher.connect(HOST).await;
        assert_eq!(negotiator.request_to_join(stream, &fan).await.unwrap(), HOST);
        match drain(&mut host_rx).as_slice() {
            [GatewayEvent::JoinRequestReceived { requester, .. }] => assert_eq!(requester.id, FAN),
            other => panic!("unexpected host events {other:?}"),
        }
        assert!(matches!(
            drain(&mut fan_rx).as_slice(),
            [GatewayEvent::JoinRequestSent { host_id: HOST, .. }]
        ));

        assert_eq!(
            negotiator.respond_to_request(stream, FAN, FAN, true).await.unwrap_err(),
            CoreError::Forbidden
        );

        negotiator.respond_to_request(stream, HOST, FAN, true).await.unwrap();
        let events = drain(&mut fan_rx);
        assert!(matches!(events[0], GatewayEvent::JoinRequestAccepted { host_id: HOST, .. }));
        assert!(matches!(events[1], GatewayEvent::CoBroadcasterAdded { user_id: FAN, .. }));
        assert_eq!(gateway.rooms.co_broadcasters(stream).await, vec![FAN]);

        // Host is not in the room, so they hear about the departure directly.
        assert!(negotiator.leave_co_broadcast(stream, FAN).await.unwrap());
        assert!(!negotiator.leave_co_broadcast(stream, FAN).await.unwrap());
        assert!(
            drain(&mut host_rx)
                .iter()
                .any(|e| matches!(e, GatewayEvent::CoBroadcasterRemoved { user_id: FAN, .. }))
        );
    }

    #[tokio::test]
    async fn rejection_reaches_only_the_requester() {
        let (gateway, stream) = setup().await;
        let (_host, mut host_rx) = gateway.dispatcher.connect(HOST).await;
        let (fan, mut fan_rx) = gateway.dispatcher.connect(FAN).await;
        let (other, mut other_rx) = gateway.dispatcher.connect(UserId(30)).await;
        gateway.rooms.join_room(stream, &other).await.unwrap();
        drain(&mut other_rx);
        drain(&mut host_rx);

        gateway.negotiator.request_to_join(stream, &fan).await.unwrap();
        gateway.negotiator.respond_to_request(stream, HOST, FAN, false).await.unwrap();

        assert!(
            drain(&mut fan_rx)
                .iter()
                .any(|e| matches!(e, GatewayEvent::JoinRequestRejected { .. }))
        );
        assert!(drain(&mut other_rx).is_empty());
        assert!(gateway.rooms.co_broadcasters(stream).await.is_empty());
    }

    #[tokio::test]
    async fn acceptance_takes_effect_for_an_offline_requester() {
        let (gateway, stream) = setup().await;
        let (watcher, mut watcher_rx) = gateway.dispatcher.connect(UserId(30)).await;
        gateway.rooms.join_room(stream, &watcher).await.unwrap();
        drain(&mut watcher_rx);

        gateway.negotiator.respond_to_request(stream, HOST, FAN, true).await.unwrap();

        assert!(matches!(
            drain(&mut watcher_rx).as_slice(),
            [GatewayEvent::CoBroadcasterAdded { user_id: FAN, .. }]
        ));
        assert_eq!(gateway.rooms.co_broadcasters(stream).await, vec![FAN]);
    }

    #[tokio::test]
    async fn hosts_cannot_request_their_own_stream() {
        let (gateway, stream) = setup().await;
        let (host, _rx) = gateway.dispatcher.connect(HOST).await;
        assert_eq!(
            gateway.negotiator.request_to_join(stream, &host).await.unwrap_err(),
            CoreError::SelfRequest
        );

        gateway.rooms.end_stream(stream, HOST).await.unwrap();
        let (fan, _fan_rx) = gateway.dispatcher.connect(FAN).await;
        assert_eq!(
            gateway.negotiator.request_to_join(stream, &fan).await.unwrap_err(),
            CoreError::NotLive
        );
    }

    #[tokio::test]
    async fn disconnect_drops_co_broadcasting() {
        let (gateway, stream) = setup().await;
        let (host, mut host_rx) = gateway.dispatcher.connect(HOST).await;
        gateway.rooms.join_room(stream, &host).await.unwrap();
        let (fan, _fan_rx) = gateway.dispatcher.connect(FAN).await;
        gateway.rooms.join_room(stream, &fan).await.unwrap();
        gateway.negotiator.request_to_join(stream, &fan).await.unwrap();
        gateway.negotiator.respond_to_request(stream, HOST, FAN, true).await.unwrap();
        drain(&mut host_rx);

        gateway.disconnect(&fan).await;

        let events = drain(&mut host_rx);
        assert!(matches!(events[0], GatewayEvent::ViewerCountUpdated { count: 1, .. }));
        assert!(matches!(events[1], GatewayEvent::CoBroadcasterRemoved { user_id: FAN, .. }));
        assert!(gateway.rooms.co_broadcasters(stream).await.is_empty());
        assert!(!gateway.dispatcher.presence().is_online(FAN).await);
    }
}
