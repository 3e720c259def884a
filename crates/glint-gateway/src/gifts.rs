use std::sync::Arc;

use tracing::{debug, info};

use glint_db::Database;
use glint_db::wallet::GiftTransfer;
use glint_types::events::GatewayEvent;
use glint_types::models::{Gift, GiftTransaction, UserProfile};
use glint_types::{CoreError, CoreResult, StreamId, UserId};

use crate::dispatcher::{Dispatcher, room_group};
use crate::rooms::RoomCoordinator;
use crate::run_blocking;

/// Sends gifts and reports them to the host, the room and the sender.
#[derive(Clone)]
pub struct GiftEngine {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    rooms: RoomCoordinator,
}

impl GiftEngine {
    pub fn new(db: Arc<Database>, dispatcher: Dispatcher, rooms: RoomCoordinator) -> Self {
        Self { db, dispatcher, rooms }
    }

    /// Transfers `amount` coins from `sender` to the stream's host.
    ///
    /// The room lock is held from before the transaction until the last
    /// notification is queued, so gift events in a room follow commit order.
    /// Notifications go out only after the transfer committed.
    pub async fn send_gift(
        &self,
        stream_id: StreamId,
        sender: UserId,
        gift_id: i64,
        amount: i64,
    ) -> CoreResult<GiftTransfer> {
        let stream = self.rooms.fetch_stream(stream_id).await?;
        if stream.host_id == sender {
            return Err(CoreError::SelfGift);
        }
        if !stream.is_live {
            return Err(CoreError::NotLive);
        }

        let room = self.rooms.room(stream_id).await;
        let _state = room.lock().await;

        let transfer = run_blocking(&self.db, move |db| db.transfer_gift(stream_id, sender, gift_id, amount)).await?;
        let GiftTransfer {
            transaction: tx,
            gift,
            stream,
        } = &transfer;

        info!(
            "Gift {} x{} on stream {}: {} -> {}",
            gift.name, tx.amount, stream_id, tx.sender_id, tx.receiver_id
        );

        let profile = self.rooms.fetch_profile(sender).await.unwrap_or_else(|e| {
            debug!("Sender profile lookup failed for {}: {}", sender, e);
            UserProfile::unknown()
        });

        let delivered = self
            .dispatcher
            .deliver_to_user(
                stream.host_id,
                GatewayEvent::GiftReceived {
                    stream_id,
                    transaction_id: tx.id,
                    sender: profile.clone(),
                    gift: gift.clone(),
                    amount: tx.amount,
                    balance: tx.receiver_balance_after,
                    timestamp: tx.created_at,
                },
            )
            .await;
        if delivered == 0 {
            debug!("Host {} offline, gift {} recorded only", stream.host_id, tx.id);
        }

        self.dispatcher
            .broadcast(
                &room_group(stream_id),
                GatewayEvent::GiftSentNotification {
                    stream_id,
                    sender: profile,
                    gift: gift.clone(),
                    amount: tx.amount,
                    timestamp: tx.created_at,
                },
            )
            .await;

        self.dispatcher
            .deliver_to_user(
                sender,
                GatewayEvent::GiftSent {
                    stream_id,
                    transaction_id: tx.id,
                    gift_id: gift.id,
                    amount: tx.amount,
                    balance: tx.sender_balance_after,
                },
            )
            .await;

        Ok(transfer)
    }

    pub async fn catalog(&self) -> CoreResult<Vec<Gift>> {
        run_blocking(&self.db, |db| Ok(db.gift_catalog()?)).await
    }

    pub async fn ledger(&self, stream_id: StreamId, limit: u32) -> CoreResult<Vec<GiftTransaction>> {
        run_blocking(&self.db, move |db| Ok(db.ledger_for_stream(stream_id, limit)?)).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::Gateway;
    use glint_types::models::MediaKind;

    const HOST: UserId = UserId(1);
    const SENDER: UserId = UserId(2);
    const WATCHER: UserId = UserId(3);
    const STAR: i64 = 3;

    async fn setup() -> (Gateway, StreamId) {
        let db = Database::open_in_memory().unwrap();
        db.create_user(HOST, "Host", "host", 50).unwrap();
        db.create_user(SENDER, "Sender", "sender", 100).unwrap();
        db.create_user(WATCHER, "Watcher", "watcher", 0).unwrap();
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
    async fn gift_notifies_host_room_and_sender() {
        let (gateway, stream) = setup().await;
        let (_host, mut host_rx) = gateway.dispatcher.connect(HOST).await;
        let (sender, mut sender_rx) = gateway.dispatcher.connect(SENDER).await;
        let (watcher, mut watcher_rx) = gateway.dispatcher.connect(WATCHER).await;
        gateway.rooms.join_room(stream, &sender).await.unwrap();
        gateway.rooms.join_room(stream, &watcher).await.unwrap();
        drain(&mut host_rx);
        drain(&mut sender_rx);
        drain(&mut watcher_rx);

        let transfer = gateway.gifts.send_gift(stream, SENDER, STAR, 30).await.unwrap();
        assert_eq!(transfer.transaction.sender_balance_after, 70);
        assert_eq!(transfer.transaction.receiver_balance_after, 80);

        match drain(&mut host_rx).as_slice() {
            [GatewayEvent::GiftReceived { sender, amount, balance, gift, .. }] => {
                assert_eq!(sender.id, SENDER);
                assert_eq!((*amount, *balance), (30, 80));
                assert_eq!(gift.id, STAR);
            }
            other => panic!("unexpected host events {other:?}"),
        }

        match drain(&mut watcher_rx).as_slice() {
            [GatewayEvent::GiftSentNotification { amount: 30, .. }] => {}
            other => panic!("unexpected room events {other:?}"),
        }

        let sender_events = drain(&mut sender_rx);
        assert!(matches!(sender_events[0], GatewayEvent::GiftSentNotification { .. }));
        assert!(matches!(sender_events[1], GatewayEvent::GiftSent { balance: 70, .. }));

        let ledger = gateway.gifts.ledger(stream, 10).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].id, transfer.transaction.id);
    }

    #[tokio::test]
    async fn rejected_gifts_send_nothing() {
        let (gateway, stream) = setup().await;
        let (_host, mut host_rx) = gateway.dispatcher.connect(HOST).await;

        assert_eq!(
            gateway.gifts.send_gift(stream, SENDER, STAR, 500).await.unwrap_err(),
            CoreError::InsufficientBalance {
                balance: 100,
                required: 500
            }
        );
        assert_eq!(
            gateway.gifts.send_gift(stream, HOST, STAR, 1).await.unwrap_err(),
            CoreError::SelfGift
        );
        assert_eq!(
            gateway.gifts.send_gift(StreamId(77), SENDER, STAR, 1).await.unwrap_err(),
            CoreError::NotFound("stream")
        );
        assert!(drain(&mut host_rx).is_empty());
        assert!(!gateway.gifts.catalog().await.unwrap().is_empty());
    }
}
