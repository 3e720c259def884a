use anyhow::Result;
use chrono::{SubsecRound, Utc};
use glint_types::models::{Gift, GiftTransaction, Stream};
use glint_types::{CoreError, CoreResult, StreamId, UserId};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;
use uuid::Uuid;

use crate::Database;
use crate::models::{StoreResultExt, format_timestamp, parse_timestamp, uuid_column};
use crate::queries::query_stream;

/// Outcome of a committed gift transfer.
#[derive(Debug, Clone)]
pub struct GiftTransfer {
    pub transaction: GiftTransaction,
    pub gift: Gift,
    pub stream: Stream,
}

impl Database {
    pub fn gift_catalog(&self) -> Result<Vec<Gift>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT gift_id, name, coin_cost, icon_url FROM gifts ORDER BY coin_cost, gift_id")?;
            let gifts = stmt
                .query_map([], gift_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(gifts)
        })
    }

    /// Moves `amount` coins from `sender` to the stream's host and appends one
    /// ledger row, all inside a single write transaction.
    ///
    /// The transaction is opened with `BEGIN IMMEDIATE`, so it holds the write
    /// lock from the balance read through commit, and the debit itself is
    /// conditional on `balance >= amount`. Two concurrent sends from the same
    /// sender can therefore never both pass against a stale balance. Any
    /// failure drops the transaction, which rolls everything back.
    pub fn transfer_gift(
        &self,
        stream_id: StreamId,
        sender: UserId,
        gift_id: i64,
        amount: i64,
    ) -> CoreResult<GiftTransfer> {
        self.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .store()?;

            let stream = query_stream(&tx, stream_id)
                .store()?
                .ok_or(CoreError::NotFound("stream"))?;
            if stream.host_id == sender {
                return Err(CoreError::SelfGift);
            }
            if !stream.is_live {
                return Err(CoreError::NotLive);
            }
            if amount <= 0 {
                return Err(CoreError::InvalidGift);
            }
            let gift = query_gift(&tx, gift_id)
                .store()?
                .ok_or(CoreError::InvalidGift)?;

            let balance = query_balance(&tx, sender)
                .store()?
                .ok_or(CoreError::NotFound("user"))?;
            if balance < amount {
                return Err(CoreError::InsufficientBalance {
                    balance,
                    required: amount,
                });
            }

            let debited = tx
                .execute(
                    "UPDATE users SET balance = balance - ?1 WHERE user_id = ?2 AND balance >= ?1",
                    rusqlite::params![amount, sender.get()],
                )
                .store()?;
            if debited != 1 {
                return Err(CoreError::InsufficientBalance {
                    balance,
                    required: amount,
                });
            }

            let credited = tx
                .execute(
                    "UPDATE users SET balance = balance + ?1 WHERE user_id = ?2",
                    rusqlite::params![amount, stream.host_id.get()],
                )
                .store()?;
            if credited != 1 {
                return Err(CoreError::NotFound("user"));
            }

            let sender_balance_after = query_balance(&tx, sender)
                .store()?
                .ok_or(CoreError::NotFound("user"))?;
            let receiver_balance_after = query_balance(&tx, stream.host_id)
                .store()?
                .ok_or(CoreError::NotFound("user"))?;

            let transaction = GiftTransaction {
                id: Uuid::new_v4(),
                stream_id,
                sender_id: sender,
                receiver_id: stream.host_id,
                gift_id,
                amount,
                sender_balance_after,
                receiver_balance_after,
                created_at: Utc::now().trunc_subsecs(6),
            };

            tx.execute(
                "INSERT INTO gift_transactions
                    (id, stream_id, sender_id, receiver_id, gift_id, amount,
                     sender_balance_after, receiver_balance_after, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    transaction.id.to_string(),
                    stream_id.get(),
                    sender.get(),
                    stream.host_id.get(),
                    gift_id,
                    amount,
                    sender_balance_after,
                    receiver_balance_after,
                    format_timestamp(transaction.created_at),
                ],
            )
            .store()?;

            tx.commit().store()?;

            debug!(
                "Gift {} x{} from {} to {} on stream {}",
                gift.name, amount, sender, stream.host_id, stream_id
            );

            Ok(GiftTransfer {
                transaction,
                gift,
                stream,
            })
        })
    }

    /// Ledger rows of one stream, newest first.
    pub fn ledger_for_stream(&self, stream_id: StreamId, limit: u32) -> Result<Vec<GiftTransaction>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, stream_id, sender_id, receiver_id, gift_id, amount,
                        sender_balance_after, receiver_balance_after, created_at
                 FROM gift_transactions WHERE stream_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![stream_id.get(), limit], |row| {
                    let created_at: String = row.get(8)?;
                    Ok(GiftTransaction {
                        id: uuid_column(row, 0)?,
                        stream_id: StreamId(row.get(1)?),
                        sender_id: UserId(row.get(2)?),
                        receiver_id: UserId(row.get(3)?),
                        gift_id: row.get(4)?,
                        amount: row.get(5)?,
                        sender_balance_after: row.get(6)?,
                        receiver_balance_after: row.get(7)?,
                        created_at: parse_timestamp(&created_at),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

fn gift_from_row(row: &Row<'_>) -> rusqlite::Result<Gift> {
    Ok(Gift {
        id: row.get(0)?,
        name: row.get(1)?,
        coin_cost: row.get(2)?,
        icon_url: row.get(3)?,
    })
}

fn query_gift(conn: &Connection, gift_id: i64) -> rusqlite::Result<Option<Gift>> {
    conn.query_row(
        "SELECT gift_id, name, coin_cost, icon_url FROM gifts WHERE gift_id = ?1",
        [gift_id],
        gift_from_row,
    )
    .optional()
}

fn query_balance(conn: &Connection, user: UserId) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT balance FROM users WHERE user_id = ?1 AND is_active = 1",
        [user.get()],
        |row| row.get(0),
    )
    .optional()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use glint_types::models::MediaKind;

    use super::*;

    const HOST: UserId = UserId(1);
    const SENDER: UserId = UserId(2);
    const STAR: i64 = 3;

    fn setup(sender_balance: i64, host_balance: i64) -> (Database, StreamId) {
        let db = Database::open_in_memory().unwrap();
        db.create_user(HOST, "Host", "host", host_balance).unwrap();
        db.create_user(SENDER, "Fan", "fan", sender_balance).unwrap();
        let (stream, _) = db.start_stream(HOST, MediaKind::Video, None).unwrap();
        (db, stream.id)
    }

    #[test]
    fn transfer_moves_coins_and_records_resulting_balances() {
        let (db, stream) = setup(100, 50);

        let transfer = db.transfer_gift(stream, SENDER, STAR, 30).unwrap();
        assert_eq!(transfer.transaction.sender_balance_after, 70);
        assert_eq!(transfer.transaction.receiver_balance_after, 80);
        assert_eq!(transfer.gift.name, "star");

        assert_eq!(db.get_balance(SENDER).unwrap(), Some(70));
        assert_eq!(db.get_balance(HOST).unwrap(), Some(80));

        let ledger = db.ledger_for_stream(stream, 10).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0], transfer.transaction);
    }

    #[test]
    fn validation_failures_leave_balances_untouched() {
        let (db, stream) = setup(20, 0);

        assert_eq!(db.transfer_gift(stream, HOST, STAR, 5).unwrap_err(), CoreError::SelfGift);
        assert_eq!(db.transfer_gift(stream, SENDER, 999, 5).unwrap_err(), CoreError::InvalidGift);
        assert_eq!(db.transfer_gift(stream, SENDER, STAR, 0).unwrap_err(), CoreError::InvalidGift);
        assert_eq!(
            db.transfer_gift(stream, SENDER, STAR, 30).unwrap_err(),
            CoreError::InsufficientBalance {
                balance: 20,
                required: 30
            }
        );
        assert_eq!(
            db.transfer_gift(StreamId(404), SENDER, STAR, 5).unwrap_err(),
            CoreError::NotFound("stream")
        );

        db.end_stream(stream).unwrap();
        assert_eq!(db.transfer_gift(stream, SENDER, STAR, 5).unwrap_err(), CoreError::NotLive);

        assert_eq!(db.get_balance(SENDER).unwrap(), Some(20));
        assert_eq!(db.get_balance(HOST).unwrap(), Some(0));
        assert!(db.ledger_for_stream(stream, 10).unwrap().is_empty());
    }

    #[test]
    fn missing_host_row_rolls_back_the_debit() {
        let (db, stream) = setup(100, 0);
        db.with_conn(|conn| {
            conn.execute("PRAGMA foreign_keys = OFF", [])?;
            conn.execute("DELETE FROM users WHERE user_id = ?1", [HOST.get()])?;
            Ok(())
        })
        .unwrap();

        assert_eq!(
            db.transfer_gift(stream, SENDER, STAR, 30).unwrap_err(),
            CoreError::NotFound("user")
        );
        assert_eq!(db.get_balance(SENDER).unwrap(), Some(100));
        assert!(db.ledger_for_stream(stream, 10).unwrap().is_empty());
    }

    #[test]
    fn concurrent_sends_cannot_double_spend() {
        let (db, stream) = setup(50, 0);
        let db = Arc::new(db);
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let db = db.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    db.transfer_gift(stream, SENDER, STAR, 30)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let insufficient = results
            .iter()
            .filter(|r| matches!(r, Err(CoreError::InsufficientBalance { .. })))
            .count();

        assert_eq!((ok, insufficient), (1, 1));
        assert_eq!(db.get_balance(SENDER).unwrap(), Some(20));
        assert_eq!(db.get_balance(HOST).unwrap(), Some(30));
        assert_eq!(db.ledger_for_stream(stream, 10).unwrap().len(), 1);
    }

    #[test]
    fn ledger_rows_are_append_only() {
        let (db, stream) = setup(100, 0);
        db.transfer_gift(stream, SENDER, STAR, 10).unwrap();

        let update = db.with_conn(|conn| {
            conn.execute("UPDATE gift_transactions SET amount = 1", [])?;
            Ok(())
        });
        assert!(update.is_err());
    }

    #[test]
    fn catalog_is_seeded() {
        let db = Database::open_in_memory().unwrap();
        let catalog = db.gift_catalog().unwrap();
        assert_eq!(catalog.first().map(|g| g.name.as_str()), Some("rose"));
        assert!(catalog.iter().any(|g| g.id == STAR));
    }
}
