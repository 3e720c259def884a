//! Document store for conversations and messages.
//!
//! Each record is a serde_json document. The few fields used for lookups
//! (participant pair, status, ordering keys) are projected into indexed
//! columns next to the document, and every mutation runs as a single
//! read-modify-write transaction on one document.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use glint_types::api::PageQuery;
use glint_types::chat::{Conversation, ConversationStatus, Message, NewMessage};
use glint_types::{CoreError, CoreResult, UserId};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{StoreResultExt, format_timestamp};

pub struct ChatStore {
    conn: Mutex<Connection>,
}

/// Which of a user's conversations to list.
#[derive(Debug, Clone)]
pub struct ConversationFilter {
    pub participant: UserId,
    /// `None` means any status.
    pub statuses: Option<Vec<ConversationStatus>>,
    /// Skip conversations this user started.
    pub exclude_requested_by: Option<UserId>,
    pub include_archived: bool,
    pub order: ConversationOrder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationOrder {
    NewestCreated,
    LatestMessage,
}

impl ConversationFilter {
    pub fn for_user(participant: UserId) -> Self {
        Self {
            participant,
            statuses: None,
            exclude_requested_by: None,
            include_archived: true,
            order: ConversationOrder::LatestMessage,
        }
    }

    fn matches(&self, conversation: &Conversation) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&conversation.status) {
                return false;
            }
        }
        if self.exclude_requested_by == Some(conversation.requested_by) {
            return false;
        }
        self.include_archived || !conversation.is_archived_for(self.participant)
    }
}

impl ChatStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn)?;

        info!("Chat store opened at {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_tx<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| CoreError::store(format!("chat store lock poisoned: {e}")))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .store()?;
        let value = f(&tx)?;
        tx.commit().store()?;
        Ok(value)
    }

    // -- Conversations --

    /// Returns the conversation for the unordered pair, creating it if needed.
    /// The boolean is true when a new conversation was created.
    pub fn create_or_get(
        &self,
        initiator: UserId,
        recipient: UserId,
        now: DateTime<Utc>,
    ) -> CoreResult<(Conversation, bool)> {
        let candidate = Conversation::new(initiator, recipient, now)?;

        self.with_tx(|tx| {
            let existing = tx
                .query_row(
                    "SELECT doc FROM conversations WHERE pair_key = ?1",
                    [candidate.key()],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .store()?;

            if let Some(doc) = existing {
                return Ok((serde_json::from_str(&doc).store()?, false));
            }

            insert_conversation(tx, &candidate)?;
            Ok((candidate, true))
        })
    }

    pub fn get(&self, id: Uuid) -> CoreResult<Option<Conversation>> {
        self.with_tx(|tx| load_conversation(tx, id))
    }

    /// Fetches a conversation the caller takes part in. Absent and foreign
    /// conversations look the same to the caller.
    pub fn get_for(&self, id: Uuid, caller: UserId) -> CoreResult<Conversation> {
        self.get(id)?
            .filter(|c| c.is_participant(caller))
            .ok_or(CoreError::NotFound("conversation"))
    }

    /// Atomically applies `f` to one conversation document.
    pub fn update<F, R>(&self, id: Uuid, f: F) -> CoreResult<(Conversation, R)>
    where
        F: FnOnce(&mut Conversation) -> CoreResult<R>,
    {
        self.with_tx(|tx| {
            let mut conversation =
                load_conversation(tx, id)?.ok_or(CoreError::NotFound("conversation"))?;
            let value = f(&mut conversation)?;
            save_conversation(tx, &conversation)?;
            Ok((conversation, value))
        })
    }

    pub fn list(
        &self,
        filter: &ConversationFilter,
        page: PageQuery,
    ) -> CoreResult<(Vec<Conversation>, u64)> {
        let order_column = match filter.order {
            ConversationOrder::NewestCreated => "created_at",
            ConversationOrder::LatestMessage => "last_message_at",
        };

        self.with_tx(|tx| {
            let mut stmt = tx
                .prepare(&format!(
                    "SELECT doc FROM conversations
                     WHERE participant_lo = ?1 OR participant_hi = ?1
                     ORDER BY {order_column} DESC, created_at DESC"
                ))
                .store()?;

            let docs = stmt
                .query_map([filter.participant.get()], |row| row.get::<_, String>(0))
                .store()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .store()?;

            let matching: Vec<Conversation> = docs
                .iter()
                .filter_map(|doc| decode::<Conversation>(doc))
                .filter(|c| filter.matches(c))
                .collect();

            let total = matching.len() as u64;
            let page = matching
                .into_iter()
                .skip(page.offset())
                .take(page.limit())
                .collect();
            Ok((page, total))
        })
    }

    /// Removes the conversation and every message in it.
    pub fn delete(&self, id: Uuid) -> CoreResult<bool> {
        self.with_tx(|tx| {
            let messages = tx
                .execute("DELETE FROM messages WHERE conversation_id = ?1", [id.to_string()])
                .store()?;
            let removed = tx
                .execute("DELETE FROM conversations WHERE id = ?1", [id.to_string()])
                .store()?;
            if removed == 1 {
                info!("Deleted conversation {} and {} messages", id, messages);
            }
            Ok(removed == 1)
        })
    }

    // -- Messages --

    /// Persists a message and updates the conversation summary in one
    /// transaction. Returns the updated conversation and the stored message.
    pub fn send_message(
        &self,
        conversation_id: Uuid,
        sender: UserId,
        new: NewMessage,
        now: DateTime<Utc>,
    ) -> CoreResult<(Conversation, Message)> {
        new.validate()?;

        self.with_tx(|tx| {
            let mut conversation = load_conversation(tx, conversation_id)?
                .ok_or(CoreError::NotFound("conversation"))?;
            let receiver = conversation.authorize_send(sender, now)?;

            if let Some(reply_to) = new.reply_to {
                let same_conversation = load_message(tx, reply_to)?
                    .is_some_and(|m| m.conversation_id == conversation_id);
                if !same_conversation {
                    return Err(CoreError::BadRequest(
                        "reply_to must reference a message in the same conversation".into(),
                    ));
                }
            }

            let message = new.into_message(conversation_id, sender, receiver, now);
            tx.execute(
                "INSERT INTO messages (id, conversation_id, created_at, doc) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![
                    message.id.to_string(),
                    conversation_id.to_string(),
                    format_timestamp(message.created_at),
                    serde_json::to_string(&message).store()?,
                ],
            )
            .store()?;

            conversation.record_message(&message);
            save_conversation(tx, &conversation)?;

            Ok((conversation, message))
        })
    }

    pub fn get_message(&self, id: Uuid) -> CoreResult<Option<Message>> {
        self.with_tx(|tx| load_message(tx, id))
    }

    /// Atomically applies `f` to one message document of a conversation.
    pub fn update_message<F, R>(&self, conversation_id: Uuid, id: Uuid, f: F) -> CoreResult<(Message, R)>
    where
        F: FnOnce(&mut Message) -> CoreResult<R>,
    {
        self.with_tx(|tx| {
            let mut message = load_message(tx, id)?
                .filter(|m| m.conversation_id == conversation_id)
                .ok_or(CoreError::NotFound("message"))?;
            let value = f(&mut message)?;
            save_message(tx, &message)?;
            Ok((message, value))
        })
    }

    /// One page of messages in chronological order, plus the total count.
    /// Pages are counted back from the newest message.
    pub fn messages(&self, conversation_id: Uuid, page: PageQuery) -> CoreResult<(Vec<Message>, u64)> {
        self.with_tx(|tx| {
            let total = count_messages(tx, conversation_id)?;

            let mut stmt = tx
                .prepare(
                    "SELECT doc FROM messages WHERE conversation_id = ?1
                     ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
                )
                .store()?;
            let docs = stmt
                .query_map(
                    rusqlite::params![
                        conversation_id.to_string(),
                        page.limit() as i64,
                        page.offset() as i64
                    ],
                    |row| row.get::<_, String>(0),
                )
                .store()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .store()?;

            let mut messages: Vec<Message> = docs.iter().filter_map(|d| decode(d)).collect();
            messages.reverse();
            Ok((messages, total))
        })
    }

    /// Case-insensitive search over content and media file names, newest first.
    /// Messages the viewer deleted for themselves never match.
    pub fn search(
        &self,
        conversation_id: Uuid,
        viewer: UserId,
        query: &str,
        page: PageQuery,
    ) -> CoreResult<(Vec<Message>, u64)> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(CoreError::BadRequest("search query is required".into()));
        }

        let all = self.with_tx(|tx| all_messages(tx, conversation_id))?;
        let matching: Vec<Message> = all
            .into_iter()
            .rev()
            .filter(|m| !m.is_deleted_for(viewer) && m.matches(&needle))
            .collect();
        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .collect();
        Ok((page, total))
    }

    pub fn count_messages(&self, conversation_id: Uuid) -> CoreResult<u64> {
        self.with_tx(|tx| count_messages(tx, conversation_id))
    }

    /// Message counts for several conversations in one query.
    pub fn count_messages_batch(&self, ids: &[Uuid]) -> CoreResult<HashMap<Uuid, u64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_tx(|tx| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT conversation_id, COUNT(*) FROM messages
                 WHERE conversation_id IN ({}) GROUP BY conversation_id",
                placeholders.join(", ")
            );
            let raw: Vec<String> = ids.iter().map(Uuid::to_string).collect();

            let mut stmt = tx.prepare(&sql).store()?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(raw.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .store()?
                .collect::<std::result::Result<Vec<_>, _>>()
                .store()?;

            Ok(rows
                .into_iter()
                .filter_map(|(id, count)| Some((id.parse().ok()?, count as u64)))
                .collect())
        })
    }

    /// Marks every message addressed to `reader` as read and zeroes their
    /// unread counter. Returns the number of newly read messages.
    pub fn mark_read(&self, conversation_id: Uuid, reader: UserId, now: DateTime<Utc>) -> CoreResult<usize> {
        self.with_tx(|tx| {
            let mut conversation = load_conversation(tx, conversation_id)?
                .ok_or(CoreError::NotFound("conversation"))?;
            conversation.clear_unread(reader)?;
            save_conversation(tx, &conversation)?;

            let mut newly_read = 0;
            for mut message in all_messages(tx, conversation_id)? {
                if message.mark_read_by(reader, now) {
                    save_message(tx, &message)?;
                    newly_read += 1;
                }
            }
            Ok(newly_read)
        })
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY,
            pair_key        TEXT NOT NULL UNIQUE,
            participant_lo  INTEGER NOT NULL,
            participant_hi  INTEGER NOT NULL,
            status          TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            last_message_at TEXT,
            doc             TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_lo
            ON conversations(participant_lo, last_message_at);

        CREATE INDEX IF NOT EXISTS idx_conversations_hi
            ON conversations(participant_hi, last_message_at);

        CREATE TABLE IF NOT EXISTS messages (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            id              TEXT NOT NULL UNIQUE,
            conversation_id TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            doc             TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, seq);
        ",
    )?;

    info!("Chat store migrations complete");
    Ok(())
}

fn decode<T: serde::de::DeserializeOwned>(doc: &str) -> Option<T> {
    serde_json::from_str(doc)
        .map_err(|e| warn!("Skipping corrupt chat document: {}", e))
        .ok()
}

fn insert_conversation(tx: &Transaction<'_>, conversation: &Conversation) -> CoreResult<()> {
    let [lo, hi] = conversation.participants;
    tx.execute(
        "INSERT INTO conversations
            (id, pair_key, participant_lo, participant_hi, status, created_at, last_message_at, doc)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            conversation.id.to_string(),
            conversation.key(),
            lo.get(),
            hi.get(),
            conversation.status.as_str(),
            format_timestamp(conversation.created_at),
            conversation.last_message.as_ref().map(|m| format_timestamp(m.at)),
            serde_json::to_string(conversation).store()?,
        ],
    )
    .map_err(|e| match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => CoreError::DuplicateConversation,
        _ => CoreError::store(e),
    })?;
    Ok(())
}

fn save_conversation(tx: &Transaction<'_>, conversation: &Conversation) -> CoreResult<()> {
    tx.execute(
        "UPDATE conversations SET status = ?2, last_message_at = ?3, doc = ?4 WHERE id = ?1",
        rusqlite::params![
            conversation.id.to_string(),
            conversation.status.as_str(),
            conversation.last_message.as_ref().map(|m| format_timestamp(m.at)),
            serde_json::to_string(conversation).store()?,
        ],
    )
    .store()?;
    Ok(())
}

fn load_conversation(tx: &Transaction<'_>, id: Uuid) -> CoreResult<Option<Conversation>> {
    let doc = tx
        .query_row(
            "SELECT doc FROM conversations WHERE id = ?1",
            [id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .store()?;
    doc.map(|d| serde_json::from_str(&d).store()).transpose()
}

fn load_message(tx: &Transaction<'_>, id: Uuid) -> CoreResult<Option<Message>> {
    let doc = tx
        .query_row(
            "SELECT doc FROM messages WHERE id = ?1",
            [id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()
        .store()?;
    doc.map(|d| serde_json::from_str(&d).store()).transpose()
}

fn save_message(tx: &Transaction<'_>, message: &Message) -> CoreResult<()> {
    tx.execute(
        "UPDATE messages SET doc = ?2 WHERE id = ?1",
        rusqlite::params![message.id.to_string(), serde_json::to_string(message).store()?],
    )
    .store()?;
    Ok(())
}

/// Every message of a conversation, oldest first.
fn all_messages(tx: &Transaction<'_>, conversation_id: Uuid) -> CoreResult<Vec<Message>> {
    let mut stmt = tx
        .prepare("SELECT doc FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC")
        .store()?;
    let docs = stmt
        .query_map([conversation_id.to_string()], |row| row.get::<_, String>(0))
        .store()?
        .collect::<std::result::Result<Vec<_>, _>>()
        .store()?;
    Ok(docs.iter().filter_map(|d| decode(d)).collect())
}

fn count_messages(tx: &Transaction<'_>, conversation_id: Uuid) -> CoreResult<u64> {
    let count: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id.to_string()],
            |row| row.get(0),
        )
        .store()?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use glint_types::chat::{DELETED_PLACEHOLDER, MediaDescriptor, MessageType};

    use super::*;

    const A: UserId = UserId(1);
    const B: UserId = UserId(2);
    const C: UserId = UserId(3);

    fn store() -> ChatStore {
        ChatStore::open_in_memory().unwrap()
    }

    fn accepted(store: &ChatStore) -> Conversation {
        let (conv, _) = store.create_or_get(A, B, Utc::now()).unwrap();
        store.update(conv.id, |c| c.accept(B, Utc::now())).unwrap().0
    }

    #[test]
    fn second_row_for_a_pair_is_a_duplicate() {
        let store = store();
        store.create_or_get(A, B, Utc::now()).unwrap();

        let twin = Conversation::new(B, A, Utc::now()).unwrap();
        assert_eq!(
            store.with_tx(|tx| insert_conversation(tx, &twin)),
            Err(CoreError::DuplicateConversation)
        );
    }

    #[test]
    fn create_or_get_is_idempotent_in_either_order() {
        let store = store();
        let (first, created) = store.create_or_get(A, B, Utc::now()).unwrap();
        assert!(created);

        let (again, created_again) = store.create_or_get(B, A, Utc::now()).unwrap();
        assert!(!created_again);
        assert_eq!(first.id, again.id);
        assert_eq!(again.requested_by, A);

        let (listed, total) = store.list(&ConversationFilter::for_user(A), PageQuery::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(listed[0].id, first.id);
    }

    #[test]
    fn send_updates_summary_and_unread() {
        let store = store();
        let conv = accepted(&store);

        let (updated, message) = store
            .send_message(conv.id, A, NewMessage::text("  hi there  "), Utc::now())
            .unwrap();

        assert_eq!(message.content, "hi there");
        assert_eq!(message.receiver_id, B);
        assert_eq!(updated.unread_for(B), 1);
        assert_eq!(updated.last_message.as_ref().unwrap().content, "hi there");

        let stored = store.get(conv.id).unwrap().unwrap();
        assert_eq!(stored, updated);
    }

    #[test]
    fn pending_send_auto_accepts_for_recipient_only() {
        let store = store();
        let (conv, _) = store.create_or_get(A, B, Utc::now()).unwrap();

        assert_eq!(
            store.send_message(conv.id, A, NewMessage::text("hey"), Utc::now()).unwrap_err(),
            CoreError::Forbidden
        );
        assert_eq!(store.count_messages(conv.id).unwrap(), 0);

        let (updated, _) = store.send_message(conv.id, B, NewMessage::text("hello"), Utc::now()).unwrap();
        assert_eq!(updated.status, ConversationStatus::AutoAccepted);
        assert_eq!(store.count_messages(conv.id).unwrap(), 1);
    }

    #[test]
    fn blocked_and_outsider_sends_are_forbidden() {
        let store = store();
        let conv = accepted(&store);
        store.update(conv.id, |c| c.block(B, Utc::now())).unwrap();

        assert_eq!(
            store.send_message(conv.id, A, NewMessage::text("x"), Utc::now()).unwrap_err(),
            CoreError::Forbidden
        );
        assert_eq!(
            store.send_message(conv.id, C, NewMessage::text("x"), Utc::now()).unwrap_err(),
            CoreError::Forbidden
        );
    }

    #[test]
    fn reply_must_stay_in_conversation() {
        let store = store();
        let conv = accepted(&store);
        let (other, _) = store.create_or_get(A, C, Utc::now()).unwrap();
        store.update(other.id, |c| c.accept(C, Utc::now())).unwrap();
        let (_, foreign) = store.send_message(other.id, C, NewMessage::text("elsewhere"), Utc::now()).unwrap();
        let (_, local) = store.send_message(conv.id, B, NewMessage::text("first"), Utc::now()).unwrap();

        let mut reply = NewMessage::text("reply");
        reply.reply_to = Some(foreign.id);
        assert!(matches!(
            store.send_message(conv.id, A, reply.clone(), Utc::now()),
            Err(CoreError::BadRequest(_))
        ));

        reply.reply_to = Some(local.id);
        let (_, stored) = store.send_message(conv.id, A, reply, Utc::now()).unwrap();
        assert_eq!(stored.reply_to, Some(local.id));
    }

    #[test]
    fn delete_cascades_to_messages() {
        let store = store();
        let conv = accepted(&store);
        store.send_message(conv.id, A, NewMessage::text("one"), Utc::now()).unwrap();
        store.send_message(conv.id, B, NewMessage::text("two"), Utc::now()).unwrap();

        assert!(store.delete(conv.id).unwrap());
        assert!(!store.delete(conv.id).unwrap());

        let (messages, total) = store.messages(conv.id, PageQuery::default()).unwrap();
        assert!(messages.is_empty());
        assert_eq!(total, 0);
        assert_eq!(store.get_for(conv.id, A).unwrap_err(), CoreError::NotFound("conversation"));
    }

    #[test]
    fn messages_page_back_from_newest_in_chronological_order() {
        let store = store();
        let conv = accepted(&store);
        for i in 0..5 {
            store.send_message(conv.id, A, NewMessage::text(format!("m{i}")), Utc::now()).unwrap();
        }

        let (latest, total) = store.messages(conv.id, PageQuery::new(1, 2)).unwrap();
        assert_eq!(total, 5);
        let contents: Vec<_> = latest.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m3", "m4"]);

        let (older, _) = store.messages(conv.id, PageQuery::new(2, 2)).unwrap();
        let contents: Vec<_> = older.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m1", "m2"]);
    }

    #[test]
    fn search_matches_content_and_file_names() {
        let store = store();
        let conv = accepted(&store);
        store.send_message(conv.id, A, NewMessage::text("See you at the Beach"), Utc::now()).unwrap();
        store.send_message(conv.id, B, NewMessage::text("sounds good"), Utc::now()).unwrap();
        let photo = NewMessage {
            message_type: MessageType::Image,
            media: Some(MediaDescriptor {
                url: "https://cdn/x.jpg".into(),
                file_id: None,
                file_name: Some("beach-day.jpg".into()),
                file_size: None,
                mime_type: Some("image/jpeg".into()),
                duration: None,
            }),
            ..NewMessage::default()
        };
        store.send_message(conv.id, B, photo, Utc::now()).unwrap();

        let (hits, total) = store.search(conv.id, A, "BEACH", PageQuery::default()).unwrap();
        assert_eq!(total, 2);
        assert_eq!(hits[0].message_type, MessageType::Image);
        assert!(store.search(conv.id, A, "  ", PageQuery::default()).is_err());
    }

    #[test]
    fn soft_delete_is_per_user() {
        let store = store();
        let conv = accepted(&store);
        let (_, message) = store.send_message(conv.id, A, NewMessage::text("oops"), Utc::now()).unwrap();

        store
            .update_message(conv.id, message.id, |m| Ok(m.deleted_for.insert(A)))
            .unwrap();

        let stored = store.get_message(message.id).unwrap().unwrap();
        assert_eq!(stored.content, "oops");
        assert_eq!(stored.clone().masked_for(A).content, DELETED_PLACEHOLDER);
        assert_eq!(stored.masked_for(B).content, "oops");

        let (_, hidden) = store.search(conv.id, A, "oops", PageQuery::default()).unwrap();
        let (_, visible) = store.search(conv.id, B, "oops", PageQuery::default()).unwrap();
        assert_eq!((hidden, visible), (0, 1));
    }

    #[test]
    fn mark_read_clears_unread_and_sets_markers() {
        let store = store();
        let conv = accepted(&store);
        store.send_message(conv.id, A, NewMessage::text("1"), Utc::now()).unwrap();
        store.send_message(conv.id, A, NewMessage::text("2"), Utc::now()).unwrap();
        store.send_message(conv.id, B, NewMessage::text("3"), Utc::now()).unwrap();

        assert_eq!(store.mark_read(conv.id, B, Utc::now()).unwrap(), 2);
        assert_eq!(store.mark_read(conv.id, B, Utc::now()).unwrap(), 0);

        let stored = store.get(conv.id).unwrap().unwrap();
        assert_eq!(stored.unread_for(B), 0);
        assert_eq!(stored.unread_for(A), 1);
        assert_eq!(store.mark_read(conv.id, C, Utc::now()).unwrap_err(), CoreError::NotFound("conversation"));
    }

    #[test]
    fn list_filters_incoming_requests_and_archived() {
        let store = store();
        let (incoming, _) = store.create_or_get(C, A, Utc::now()).unwrap();
        let (outgoing, _) = store.create_or_get(A, B, Utc::now()).unwrap();

        let requests = ConversationFilter {
            statuses: Some(vec![ConversationStatus::Pending]),
            exclude_requested_by: Some(A),
            order: ConversationOrder::NewestCreated,
            ..ConversationFilter::for_user(A)
        };
        let (listed, _) = store.list(&requests, PageQuery::default()).unwrap();
        assert_eq!(listed.iter().map(|c| c.id).collect::<Vec<_>>(), vec![incoming.id]);

        store.update(outgoing.id, |c| c.toggle_archive(A, Utc::now())).unwrap();
        let unarchived = ConversationFilter {
            include_archived: false,
            ..ConversationFilter::for_user(A)
        };
        let (listed, total) = store.list(&unarchived, PageQuery::default()).unwrap();
        assert_eq!(total, 1);
        assert_eq!(listed[0].id, incoming.id);

        // archive is per caller
        let (for_b, _) = store
            .list(&ConversationFilter { include_archived: false, ..ConversationFilter::for_user(B) }, PageQuery::default())
            .unwrap();
        assert_eq!(for_b.len(), 1);
    }

    #[test]
    fn message_counts_are_batched() {
        let store = store();
        let conv = accepted(&store);
        let (empty, _) = store.create_or_get(A, C, Utc::now()).unwrap();
        store.send_message(conv.id, A, NewMessage::text("x"), Utc::now()).unwrap();

        let counts = store.count_messages_batch(&[conv.id, empty.id]).unwrap();
        assert_eq!(counts.get(&conv.id), Some(&1));
        assert_eq!(counts.get(&empty.id), None);
    }
}
