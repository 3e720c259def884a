use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::ids::UserId;

/// Length of the last-message snippet kept on the conversation.
pub const SNIPPET_LEN: usize = 50;

/// Content shown to a user in place of a message they deleted.
pub const DELETED_PLACEHOLDER: &str = "[This message was deleted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Pending,
    Accepted,
    Rejected,
    AutoAccepted,
    Blocked,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::AutoAccepted => "auto_accepted",
            Self::Blocked => "blocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            "auto_accepted" => Some(Self::AutoAccepted),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, Self::Accepted | Self::AutoAccepted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub url: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Seconds, for video.
    #[serde(default)]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    pub message_type: MessageType,
    pub sender_id: UserId,
    pub at: DateTime<Utc>,
}

/// A one-to-one conversation document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Always stored in ascending order.
    pub participants: [UserId; 2],
    pub status: ConversationStatus,
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub unread: BTreeMap<UserId, u32>,
    #[serde(default)]
    pub archived_by: BTreeSet<UserId>,
    pub blocked_by: Option<UserId>,
}

impl Conversation {
    pub fn new(initiator: UserId, recipient: UserId, now: DateTime<Utc>) -> CoreResult<Self> {
        if initiator == recipient {
            return Err(CoreError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            participants: ordered_pair(initiator, recipient),
            status: ConversationStatus::Pending,
            requested_by: initiator,
            created_at: now,
            updated_at: now,
            accepted_at: None,
            last_message: None,
            unread: BTreeMap::new(),
            archived_by: BTreeSet::new(),
            blocked_by: None,
        })
    }

    /// Unique key of the unordered participant pair.
    pub fn pair_key(a: UserId, b: UserId) -> String {
        let [lo, hi] = ordered_pair(a, b);
        format!("{lo}:{hi}")
    }

    pub fn key(&self) -> String {
        Self::pair_key(self.participants[0], self.participants[1])
    }

    pub fn is_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    /// The other participant, or `None` if `user` is not in this conversation.
    pub fn counterpart(&self, user: UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn unread_for(&self, user: UserId) -> u32 {
        self.unread.get(&user).copied().unwrap_or(0)
    }

    pub fn is_archived_for(&self, user: UserId) -> bool {
        self.archived_by.contains(&user)
    }

    fn require_participant(&self, user: UserId) -> CoreResult<UserId> {
        self.counterpart(user).ok_or(CoreError::NotFound("conversation"))
    }

    fn require_pending_recipient(&self, caller: UserId) -> CoreResult<()> {
        self.require_participant(caller)?;
        if self.status != ConversationStatus::Pending || caller == self.requested_by {
            return Err(CoreError::Forbidden);
        }
        Ok(())
    }

    pub fn accept(&mut self, caller: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        self.require_pending_recipient(caller)?;
        self.status = ConversationStatus::Accepted;
        self.accepted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn reject(&mut self, caller: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        self.require_pending_recipient(caller)?;
        self.status = ConversationStatus::Rejected;
        self.updated_at = now;
        Ok(())
    }

    pub fn block(&mut self, caller: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        self.require_participant(caller)?;
        if self.status == ConversationStatus::Blocked {
            return Err(CoreError::Forbidden);
        }
        self.status = ConversationStatus::Blocked;
        self.blocked_by = Some(caller);
        self.updated_at = now;
        Ok(())
    }

    pub fn unblock(&mut self, caller: UserId, now: DateTime<Utc>) -> CoreResult<()> {
        self.require_participant(caller)?;
        if self.status != ConversationStatus::Blocked || self.blocked_by != Some(caller) {
            return Err(CoreError::Forbidden);
        }
        self.status = ConversationStatus::Pending;
        self.blocked_by = None;
        self.updated_at = now;
        Ok(())
    }

    /// Flips the caller's archived flag and returns the new value.
    pub fn toggle_archive(&mut self, caller: UserId, now: DateTime<Utc>) -> CoreResult<bool> {
        self.require_participant(caller)?;
        let archived = if self.archived_by.remove(&caller) {
            false
        } else {
            self.archived_by.insert(caller);
            true
        };
        self.updated_at = now;
        Ok(archived)
    }

    /// Checks that `sender` may post right now and returns the receiver.
    ///
    /// A non-initiator posting into a pending conversation accepts it implicitly.
    pub fn authorize_send(&mut self, sender: UserId, now: DateTime<Utc>) -> CoreResult<UserId> {
        let receiver = self.counterpart(sender).ok_or(CoreError::Forbidden)?;
        match self.status {
            ConversationStatus::Accepted | ConversationStatus::AutoAccepted => {}
            ConversationStatus::Pending if sender != self.requested_by => {
                self.status = ConversationStatus::AutoAccepted;
                self.accepted_at = Some(now);
            }
            _ => return Err(CoreError::Forbidden),
        }
        Ok(receiver)
    }

    pub fn record_message(&mut self, message: &Message) {
        self.last_message = Some(LastMessage {
            content: message.content.chars().take(SNIPPET_LEN).collect(),
            message_type: message.message_type,
            sender_id: message.sender_id,
            at: message.created_at,
        });
        *self.unread.entry(message.receiver_id).or_insert(0) += 1;
        self.updated_at = message.created_at;
    }

    pub fn clear_unread(&mut self, caller: UserId) -> CoreResult<()> {
        self.require_participant(caller)?;
        self.unread.remove(&caller);
        Ok(())
    }

    /// Every user id this document refers to.
    pub fn referenced_users(&self) -> impl Iterator<Item = UserId> + '_ {
        self.participants
            .iter()
            .copied()
            .chain(Some(self.requested_by))
            .chain(self.last_message.as_ref().map(|m| m.sender_id))
            .chain(self.blocked_by)
    }
}

fn ordered_pair(a: UserId, b: UserId) -> [UserId; 2] {
    if a <= b { [a, b] } else { [b, a] }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadMarker {
    pub user_id: UserId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: UserId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: MessageType,
    pub media: Option<MediaDescriptor>,
    #[serde(default)]
    pub read_by: Vec<ReadMarker>,
    #[serde(default)]
    pub deleted_for: BTreeSet<UserId>,
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn is_deleted_for(&self, user: UserId) -> bool {
        self.deleted_for.contains(&user)
    }

    /// The message as `viewer` sees it: content and media are hidden if the
    /// viewer deleted it for themselves.
    pub fn masked_for(mut self, viewer: UserId) -> Self {
        if self.is_deleted_for(viewer) {
            self.content = DELETED_PLACEHOLDER.to_string();
            self.media = None;
        }
        self
    }

    /// Records a read marker for the receiver. Returns false if already read.
    pub fn mark_read_by(&mut self, user: UserId, now: DateTime<Utc>) -> bool {
        if user != self.receiver_id || self.read_by.iter().any(|r| r.user_id == user) {
            return false;
        }
        self.read_by.push(ReadMarker {
            user_id: user,
            read_at: now,
        });
        true
    }

    /// Adds the reaction, or removes it if the user already left the same one.
    /// Returns true when added.
    pub fn toggle_reaction(&mut self, user: UserId, emoji: &str, now: DateTime<Utc>) -> bool {
        let before = self.reactions.len();
        self.reactions
            .retain(|r| !(r.user_id == user && r.emoji == emoji));
        if self.reactions.len() != before {
            return false;
        }
        self.reactions.push(Reaction {
            user_id: user,
            emoji: emoji.to_string(),
            created_at: now,
        });
        true
    }

    /// Case-insensitive match over content and media file name.
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.content.to_lowercase().contains(needle)
            || self
                .media
                .as_ref()
                .and_then(|m| m.file_name.as_deref())
                .is_some_and(|name| name.to_lowercase().contains(needle))
    }

    pub fn referenced_users(&self) -> impl Iterator<Item = UserId> + '_ {
        [self.sender_id, self.receiver_id]
            .into_iter()
            .chain(self.read_by.iter().map(|r| r.user_id))
            .chain(self.reactions.iter().map(|r| r.user_id))
    }
}

/// A message as submitted by its sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMessage {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        match self.message_type {
            MessageType::Text if self.content.trim().is_empty() => Err(CoreError::BadRequest(
                "message content cannot be empty".into(),
            )),
            MessageType::Text => Ok(()),
            _ => match &self.media {
                Some(media) if !media.url.trim().is_empty() => Ok(()),
                _ => Err(CoreError::BadRequest(
                    "media messages require a media url".into(),
                )),
            },
        }
    }

    pub fn into_message(
        self,
        conversation_id: Uuid,
        sender_id: UserId,
        receiver_id: UserId,
        now: DateTime<Utc>,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            receiver_id,
            content: self.content.trim().to_string(),
            message_type: self.message_type,
            media: self.media,
            read_by: Vec::new(),
            deleted_for: BTreeSet::new(),
            reply_to: self.reply_to,
            reactions: Vec::new(),
            created_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: UserId = UserId(1);
    const B: UserId = UserId(2);
    const C: UserId = UserId(3);

    fn pending() -> Conversation {
        Conversation::new(A, B, Utc::now()).unwrap()
    }

    #[test]
    fn pair_key_is_order_independent() {
        assert_eq!(Conversation::pair_key(A, B), Conversation::pair_key(B, A));
        assert_eq!(Conversation::new(B, A, Utc::now()).unwrap().participants, [A, B]);
    }

    #[test]
    fn self_conversation_is_rejected() {
        assert!(matches!(
            Conversation::new(A, A, Utc::now()),
            Err(CoreError::BadRequest(_))
        ));
    }

    #[test]
    fn only_recipient_may_accept_pending() {
        let mut conv = pending();
        assert_eq!(conv.accept(A, Utc::now()), Err(CoreError::Forbidden));
        assert_eq!(conv.accept(C, Utc::now()), Err(CoreError::NotFound("conversation")));

        conv.accept(B, Utc::now()).unwrap();
        assert_eq!(conv.status, ConversationStatus::Accepted);
        assert!(conv.accepted_at.is_some());

        // no longer pending
        assert_eq!(conv.reject(B, Utc::now()), Err(CoreError::Forbidden));
    }

    #[test]
    fn recipient_send_while_pending_auto_accepts() {
        let mut conv = pending();
        assert_eq!(conv.authorize_send(A, Utc::now()), Err(CoreError::Forbidden));
        assert_eq!(conv.status, ConversationStatus::Pending);

        assert_eq!(conv.authorize_send(B, Utc::now()), Ok(A));
        assert_eq!(conv.status, ConversationStatus::AutoAccepted);
        assert_eq!(conv.authorize_send(A, Utc::now()), Ok(B));
    }

    #[test]
    fn block_and_unblock_rules() {
        let mut conv = pending();
        conv.accept(B, Utc::now()).unwrap();

        conv.block(A, Utc::now()).unwrap();
        assert_eq!(conv.status, ConversationStatus::Blocked);
        assert_eq!(conv.block(B, Utc::now()), Err(CoreError::Forbidden));
        assert_eq!(conv.authorize_send(B, Utc::now()), Err(CoreError::Forbidden));

        assert_eq!(conv.unblock(B, Utc::now()), Err(CoreError::Forbidden));
        conv.unblock(A, Utc::now()).unwrap();
        assert_eq!(conv.status, ConversationStatus::Pending);
        assert_eq!(conv.blocked_by, None);
    }

    #[test]
    fn rejected_conversation_can_still_be_blocked() {
        let mut conv = pending();
        conv.reject(B, Utc::now()).unwrap();
        assert_eq!(conv.authorize_send(B, Utc::now()), Err(CoreError::Forbidden));
        conv.block(B, Utc::now()).unwrap();
        assert_eq!(conv.blocked_by, Some(B));
    }

    #[test]
    fn archive_is_per_participant() {
        let mut conv = pending();
        assert_eq!(conv.toggle_archive(A, Utc::now()), Ok(true));
        assert!(conv.is_archived_for(A));
        assert!(!conv.is_archived_for(B));
        assert_eq!(conv.toggle_archive(A, Utc::now()), Ok(false));
        assert!(!conv.is_archived_for(A));
    }

    #[test]
    fn record_message_updates_summary_and_unread() {
        let mut conv = pending();
        let long = "x".repeat(80);
        let msg = NewMessage::text(long).into_message(conv.id, B, A, Utc::now());
        conv.record_message(&msg);

        let last = conv.last_message.as_ref().unwrap();
        assert_eq!(last.content.len(), SNIPPET_LEN);
        assert_eq!(last.sender_id, B);
        assert_eq!(conv.unread_for(A), 1);
        assert_eq!(conv.unread_for(B), 0);

        conv.clear_unread(A).unwrap();
        assert_eq!(conv.unread_for(A), 0);
    }

    #[test]
    fn soft_delete_masks_only_for_deleter() {
        let mut msg = NewMessage::text("hello").into_message(Uuid::new_v4(), A, B, Utc::now());
        msg.deleted_for.insert(A);

        assert_eq!(msg.clone().masked_for(A).content, DELETED_PLACEHOLDER);
        assert_eq!(msg.masked_for(B).content, "hello");
    }

    #[test]
    fn reactions_toggle() {
        let mut msg = NewMessage::text("hi").into_message(Uuid::new_v4(), A, B, Utc::now());
        assert!(msg.toggle_reaction(B, "🔥", Utc::now()));
        assert!(msg.toggle_reaction(A, "🔥", Utc::now()));
        assert!(!msg.toggle_reaction(B, "🔥", Utc::now()));
        assert_eq!(msg.reactions.len(), 1);
        assert_eq!(msg.reactions[0].user_id, A);
    }

    #[test]
    fn validation() {
        assert!(NewMessage::text("   ").validate().is_err());
        assert!(NewMessage::text("ok").validate().is_ok());

        let image = NewMessage {
            message_type: MessageType::Image,
            ..NewMessage::default()
        };
        assert!(image.validate().is_err());
    }
}
