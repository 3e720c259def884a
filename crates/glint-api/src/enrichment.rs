//! Identity projection: conversation and message documents only carry user
//! ids, and current display fields are substituted in right before a
//! payload leaves the service, one batched lookup per response.

use std::collections::{BTreeSet, HashMap};

use glint_db::Database;
use glint_types::api::{ConversationView, LastMessageView, MessageView};
use glint_types::chat::{Conversation, Message};
use glint_types::models::UserProfile;
use glint_types::{CoreResult, UserId};

/// Profiles fetched for one response.
#[derive(Debug, Default)]
pub struct Profiles(HashMap<UserId, UserProfile>);

impl Profiles {
    pub fn fetch(db: &Database, ids: impl IntoIterator<Item = UserId>) -> CoreResult<Self> {
        let ids: Vec<UserId> = ids
            .into_iter()
            .filter(|id| *id != UserId::UNKNOWN)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok(Self(db.get_profiles(&ids)?))
    }

    pub fn for_conversations<'a>(
        db: &Database,
        conversations: impl IntoIterator<Item = &'a Conversation>,
    ) -> CoreResult<Self> {
        Self::fetch(db, conversations.into_iter().flat_map(Conversation::referenced_users))
    }

    pub fn for_messages<'a>(db: &Database, messages: impl IntoIterator<Item = &'a Message>) -> CoreResult<Self> {
        Self::fetch(db, messages.into_iter().flat_map(Message::referenced_users))
    }

    /// The user's profile, or the unknown-user placeholder.
    pub fn get(&self, id: UserId) -> UserProfile {
        self.0.get(&id).cloned().unwrap_or_else(UserProfile::unknown)
    }
}

pub fn conversation_view(
    conversation: &Conversation,
    viewer: UserId,
    profiles: &Profiles,
    message_count: Option<u64>,
) -> ConversationView {
    ConversationView {
        id: conversation.id,
        participants: conversation.participants.iter().map(|id| profiles.get(*id)).collect(),
        status: conversation.status,
        requested_by: profiles.get(conversation.requested_by),
        created_at: conversation.created_at,
        updated_at: conversation.updated_at,
        accepted_at: conversation.accepted_at,
        last_message: conversation.last_message.as_ref().map(|last| LastMessageView {
            content: last.content.clone(),
            message_type: last.message_type,
            sender: profiles.get(last.sender_id),
            at: last.at,
        }),
        unread_count: conversation.unread_for(viewer),
        is_archived: conversation.is_archived_for(viewer),
        blocked_by: conversation.blocked_by.map(|id| profiles.get(id)),
        message_count,
    }
}

/// The message as `viewer` sees it, with their soft delete applied.
pub fn message_view(message: Message, viewer: UserId, profiles: &Profiles) -> MessageView {
    let is_deleted = message.is_deleted_for(viewer);
    let message = message.masked_for(viewer);

    MessageView {
        id: message.id,
        conversation_id: message.conversation_id,
        sender: profiles.get(message.sender_id),
        receiver: profiles.get(message.receiver_id),
        content: message.content,
        message_type: message.message_type,
        media: message.media,
        read_by: message.read_by,
        reply_to: message.reply_to,
        reactions: message.reactions,
        is_deleted,
        created_at: message.created_at,
    }
}
