use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::{ConversationStatus, MediaDescriptor, MessageType, Reaction, ReadMarker};
use crate::ids::UserId;
use crate::models::{MediaKind, UserProfile};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the WebSocket upgrade.
/// Tokens are issued by the external identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(default)]
    pub username: String,
    pub exp: usize,
}

// -- Pagination --

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl PageQuery {
    pub const MAX_LIMIT: u32 = 200;

    pub fn new(page: u32, limit: u32) -> Self {
        Self { page, limit }
    }

    pub fn limit(&self) -> usize {
        self.limit.clamp(1, Self::MAX_LIMIT) as usize
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }
}

impl Default for PageQuery {
    fn default() -> Self {
        Self::new(default_page(), default_limit())
    }
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    50
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub recipient_id: UserId,
}

// Query strings are decoded by serde_urlencoded, which cannot flatten
// numeric fields, so paging fields are repeated here.

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub include_archived: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
}

impl HistoryQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery::new(self.page, self.limit)
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_search_limit")]
    pub limit: u32,
}

impl SearchQuery {
    pub fn paging(&self) -> PageQuery {
        PageQuery::new(self.page, self.limit)
    }
}

fn default_search_limit() -> u32 {
    20
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleReactionRequest {
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastMessageView {
    pub content: String,
    pub message_type: MessageType,
    pub sender: UserProfile,
    pub at: DateTime<Utc>,
}

/// A conversation as seen by one participant, with profiles substituted in.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub participants: Vec<UserProfile>,
    pub status: ConversationStatus,
    pub requested_by: UserProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub last_message: Option<LastMessageView>,
    pub unread_count: u32,
    pub is_archived: bool,
    pub blocked_by: Option<UserProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: UserProfile,
    pub receiver: UserProfile,
    pub content: String,
    pub message_type: MessageType,
    pub media: Option<MediaDescriptor>,
    pub read_by: Vec<ReadMarker>,
    pub reply_to: Option<Uuid>,
    pub reactions: Vec<Reaction>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

// -- Live rooms --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartStreamRequest {
    pub media: MediaKind,
    #[serde(default)]
    pub stream_url: Option<String>,
}
