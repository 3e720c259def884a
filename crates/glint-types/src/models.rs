use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{StreamId, UserId};

/// Display fields of a user as read from the relational store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Placeholder substituted for users that no longer exist.
    pub fn unknown() -> Self {
        Self {
            id: UserId::UNKNOWN,
            name: "Unknown User".to_string(),
            username: String::new(),
            avatar: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn is_audio(self) -> bool {
        matches!(self, Self::Audio)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stream {
    pub id: StreamId,
    pub host_id: UserId,
    pub is_live: bool,
    pub media: MediaKind,
    pub stream_url: Option<String>,
    pub viewer_count: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Entry of the live room directory: a live stream with its host's profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveRoom {
    pub stream: Stream,
    pub host: UserProfile,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gift {
    pub id: i64,
    pub name: String,
    pub coin_cost: i64,
    pub icon_url: Option<String>,
}

/// One row of the append-only gift ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GiftTransaction {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub gift_id: i64,
    pub amount: i64,
    pub sender_balance_after: i64,
    pub receiver_balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamComment {
    pub id: Uuid,
    pub stream_id: StreamId,
    pub user_id: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
}
