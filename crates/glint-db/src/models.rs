//! Row types and conversions. These map directly to SQLite rows and are
//! turned into glint-types models before leaving the crate.

use chrono::{DateTime, SecondsFormat, Utc};
use glint_types::models::{MediaKind, Stream, UserProfile};
use glint_types::{CoreError, CoreResult, StreamId, UserId};
use rusqlite::Row;
use rusqlite::types::Type;
use tracing::warn;
use uuid::Uuid;

pub struct UserRow {
    pub user_id: i64,
    pub full_name: String,
    pub username: String,
    pub profile_picture: Option<String>,
}

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            full_name: row.get(1)?,
            username: row.get(2)?,
            profile_picture: row.get(3)?,
        })
    }
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            id: UserId(row.user_id),
            name: row.full_name,
            username: row.username,
            avatar: row.profile_picture,
        }
    }
}

pub struct StreamRow {
    pub stream_id: i64,
    pub host_id: i64,
    pub is_live: bool,
    pub is_audio: bool,
    pub stream_url: Option<String>,
    pub viewer_count: i64,
    pub started_at: String,
    pub ended_at: Option<String>,
}

impl StreamRow {
    pub(crate) const COLUMNS: &'static str =
        "stream_id, host_id, is_live, is_audio, stream_url, viewer_count, started_at, ended_at";

    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            stream_id: row.get(0)?,
            host_id: row.get(1)?,
            is_live: row.get(2)?,
            is_audio: row.get(3)?,
            stream_url: row.get(4)?,
            viewer_count: row.get(5)?,
            started_at: row.get(6)?,
            ended_at: row.get(7)?,
        })
    }
}

impl From<StreamRow> for Stream {
    fn from(row: StreamRow) -> Self {
        Stream {
            id: StreamId(row.stream_id),
            host_id: UserId(row.host_id),
            is_live: row.is_live,
            media: if row.is_audio {
                MediaKind::Audio
            } else {
                MediaKind::Video
            },
            stream_url: row.stream_url,
            viewer_count: row.viewer_count,
            started_at: parse_timestamp(&row.started_at),
            ended_at: row.ended_at.as_deref().map(parse_timestamp),
        }
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; it is UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

/// Reads a text id column. A value that is not a UUID fails the row.
pub fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| {
        warn!("Corrupt id '{}' in column {}", raw, idx);
        rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
    })
}

/// Maps raw SQLite failures into the retryable store error.
pub(crate) trait StoreResultExt<T> {
    fn store(self) -> CoreResult<T>;
}

impl<T> StoreResultExt<T> for rusqlite::Result<T> {
    fn store(self) -> CoreResult<T> {
        self.map_err(CoreError::store)
    }
}

impl<T> StoreResultExt<T> for serde_json::Result<T> {
    fn store(self) -> CoreResult<T> {
        self.map_err(CoreError::store)
    }
}
