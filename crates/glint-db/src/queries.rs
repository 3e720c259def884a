use std::collections::HashMap;

use anyhow::Result;
use chrono::{SubsecRound, Utc};
use glint_types::models::{LiveRoom, MediaKind, Stream, StreamComment, UserProfile};
use glint_types::{StreamId, UserId};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use uuid::Uuid;

use crate::Database;
use crate::models::{StreamRow, UserRow, format_timestamp, parse_timestamp, uuid_column};

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: UserId,
        full_name: &str,
        username: &str,
        balance: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (user_id, full_name, username, balance) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.get(), full_name, username, balance],
            )?;
            Ok(())
        })
    }

    pub fn get_profile(&self, id: UserId) -> Result<Option<UserProfile>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, full_name, username, profile_picture
                     FROM users WHERE user_id = ?1 AND is_active = 1",
                    [id.get()],
                    UserRow::from_row,
                )
                .optional()?;
            Ok(row.map(UserProfile::from))
        })
    }

    /// Batch-fetch active profiles for a set of user ids in one query.
    pub fn get_profiles(&self, ids: &[UserId]) -> Result<HashMap<UserId, UserProfile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT user_id, full_name, username, profile_picture
                 FROM users WHERE is_active = 1 AND user_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let raw: Vec<i64> = ids.iter().map(|id| id.get()).collect();
            let profiles = stmt
                .query_map(rusqlite::params_from_iter(raw.iter()), UserRow::from_row)?
                .map(|row| row.map(|r| {
                    let profile = UserProfile::from(r);
                    (profile.id, profile)
                }))
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;

            Ok(profiles)
        })
    }

    pub fn get_balance(&self, id: UserId) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let balance = conn
                .query_row("SELECT balance FROM users WHERE user_id = ?1", [id.get()], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(balance)
        })
    }

    // -- Streams --

    /// Starts a live stream for `host`. Any stream the host still has live is
    /// ended first; their ids are returned alongside the new stream.
    pub fn start_stream(
        &self,
        host: UserId,
        media: MediaKind,
        stream_url: Option<&str>,
    ) -> Result<(Stream, Vec<StreamId>)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = format_timestamp(Utc::now());

            let replaced = {
                let mut stmt = tx.prepare(
                    "UPDATE streams SET is_live = 0, viewer_count = 0, ended_at = ?2
                     WHERE host_id = ?1 AND is_live = 1
                     RETURNING stream_id",
                )?;
                let ids = stmt
                    .query_map(rusqlite::params![host.get(), now], |row| {
                        row.get::<_, i64>(0).map(StreamId)
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                ids
            };

            let row = tx.query_row(
                &format!(
                    "INSERT INTO streams (host_id, is_live, is_audio, stream_url, started_at)
                     VALUES (?1, 1, ?2, ?3, ?4)
                     RETURNING {}",
                    StreamRow::COLUMNS
                ),
                rusqlite::params![host.get(), media.is_audio(), stream_url, now],
                StreamRow::from_row,
            )?;

            tx.commit()?;
            Ok((Stream::from(row), replaced))
        })
    }

    /// Marks the stream ended. Returns false if it was not live.
    pub fn end_stream(&self, id: StreamId) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE streams SET is_live = 0, viewer_count = 0, ended_at = ?2
                 WHERE stream_id = ?1 AND is_live = 1",
                rusqlite::params![id.get(), format_timestamp(Utc::now())],
            )?;
            Ok(changed == 1)
        })
    }

    pub fn get_stream(&self, id: StreamId) -> Result<Option<Stream>> {
        self.with_conn(|conn| Ok(query_stream(conn, id)?))
    }

    /// Durably increments the viewer count of a live stream. Returns the new
    /// count, or `None` if the stream is not live.
    pub fn increment_viewers(&self, id: StreamId) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let count = conn
                .query_row(
                    "UPDATE streams SET viewer_count = viewer_count + 1
                     WHERE stream_id = ?1 AND is_live = 1
                     RETURNING viewer_count",
                    [id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count)
        })
    }

    /// Durably decrements the viewer count, never below zero.
    pub fn decrement_viewers(&self, id: StreamId) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let count = conn
                .query_row(
                    "UPDATE streams SET viewer_count = MAX(viewer_count - 1, 0)
                     WHERE stream_id = ?1
                     RETURNING viewer_count",
                    [id.get()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(count)
        })
    }

    /// Live streams of one media kind with their host, newest first.
    pub fn list_live(&self, media: MediaKind) -> Result<Vec<LiveRoom>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT s.stream_id, s.host_id, s.is_live, s.is_audio, s.stream_url,
                        s.viewer_count, s.started_at, s.ended_at,
                        u.user_id, u.full_name, u.username, u.profile_picture
                 FROM streams s
                 INNER JOIN users u ON u.user_id = s.host_id AND u.is_active = 1
                 WHERE s.is_live = 1 AND s.is_audio = ?1
                 ORDER BY s.started_at DESC",
            )?;

            let rows = stmt
                .query_map([media.is_audio()], |row| {
                    let stream = StreamRow::from_row(row)?;
                    let host = UserRow {
                        user_id: row.get(8)?,
                        full_name: row.get(9)?,
                        username: row.get(10)?,
                        profile_picture: row.get(11)?,
                    };
                    Ok(LiveRoom {
                        stream: stream.into(),
                        host: host.into(),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Comments --

    pub fn insert_comment(&self, stream: StreamId, user: UserId, body: &str) -> Result<StreamComment> {
        let comment = StreamComment {
            id: Uuid::new_v4(),
            stream_id: stream,
            user_id: user,
            body: body.to_string(),
            created_at: Utc::now().trunc_subsecs(6),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO stream_comments (id, stream_id, user_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    comment.id.to_string(),
                    stream.get(),
                    user.get(),
                    body,
                    format_timestamp(comment.created_at)
                ],
            )?;
            Ok(())
        })?;

        Ok(comment)
    }

    pub fn get_comments(&self, stream: StreamId, limit: u32) -> Result<Vec<StreamComment>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, stream_id, user_id, body, created_at
                 FROM stream_comments WHERE stream_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;

            let rows = stmt
                .query_map(rusqlite::params![stream.get(), limit], |row| {
                    let created_at: String = row.get(4)?;
                    Ok(StreamComment {
                        id: uuid_column(row, 0)?,
                        stream_id: StreamId(row.get(1)?),
                        user_id: UserId(row.get(2)?),
                        body: row.get(3)?,
                        created_at: parse_timestamp(&created_at),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }
}

pub(crate) fn query_stream(conn: &Connection, id: StreamId) -> rusqlite::Result<Option<Stream>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM streams WHERE stream_id = ?1", StreamRow::COLUMNS),
            [id.get()],
            StreamRow::from_row,
        )
        .optional()?;
    Ok(row.map(Stream::from))
}
