use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            user_id         INTEGER PRIMARY KEY,
            full_name       TEXT NOT NULL,
            username        TEXT NOT NULL DEFAULT '',
            profile_picture TEXT,
            balance         INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
            is_active       INTEGER NOT NULL DEFAULT 1,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS streams (
            stream_id       INTEGER PRIMARY KEY AUTOINCREMENT,
            host_id         INTEGER NOT NULL REFERENCES users(user_id),
            is_live         INTEGER NOT NULL DEFAULT 1,
            is_audio        INTEGER NOT NULL DEFAULT 0,
            stream_url      TEXT,
            viewer_count    INTEGER NOT NULL DEFAULT 0 CHECK (viewer_count >= 0),
            started_at      TEXT NOT NULL,
            ended_at        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_streams_live
            ON streams(is_live, is_audio, started_at);

        CREATE INDEX IF NOT EXISTS idx_streams_host
            ON streams(host_id, is_live);

        CREATE TABLE IF NOT EXISTS gifts (
            gift_id     INTEGER PRIMARY KEY,
            name        TEXT NOT NULL UNIQUE,
            coin_cost   INTEGER NOT NULL CHECK (coin_cost > 0),
            icon_url    TEXT
        );

        CREATE TABLE IF NOT EXISTS gift_transactions (
            id                      TEXT PRIMARY KEY,
            stream_id               INTEGER NOT NULL REFERENCES streams(stream_id),
            sender_id               INTEGER NOT NULL REFERENCES users(user_id),
            receiver_id             INTEGER NOT NULL REFERENCES users(user_id),
            gift_id                 INTEGER NOT NULL REFERENCES gifts(gift_id),
            amount                  INTEGER NOT NULL CHECK (amount > 0),
            sender_balance_after    INTEGER NOT NULL,
            receiver_balance_after  INTEGER NOT NULL,
            created_at              TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_gift_transactions_stream
            ON gift_transactions(stream_id, created_at);

        -- The ledger is append-only
        CREATE TRIGGER IF NOT EXISTS gift_transactions_no_update
            BEFORE UPDATE ON gift_transactions
            BEGIN SELECT RAISE(ABORT, 'gift ledger is append-only'); END;

        CREATE TRIGGER IF NOT EXISTS gift_transactions_no_delete
            BEFORE DELETE ON gift_transactions
            BEGIN SELECT RAISE(ABORT, 'gift ledger is append-only'); END;

        CREATE TABLE IF NOT EXISTS stream_comments (
            id          TEXT PRIMARY KEY,
            stream_id   INTEGER NOT NULL REFERENCES streams(stream_id),
            user_id     INTEGER NOT NULL REFERENCES users(user_id),
            body        TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_stream_comments_stream
            ON stream_comments(stream_id, created_at);

        -- Seed the default gift catalog
        INSERT OR IGNORE INTO gifts (gift_id, name, coin_cost) VALUES
            (1, 'rose', 1),
            (2, 'heart', 5),
            (3, 'star', 30),
            (4, 'crown', 100),
            (5, 'rocket', 500);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
