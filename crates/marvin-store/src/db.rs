use rusqlite::Connection;

use crate::error::Result;

/// Initialise the relational schema. Safe to call on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp   TEXT    NOT NULL,
            channel     TEXT    NOT NULL,
            nick        TEXT    NOT NULL,
            content     TEXT    NOT NULL,
            is_bot      INTEGER NOT NULL DEFAULT 0,
            event_type  TEXT                -- NULL for plain messages; KICK/BAN/QUIT/... for IRC events
        );
        CREATE INDEX IF NOT EXISTS idx_messages_channel_time
            ON messages (channel, timestamp);

        CREATE TABLE IF NOT EXISTS usage_tracking (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp               TEXT    NOT NULL,
            request_id              TEXT    NOT NULL,
            nick                    TEXT    NOT NULL,
            channel                 TEXT,
            model                   TEXT    NOT NULL,
            input_tokens            INTEGER NOT NULL DEFAULT 0,
            cached_tokens           INTEGER NOT NULL DEFAULT 0,
            output_tokens           INTEGER NOT NULL DEFAULT 0,
            cost_usd                REAL    NOT NULL DEFAULT 0,
            tool_calls              INTEGER NOT NULL DEFAULT 0,
            web_search_calls        INTEGER NOT NULL DEFAULT 0,
            code_interpreter_calls  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_usage_nick_time
            ON usage_tracking (nick, timestamp);

        CREATE TABLE IF NOT EXISTS bugs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            reporter        TEXT NOT NULL,
            channel         TEXT,
            description     TEXT NOT NULL,
            status          TEXT NOT NULL DEFAULT 'open',
            priority        TEXT NOT NULL DEFAULT 'normal',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            resolved_by     TEXT,
            resolution_note TEXT
        );
        ",
    )?;
    Ok(())
}
