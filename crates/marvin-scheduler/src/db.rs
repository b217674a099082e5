use rusqlite::Connection;

use crate::error::Result;

/// Initialise the reminder schema in `conn`.
///
/// Two partial-style indices back the engine's polling query and the
/// join-check lookup so neither scans the table.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reminders (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            creator_nick      TEXT    NOT NULL,
            target_nick       TEXT    NOT NULL,
            channel           TEXT    NOT NULL,
            message           TEXT    NOT NULL,
            reminder_type     TEXT    NOT NULL,   -- 'time' | 'join'
            deliver_at        TEXT,               -- ISO-8601, NULL for join reminders
            recurrence        TEXT,               -- 'hourly' | 'daily' | 'weekly' | NULL
            status            TEXT    NOT NULL DEFAULT 'pending',
            created_at        TEXT    NOT NULL,
            delivered_at      TEXT,
            delivery_attempts INTEGER NOT NULL DEFAULT 0,
            expires_at        TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_reminders_pending_time
            ON reminders (status, reminder_type, deliver_at);
        CREATE INDEX IF NOT EXISTS idx_reminders_pending_join
            ON reminders (status, reminder_type, target_nick, channel);
        ",
    )?;
    Ok(())
}
