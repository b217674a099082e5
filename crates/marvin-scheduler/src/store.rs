use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::init_db;
use crate::error::{Result, SchedulerError};
use crate::types::{Recurrence, Reminder, ReminderStatus, ReminderType};

/// A creator may hold at most this many pending reminders.
pub const MAX_PENDING_PER_USER: usize = 20;
/// Offline delivery attempts before a time reminder auto-fails.
pub const MAX_DELIVERY_ATTEMPTS: u32 = 10;
/// Join reminders expire after 30 days, recurring ones after a year.
const JOIN_EXPIRY_DAYS: i64 = 30;
const RECURRING_EXPIRY_DAYS: i64 = 365;

#[derive(Debug, Clone)]
pub struct NewReminder {
    pub creator_nick: String,
    pub target_nick: String,
    pub channel: String,
    pub message: String,
    pub reminder_type: ReminderType,
    pub deliver_at: Option<DateTime<Utc>>,
    pub recurrence: Option<Recurrence>,
}

pub struct ReminderStore {
    conn: Arc<Mutex<Connection>>,
}

impl ReminderStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn create(&self, new: &NewReminder) -> Result<i64> {
        if new.message.trim().len() < 2 {
            return Err(SchedulerError::Invalid("message is too short".to_string()));
        }
        if new.channel.is_empty() {
            return Err(SchedulerError::Invalid("channel is required".to_string()));
        }
        match new.reminder_type {
            ReminderType::Time => {
                let at = new.deliver_at.ok_or_else(|| {
                    SchedulerError::Invalid("deliver_at is required for time reminders".to_string())
                })?;
                if at < Utc::now() {
                    return Err(SchedulerError::Invalid("deliver_at is in the past".to_string()));
                }
            }
            ReminderType::Join => {
                if new.deliver_at.is_some() {
                    return Err(SchedulerError::Invalid(
                        "join reminders take no deliver_at".to_string(),
                    ));
                }
            }
        }

        let now = Utc::now();
        let expires_at = match (new.reminder_type, new.recurrence) {
            (ReminderType::Join, _) => Some(now + Duration::days(JOIN_EXPIRY_DAYS)),
            (_, Some(_)) => Some(now + Duration::days(RECURRING_EXPIRY_DAYS)),
            _ => None,
        };

        let conn = self.conn.lock().unwrap();

        let pending: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reminders
             WHERE LOWER(creator_nick) = LOWER(?1) AND status = 'pending'",
            [&new.creator_nick],
            |row| row.get(0),
        )?;
        if pending as usize >= MAX_PENDING_PER_USER {
            return Err(SchedulerError::TooManyPending {
                max: MAX_PENDING_PER_USER,
            });
        }

        conn.execute(
            "INSERT INTO reminders
             (creator_nick, target_nick, channel, message, reminder_type,
              deliver_at, recurrence, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8, ?9)",
            rusqlite::params![
                new.creator_nick,
                new.target_nick,
                new.channel,
                new.message.trim(),
                new.reminder_type.as_str(),
                new.deliver_at.map(|t| t.to_rfc3339()),
                new.recurrence.map(|r| r.as_str()),
                now.to_rfc3339(),
                expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(
            reminder_id = id,
            creator = %new.creator_nick,
            target = %new.target_nick,
            kind = new.reminder_type.as_str(),
            "reminder created"
        );
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<Reminder> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            row_to_reminder,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => SchedulerError::NotFound { id },
            other => SchedulerError::Database(other),
        })
    }

    /// Pending reminders visible to `nick`. Staff see everyone's.
    pub fn list_pending(&self, nick: &str, staff: bool) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().unwrap();
        let (sql, limit) = if staff {
            (
                format!("{SELECT_COLUMNS} WHERE status = 'pending' ORDER BY created_at DESC LIMIT ?2"),
                25i64,
            )
        } else {
            (
                format!(
                    "{SELECT_COLUMNS} WHERE status = 'pending'
                       AND (LOWER(creator_nick) = LOWER(?1) OR LOWER(target_nick) = LOWER(?1))
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                15i64,
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![nick, limit], row_to_reminder)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn pending_count(&self, nick: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reminders
             WHERE status = 'pending'
               AND (LOWER(creator_nick) = LOWER(?1) OR LOWER(target_nick) = LOWER(?1))",
            [nick],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Cancel a pending reminder. Non-staff may only cancel reminders they
    /// created or are the target of.
    pub fn cancel(&self, id: i64, nick: &str, staff: bool) -> Result<()> {
        let reminder = self.get(id)?;
        if reminder.status != ReminderStatus::Pending {
            return Err(SchedulerError::Invalid(format!(
                "reminder #{id} is already {}",
                reminder.status.as_str()
            )));
        }
        if !staff
            && !reminder.creator_nick.eq_ignore_ascii_case(nick)
            && !reminder.target_nick.eq_ignore_ascii_case(nick)
        {
            return Err(SchedulerError::Invalid(
                "you can only cancel your own reminders".to_string(),
            ));
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE reminders SET status = 'cancelled' WHERE id = ?1",
            [id],
        )?;
        info!(reminder_id = id, by = %nick, "reminder cancelled");
        Ok(())
    }

    /// Due time reminders, oldest first. The engine processes these each tick.
    pub fn due_time_reminders(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reminder>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE status = 'pending' AND reminder_type = 'time' AND deliver_at <= ?1
             ORDER BY deliver_at ASC LIMIT ?2"
        ))?;
        let rows = stmt
            .query_map(
                rusqlite::params![now.to_rfc3339(), limit as i64],
                row_to_reminder,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn mark_delivered(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE reminders SET status = 'delivered', delivered_at = ?2 WHERE id = ?1",
            rusqlite::params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Bump the attempt counter; at `MAX_DELIVERY_ATTEMPTS` the reminder
    /// flips to failed. Returns the new status.
    pub fn record_failed_attempt(&self, id: i64) -> Result<ReminderStatus> {
        let reminder = self.get(id)?;
        let attempts = reminder.delivery_attempts + 1;
        let conn = self.conn.lock().unwrap();
        if attempts >= MAX_DELIVERY_ATTEMPTS {
            conn.execute(
                "UPDATE reminders SET status = 'failed', delivery_attempts = ?2 WHERE id = ?1",
                rusqlite::params![id, attempts],
            )?;
            warn!(reminder_id = id, attempts, "reminder failed: target never online");
            Ok(ReminderStatus::Failed)
        } else {
            conn.execute(
                "UPDATE reminders SET delivery_attempts = ?2 WHERE id = ?1",
                rusqlite::params![id, attempts],
            )?;
            Ok(ReminderStatus::Pending)
        }
    }

    /// Advance a recurring reminder one period past its current slot,
    /// keeping the id and resetting the attempt counter.
    pub fn advance_recurring(&self, id: i64, recurrence: Recurrence) -> Result<DateTime<Utc>> {
        let reminder = self.get(id)?;
        let current = reminder.deliver_at.ok_or_else(|| {
            SchedulerError::Invalid(format!("reminder #{id} has no deliver_at to advance"))
        })?;
        let next = recurrence.advance(current);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE reminders SET deliver_at = ?2, delivered_at = ?3, delivery_attempts = 0
             WHERE id = ?1",
            rusqlite::params![id, next.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        info!(reminder_id = id, next = %next, "recurring reminder advanced");
        Ok(next)
    }

    /// Pending join reminders for a joining user, delivered and marked in
    /// one transaction so a double join cannot deliver twice.
    pub fn join_check(&self, nick: &str, channel: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let matches: Vec<(i64, Reminder)> = {
            let mut stmt = tx.prepare(&format!(
                "{SELECT_COLUMNS}
                 WHERE status = 'pending' AND reminder_type = 'join'
                   AND LOWER(target_nick) = LOWER(?1) AND LOWER(channel) = LOWER(?2)
                 ORDER BY created_at ASC"
            ))?;
            let rows = stmt
                .query_map(rusqlite::params![nick, channel], row_to_reminder)?
                .filter_map(|r| r.ok())
                .map(|r| (r.id, r))
                .collect();
            rows
        };

        let now = Utc::now().to_rfc3339();
        let mut messages = Vec::with_capacity(matches.len());
        for (id, reminder) in &matches {
            tx.execute(
                "UPDATE reminders SET status = 'delivered', delivered_at = ?2 WHERE id = ?1",
                rusqlite::params![id, now],
            )?;
            messages.push(reminder.delivery_line());
        }
        tx.commit()?;
        if !messages.is_empty() {
            info!(count = messages.len(), %nick, %channel, "join reminders delivered");
        }
        Ok(messages)
    }

    /// Cancel pending reminders past their expiry. Returns how many.
    pub fn expire_overdue(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE reminders SET status = 'cancelled'
             WHERE status = 'pending' AND expires_at IS NOT NULL AND expires_at <= ?1",
            [now.to_rfc3339()],
        )?;
        if n > 0 {
            info!(count = n, "expired reminders cancelled");
        }
        Ok(n)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, creator_nick, target_nick, channel, message, reminder_type,
        deliver_at, recurrence, status, created_at, delivered_at, delivery_attempts, expires_at
 FROM reminders";

fn row_to_reminder(row: &rusqlite::Row<'_>) -> rusqlite::Result<Reminder> {
    let parse_time = |value: Option<String>| {
        value.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|t| t.with_timezone(&Utc)))
    };
    let type_str: String = row.get(5)?;
    let status_str: String = row.get(8)?;
    let recurrence: Option<String> = row.get(7)?;
    Ok(Reminder {
        id: row.get(0)?,
        creator_nick: row.get(1)?,
        target_nick: row.get(2)?,
        channel: row.get(3)?,
        message: row.get(4)?,
        reminder_type: type_str.parse().unwrap_or(ReminderType::Time),
        deliver_at: parse_time(row.get(6)?),
        recurrence: recurrence.and_then(|r| r.parse().ok()),
        status: status_str.parse().unwrap_or(ReminderStatus::Pending),
        created_at: parse_time(row.get::<_, Option<String>>(9)?).unwrap_or_else(Utc::now),
        delivered_at: parse_time(row.get(10)?),
        delivery_attempts: row.get::<_, i64>(11)? as u32,
        expires_at: parse_time(row.get(12)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ReminderStore {
        ReminderStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn time_reminder(creator: &str, target: &str, offset_secs: i64) -> NewReminder {
        NewReminder {
            creator_nick: creator.to_string(),
            target_nick: target.to_string(),
            channel: "#x".to_string(),
            message: "check the tea".to_string(),
            reminder_type: ReminderType::Time,
            deliver_at: Some(Utc::now() + Duration::seconds(offset_secs)),
            recurrence: None,
        }
    }

    #[test]
    fn time_reminder_requires_future_deliver_at() {
        let store = store();
        let mut new = time_reminder("bob", "bob", 60);
        new.deliver_at = None;
        assert!(store.create(&new).is_err());

        let past = time_reminder("bob", "bob", -60);
        assert!(store.create(&past).is_err());
    }

    #[test]
    fn join_reminder_rejects_deliver_at_and_gets_expiry() {
        let store = store();
        let mut new = time_reminder("bob", "carol", 60);
        new.reminder_type = ReminderType::Join;
        assert!(store.create(&new).is_err());

        new.deliver_at = None;
        let id = store.create(&new).unwrap();
        let reminder = store.get(id).unwrap();
        assert!(reminder.expires_at.is_some());
        assert!(reminder.deliver_at.is_none());
    }

    #[test]
    fn pending_cap_is_twenty_per_creator() {
        let store = store();
        for _ in 0..MAX_PENDING_PER_USER {
            store.create(&time_reminder("bob", "bob", 3600)).unwrap();
        }
        let err = store.create(&time_reminder("Bob", "bob", 3600)).unwrap_err();
        assert!(matches!(err, SchedulerError::TooManyPending { max: 20 }));
        // A different creator is unaffected.
        store.create(&time_reminder("carol", "carol", 3600)).unwrap();
    }

    #[test]
    fn attempts_auto_fail_at_ten() {
        let store = store();
        let id = store.create(&time_reminder("bob", "bob", 1)).unwrap();
        for _ in 0..(MAX_DELIVERY_ATTEMPTS - 1) {
            assert_eq!(
                store.record_failed_attempt(id).unwrap(),
                ReminderStatus::Pending
            );
        }
        assert_eq!(
            store.record_failed_attempt(id).unwrap(),
            ReminderStatus::Failed
        );
        assert_eq!(store.get(id).unwrap().status, ReminderStatus::Failed);
    }

    #[test]
    fn advance_recurring_preserves_id_and_resets_attempts() {
        let store = store();
        let mut new = time_reminder("bob", "bob", 60);
        new.recurrence = Some(Recurrence::Daily);
        let id = store.create(&new).unwrap();
        store.record_failed_attempt(id).unwrap();

        let before = store.get(id).unwrap();
        let next = store.advance_recurring(id, Recurrence::Daily).unwrap();
        let after = store.get(id).unwrap();

        assert_eq!(after.id, id);
        assert_eq!(after.delivery_attempts, 0);
        assert_eq!(next, before.deliver_at.unwrap() + Duration::days(1));
        assert_eq!(after.status, ReminderStatus::Pending);
    }

    #[test]
    fn join_check_is_case_insensitive_and_delivers_once() {
        let store = store();
        let new = NewReminder {
            creator_nick: "bob".to_string(),
            target_nick: "Carol".to_string(),
            channel: "#Lounge".to_string(),
            message: "ping me back".to_string(),
            reminder_type: ReminderType::Join,
            deliver_at: None,
            recurrence: None,
        };
        store.create(&new).unwrap();

        let first = store.join_check("carol", "#lounge").unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].contains("Reminder from bob"));

        let second = store.join_check("carol", "#lounge").unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn cancel_respects_ownership() {
        let store = store();
        let id = store.create(&time_reminder("bob", "carol", 3600)).unwrap();
        assert!(store.cancel(id, "mallory", false).is_err());
        store.cancel(id, "carol", false).unwrap();
        assert_eq!(store.get(id).unwrap().status, ReminderStatus::Cancelled);
    }

    #[test]
    fn due_query_only_returns_ripe_time_reminders() {
        let store = store();
        store.create(&time_reminder("bob", "bob", 2)).unwrap();
        store.create(&time_reminder("bob", "bob", 3600)).unwrap();

        let due = store
            .due_time_reminders(Utc::now() + Duration::seconds(10), 20)
            .unwrap();
        assert_eq!(due.len(), 1);
    }
}
