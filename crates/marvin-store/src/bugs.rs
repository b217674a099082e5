use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::Connection;

use crate::error::{Result, StoreError};

pub const BUG_STATUSES: &[&str] = &["open", "in_progress", "resolved", "wontfix", "duplicate"];
pub const BUG_PRIORITIES: &[&str] = &["low", "normal", "high", "critical"];

#[derive(Debug, Clone)]
pub struct BugReport {
    pub id: i64,
    pub reporter: String,
    pub channel: Option<String>,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub created_at: String,
    pub updated_at: String,
    pub resolved_by: Option<String>,
    pub resolution_note: Option<String>,
}

pub struct BugStore {
    conn: Arc<Mutex<Connection>>,
}

impl BugStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub fn report(&self, reporter: &str, channel: Option<&str>, description: &str) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO bugs (reporter, channel, description, status, priority, created_at, updated_at)
             VALUES (?1, ?2, ?3, 'open', 'normal', ?4, ?4)",
            rusqlite::params![reporter, channel, description, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<BugReport> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, reporter, channel, description, status, priority,
                    created_at, updated_at, resolved_by, resolution_note
             FROM bugs WHERE id = ?1",
            [id],
            row_to_bug,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound { kind: "bug", id },
            other => StoreError::Database(other),
        })
    }

    /// List bugs, newest first, optionally filtered by status.
    pub fn list(&self, status: Option<&str>, limit: usize) -> Result<Vec<BugReport>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, reporter, channel, description, status, priority,
                    created_at, updated_at, resolved_by, resolution_note
             FROM bugs WHERE (?1 = '' OR status = ?1)
             ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![status.unwrap_or(""), limit as i64],
                row_to_bug,
            )?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn update(&self, id: i64, status: Option<&str>, priority: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE bugs SET status = COALESCE(?2, status),
                             priority = COALESCE(?3, priority),
                             updated_at = ?4
             WHERE id = ?1",
            rusqlite::params![id, status, priority, now],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound { kind: "bug", id });
        }
        Ok(())
    }

    pub fn resolve(&self, id: i64, resolved_by: &str, note: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE bugs SET status = 'resolved', resolved_by = ?2,
                             resolution_note = ?3, updated_at = ?4
             WHERE id = ?1",
            rusqlite::params![id, resolved_by, note, now],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound { kind: "bug", id });
        }
        Ok(())
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute("DELETE FROM bugs WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::NotFound { kind: "bug", id });
        }
        Ok(())
    }
}

fn row_to_bug(row: &rusqlite::Row<'_>) -> rusqlite::Result<BugReport> {
    Ok(BugReport {
        id: row.get(0)?,
        reporter: row.get(1)?,
        channel: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        resolved_by: row.get(8)?,
        resolution_note: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> BugStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        BugStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn report_defaults_to_open_normal() {
        let store = store();
        let id = store.report("alice", Some("#x"), "it broke").unwrap();
        let bug = store.get(id).unwrap();
        assert_eq!(bug.status, "open");
        assert_eq!(bug.priority, "normal");
    }

    #[test]
    fn resolve_records_resolver_and_note() {
        let store = store();
        let id = store.report("alice", None, "bug").unwrap();
        store.resolve(id, "admin", Some("fixed in v2")).unwrap();
        let bug = store.get(id).unwrap();
        assert_eq!(bug.status, "resolved");
        assert_eq!(bug.resolved_by.as_deref(), Some("admin"));
        assert_eq!(bug.resolution_note.as_deref(), Some("fixed in v2"));
    }

    #[test]
    fn update_missing_bug_is_not_found() {
        let store = store();
        let err = store.update(99, Some("wontfix"), None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn list_filters_by_status() {
        let store = store();
        let a = store.report("alice", None, "one").unwrap();
        store.report("bob", None, "two").unwrap();
        store.update(a, Some("wontfix"), None).unwrap();

        let open = store.list(Some("open"), 10).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].description, "two");
    }
}
