use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::Result;

/// A persisted channel message or IRC event. Immutable once written.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: i64,
    pub timestamp: String,
    pub channel: String,
    pub nick: String,
    pub content: String,
    pub is_bot: bool,
    pub event_type: Option<String>,
}

/// Filter for history queries. `since`/`until` bound the window; a `None`
/// bound is open-ended.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub channel: String,
    pub search_term: Option<String>,
    pub nick: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
}

pub struct MessageStore {
    conn: Arc<Mutex<Connection>>,
}

impl MessageStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Append one message. The store is the single writer of this table.
    pub fn append(
        &self,
        channel: &str,
        nick: &str,
        content: &str,
        is_bot: bool,
        event_type: Option<&str>,
    ) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO messages (timestamp, channel, nick, content, is_bot, event_type)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                channel,
                nick,
                content,
                is_bot as i64,
                event_type,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Keyword/windowed history query. Results come back oldest-first.
    pub fn query(&self, q: &MessageQuery) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT id, timestamp, channel, nick, content, is_bot, event_type
             FROM messages WHERE channel = ?1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(q.channel.clone())];

        if let Some(ref term) = q.search_term {
            params.push(Box::new(format!("%{term}%")));
            sql.push_str(&format!(" AND content LIKE ?{}", params.len()));
        }
        if let Some(ref nick) = q.nick {
            params.push(Box::new(nick.clone()));
            sql.push_str(&format!(" AND nick = ?{} COLLATE NOCASE", params.len()));
        }
        if let Some(since) = q.since {
            params.push(Box::new(since.to_rfc3339()));
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }
        if let Some(until) = q.until {
            params.push(Box::new(until.to_rfc3339()));
            sql.push_str(&format!(" AND timestamp <= ?{}", params.len()));
        }

        let limit = if q.limit == 0 { 200 } else { q.limit };
        sql.push_str(&format!(" ORDER BY timestamp DESC LIMIT {limit}"));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut rows: Vec<StoredMessage> = stmt
            .query_map(param_refs.as_slice(), row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        rows.reverse();
        Ok(rows)
    }

    /// Count matching messages without materialising them.
    pub fn count(&self, q: &MessageQuery) -> Result<u64> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from("SELECT COUNT(*) FROM messages WHERE channel = ?1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(q.channel.clone())];

        if let Some(ref term) = q.search_term {
            params.push(Box::new(format!("%{term}%")));
            sql.push_str(&format!(" AND content LIKE ?{}", params.len()));
        }
        if let Some(ref nick) = q.nick {
            params.push(Box::new(nick.clone()));
            sql.push_str(&format!(" AND nick = ?{} COLLATE NOCASE", params.len()));
        }
        if let Some(since) = q.since {
            params.push(Box::new(since.to_rfc3339()));
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Messages with id strictly greater than `after_id`, oldest first.
    /// Used by the embedding migration job's high-water mark.
    pub fn after_id(&self, after_id: i64, limit: usize) -> Result<Vec<StoredMessage>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, channel, nick, content, is_bot, event_type
             FROM messages WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![after_id, limit as i64], row_to_message)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        channel: row.get(2)?,
        nick: row.get(3)?,
        content: row.get(4)?,
        is_bot: row.get::<_, i64>(5)? != 0,
        event_type: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> MessageStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        MessageStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn append_and_query_by_channel() {
        let store = store();
        store.append("#x", "alice", "hello world", false, None).unwrap();
        store.append("#y", "bob", "other channel", false, None).unwrap();

        let rows = store
            .query(&MessageQuery {
                channel: "#x".to_string(),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].nick, "alice");
    }

    #[test]
    fn keyword_search_is_substring_match() {
        let store = store();
        store.append("#x", "alice", "rust is great", false, None).unwrap();
        store.append("#x", "bob", "python too", false, None).unwrap();

        let rows = store
            .query(&MessageQuery {
                channel: "#x".to_string(),
                search_term: Some("rust".to_string()),
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "rust is great");
    }

    #[test]
    fn after_id_returns_only_newer_rows() {
        let store = store();
        let first = store.append("#x", "alice", "one", false, None).unwrap();
        store.append("#x", "alice", "two", false, None).unwrap();

        let rows = store.after_id(first, 100).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "two");
    }

    #[test]
    fn count_matches_query() {
        let store = store();
        for i in 0..5 {
            store
                .append("#x", "alice", &format!("msg {i}"), false, None)
                .unwrap();
        }
        let count = store
            .count(&MessageQuery {
                channel: "#x".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(count, 5);
    }
}
