use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;

use crate::error::Result;

/// One append-only ledger row, written once per completed request with the
/// totals summed across every provider turn.
#[derive(Debug, Clone)]
pub struct UsageRecord {
    pub request_id: String,
    pub nick: String,
    pub channel: Option<String>,
    pub model: String,
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub tool_calls: u64,
    pub web_search_calls: u64,
    pub code_interpreter_calls: u64,
}

/// Aggregated view for the usage-stats tool.
#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    pub requests: u64,
    pub input_tokens: u64,
    pub cached_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub tool_calls: u64,
    pub web_search_calls: u64,
}

pub struct UsageStore {
    conn: Arc<Mutex<Connection>>,
}

impl UsageStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Persist one record. `cached_tokens` is clamped to `input_tokens` so
    /// the ledger invariant holds even against a misbehaving provider.
    pub fn record(&self, rec: &UsageRecord) -> Result<()> {
        let cached = rec.cached_tokens.min(rec.input_tokens);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO usage_tracking
             (timestamp, request_id, nick, channel, model, input_tokens, cached_tokens,
              output_tokens, cost_usd, tool_calls, web_search_calls, code_interpreter_calls)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                Utc::now().to_rfc3339(),
                rec.request_id,
                rec.nick,
                rec.channel,
                rec.model,
                rec.input_tokens as i64,
                cached as i64,
                rec.output_tokens as i64,
                rec.cost_usd,
                rec.tool_calls as i64,
                rec.web_search_calls as i64,
                rec.code_interpreter_calls as i64,
            ],
        )?;
        info!(
            request_id = %rec.request_id,
            input = rec.input_tokens,
            cached,
            output = rec.output_tokens,
            cost_usd = rec.cost_usd,
            "usage recorded"
        );
        Ok(())
    }

    /// Summed usage for a nick (or everyone when `nick` is None) since a
    /// point in time, optionally filtered by channel.
    pub fn summary(
        &self,
        nick: Option<&str>,
        channel: Option<&str>,
        since: Option<DateTime<Utc>>,
    ) -> Result<UsageSummary> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT COUNT(*),
                    COALESCE(SUM(input_tokens), 0),
                    COALESCE(SUM(cached_tokens), 0),
                    COALESCE(SUM(output_tokens), 0),
                    COALESCE(SUM(cost_usd), 0),
                    COALESCE(SUM(tool_calls), 0),
                    COALESCE(SUM(web_search_calls), 0)
             FROM usage_tracking WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(nick) = nick {
            params.push(Box::new(nick.to_string()));
            sql.push_str(&format!(" AND nick = ?{} COLLATE NOCASE", params.len()));
        }
        if let Some(channel) = channel {
            params.push(Box::new(channel.to_string()));
            sql.push_str(&format!(" AND channel = ?{}", params.len()));
        }
        if let Some(since) = since {
            params.push(Box::new(since.to_rfc3339()));
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let summary = conn.query_row(&sql, param_refs.as_slice(), |row| {
            Ok(UsageSummary {
                requests: row.get::<_, i64>(0)? as u64,
                input_tokens: row.get::<_, i64>(1)? as u64,
                cached_tokens: row.get::<_, i64>(2)? as u64,
                output_tokens: row.get::<_, i64>(3)? as u64,
                cost_usd: row.get(4)?,
                tool_calls: row.get::<_, i64>(5)? as u64,
                web_search_calls: row.get::<_, i64>(6)? as u64,
            })
        })?;
        Ok(summary)
    }

    /// Top spenders since a point in time, most expensive first.
    pub fn top_users(
        &self,
        since: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<(String, f64, u64)>> {
        let conn = self.conn.lock().unwrap();
        let since_str = since.map(|s| s.to_rfc3339()).unwrap_or_default();
        let mut stmt = conn.prepare(
            "SELECT nick, SUM(cost_usd), COUNT(*) FROM usage_tracking
             WHERE (?1 = '' OR timestamp >= ?1)
             GROUP BY nick COLLATE NOCASE
             ORDER BY SUM(cost_usd) DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(rusqlite::params![since_str, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, i64>(2)? as u64,
                ))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    fn store() -> UsageStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        UsageStore::new(Arc::new(Mutex::new(conn)))
    }

    fn record(nick: &str, input: u64, cached: u64, cost: f64) -> UsageRecord {
        UsageRecord {
            request_id: "req-1".to_string(),
            nick: nick.to_string(),
            channel: Some("#x".to_string()),
            model: "gpt-5.2".to_string(),
            input_tokens: input,
            cached_tokens: cached,
            output_tokens: 50,
            cost_usd: cost,
            tool_calls: 2,
            web_search_calls: 1,
            code_interpreter_calls: 0,
        }
    }

    #[test]
    fn cached_is_clamped_to_input() {
        let store = store();
        store.record(&record("alice", 100, 500, 0.01)).unwrap();
        let summary = store.summary(Some("alice"), None, None).unwrap();
        assert_eq!(summary.input_tokens, 100);
        assert_eq!(summary.cached_tokens, 100);
    }

    #[test]
    fn summary_aggregates_per_nick() {
        let store = store();
        store.record(&record("alice", 100, 10, 0.01)).unwrap();
        store.record(&record("alice", 200, 20, 0.02)).unwrap();
        store.record(&record("bob", 50, 0, 0.5)).unwrap();

        let alice = store.summary(Some("alice"), None, None).unwrap();
        assert_eq!(alice.requests, 2);
        assert_eq!(alice.input_tokens, 300);
        assert!((alice.cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn top_users_orders_by_cost() {
        let store = store();
        store.record(&record("alice", 100, 0, 0.01)).unwrap();
        store.record(&record("bob", 100, 0, 0.99)).unwrap();

        let top = store.top_users(None, 5).unwrap();
        assert_eq!(top[0].0, "bob");
    }
}
