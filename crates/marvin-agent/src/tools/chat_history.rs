//! `query_chat_history` — look further back than the 20-message window
//! every mention carries.
//!
//! Two search modes: keyword (SQL LIKE over the messages table) and
//! semantic (vector search over the mirrored history collection). Two
//! window modes: a named `time_range`, or `hours_ago` with an optional
//! `context_minutes` spread around that point.
//!
//! Access control: non-staff callers may only query the channel they are
//! speaking in; admins and owners may query any channel.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use marvin_kb::{Embedder, VectorIndex};
use marvin_store::messages::{MessageQuery, MessageStore};

use super::{Caller, Tool, ToolReply};

const MAX_MESSAGES: usize = 1000;
const MAX_OUTPUT_CHARS: usize = 50_000;
const DEFAULT_LIMIT: usize = 200;

pub struct ChatHistoryTool {
    messages: Arc<MessageStore>,
    history_index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl ChatHistoryTool {
    pub fn new(
        messages: Arc<MessageStore>,
        history_index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        collection: String,
    ) -> Self {
        Self {
            messages,
            history_index,
            embedder,
            collection,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    channel: String,
    #[serde(default)]
    search_term: Option<String>,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    time_range: Option<String>,
    #[serde(default)]
    hours_ago: Option<f64>,
    #[serde(default)]
    context_minutes: Option<u64>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    count_only: bool,
    #[serde(default = "default_mode")]
    mode: String,
}

fn default_mode() -> String {
    "keyword".to_string()
}

fn range_duration(range: &str) -> Option<Duration> {
    match range {
        "last_hour" => Some(Duration::hours(1)),
        "last_6h" => Some(Duration::hours(6)),
        "last_24h" | "today" => Some(Duration::hours(24)),
        "last_week" => Some(Duration::days(7)),
        "last_month" => Some(Duration::days(30)),
        _ => None,
    }
}

#[async_trait]
impl Tool for ChatHistoryTool {
    fn name(&self) -> &str {
        "query_chat_history"
    }

    fn description(&self) -> &str {
        "Query the chat history database for messages or statistics. Use when a user \
         asks about past conversations, wants a summary of recent activity, wants to \
         know what someone said, or when you need more context than the recent \
         messages provided. mode='keyword' does exact substring search; \
         mode='semantic' finds messages by meaning. Window with time_range \
         (last_hour/last_6h/last_24h/today/last_week/last_month) or with hours_ago \
         plus context_minutes to zoom in around a point in time. Set count_only=true \
         for 'how many messages' questions. Non-admins can only query the channel \
         they are currently in."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "channel": {
                    "type": "string",
                    "description": "The IRC channel to search. Use the EXACT channel name from the current conversation."
                },
                "search_term": {
                    "type": ["string", "null"],
                    "description": "Keyword or phrase to search for (keyword mode), or the query text (semantic mode)."
                },
                "nick": {
                    "type": ["string", "null"],
                    "description": "Filter messages by a specific user nickname."
                },
                "time_range": {
                    "type": "string",
                    "enum": ["last_hour", "last_6h", "last_24h", "today", "last_week", "last_month"],
                    "description": "Named time window. Default: last_24h"
                },
                "hours_ago": {
                    "type": ["number", "null"],
                    "description": "Alternative window: centre the search this many hours in the past."
                },
                "context_minutes": {
                    "type": ["integer", "null"],
                    "description": "Half-width of the hours_ago window in minutes. Default: 30"
                },
                "limit": {
                    "type": ["integer", "null"],
                    "description": "Max messages to return (1-1000). Default: 200"
                },
                "count_only": {
                    "type": "boolean",
                    "description": "Return only counts instead of message content. Default: false"
                },
                "mode": {
                    "type": "string",
                    "enum": ["keyword", "semantic"],
                    "description": "Search mode. Default: keyword"
                }
            },
            "required": ["channel"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        // Channel confinement for non-staff callers.
        if !caller.level.is_staff() && !input.channel.eq_ignore_ascii_case(&caller.channel) {
            return ToolReply::error(format!(
                "Permission denied: you can only query the channel you are in ({}).",
                caller.channel
            ));
        }

        if input.mode == "semantic" {
            return self.semantic_search(&input).await;
        }

        let (since, until) = match input.hours_ago {
            Some(hours) => {
                let spread = Duration::minutes(input.context_minutes.unwrap_or(30) as i64);
                let centre = Utc::now() - Duration::minutes((hours * 60.0) as i64);
                (Some(centre - spread), Some(centre + spread))
            }
            None => {
                let range = input.time_range.as_deref().unwrap_or("last_24h");
                let Some(duration) = range_duration(range) else {
                    return ToolReply::error(format!("Error: unknown time_range '{range}'"));
                };
                (Some(Utc::now() - duration), None)
            }
        };

        let query = MessageQuery {
            channel: input.channel.clone(),
            search_term: input.search_term.clone(),
            nick: input.nick.clone(),
            since,
            until,
            limit: input.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_MESSAGES),
        };

        if input.count_only {
            return match self.messages.count(&query) {
                Ok(count) => ToolReply::text(format!(
                    "{count} message(s) match in {}{}{}",
                    input.channel,
                    input
                        .nick
                        .map(|n| format!(" from {n}"))
                        .unwrap_or_default(),
                    input
                        .search_term
                        .map(|t| format!(" containing '{t}'"))
                        .unwrap_or_default(),
                )),
                Err(e) => ToolReply::error(format!("Error: history query failed - {e}")),
            };
        }

        match self.messages.query(&query) {
            Ok(rows) if rows.is_empty() => {
                ToolReply::text("No messages found matching your criteria.")
            }
            Ok(rows) => {
                let mut out = format!("Found {} message(s):\n", rows.len());
                for row in &rows {
                    let line = format!(
                        "[{}] {}: {}\n",
                        compact_timestamp(&row.timestamp),
                        row.nick,
                        row.content
                    );
                    if out.len() + line.len() > MAX_OUTPUT_CHARS {
                        out.push_str("[output truncated]\n");
                        break;
                    }
                    out.push_str(&line);
                }
                ToolReply::text(out.trim_end().to_string())
            }
            Err(e) => ToolReply::error(format!("Error: history query failed - {e}")),
        }
    }
}

impl ChatHistoryTool {
    async fn semantic_search(&self, input: &Input) -> ToolReply {
        let Some(ref query_text) = input.search_term else {
            return ToolReply::error("Error: semantic mode requires a search_term");
        };

        let embedding = match self.embedder.embed(&[query_text.clone()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return ToolReply::error("Error: embedding produced no vector"),
            Err(e) => return ToolReply::error(format!("Error: {e}")),
        };

        let top_k = input.limit.unwrap_or(10).clamp(1, 25);
        let hits = match self
            .history_index
            .query(&self.collection, &embedding, top_k * 4)
            .await
        {
            Ok(hits) => hits,
            Err(e) => return ToolReply::error(format!("Error: {e}")),
        };

        // History chunks store the channel in source_url (see the
        // migration job); filter to the requested channel after the query.
        let matching: Vec<_> = hits
            .into_iter()
            .filter(|h| h.metadata.source_url.eq_ignore_ascii_case(&input.channel))
            .take(top_k)
            .collect();

        if matching.is_empty() {
            return ToolReply::text("No semantically similar messages found.");
        }
        let mut out = format!("Semantic matches in {}:\n", input.channel);
        for hit in matching {
            out.push_str(&format!(
                "[{}] {} (distance {:.3})\n",
                compact_timestamp(&hit.metadata.ingested_at),
                hit.text,
                hit.distance
            ));
        }
        ToolReply::text(out.trim_end().to_string())
    }
}

/// Trim verbose timestamps ("2026-05-01 12:00:00.123456789 +0200 ...")
/// down to date + seconds.
fn compact_timestamp(raw: &str) -> String {
    let mut parts = raw.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(date), Some(time)) => {
            let time = time.split('.').next().unwrap_or(time);
            let time = time.split('+').next().unwrap_or(time);
            format!("{date} {}", time.trim_end_matches('Z'))
        }
        _ => {
            // RFC 3339 single-token form.
            let trimmed = raw.split('.').next().unwrap_or(raw);
            trimmed.replace('T', " ").trim_end_matches('Z').to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marvin_core::types::PermissionLevel;
    use marvin_kb::MemoryIndex;
    use std::sync::Mutex;

    struct NullEmbedder;

    #[async_trait]
    impl Embedder for NullEmbedder {
        async fn embed(&self, texts: &[String]) -> marvin_kb::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn tool() -> (Arc<MessageStore>, ChatHistoryTool) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        marvin_store::db::init_db(&conn).unwrap();
        let messages = Arc::new(MessageStore::new(Arc::new(Mutex::new(conn))));
        let tool = ChatHistoryTool::new(
            messages.clone(),
            Arc::new(MemoryIndex::new()),
            Arc::new(NullEmbedder),
            "history".to_string(),
        );
        (messages, tool)
    }

    fn caller(level: PermissionLevel, channel: &str) -> Caller {
        Caller {
            nick: "alice".to_string(),
            channel: channel.to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn normal_users_are_confined_to_their_channel() {
        let (_messages, tool) = tool();
        let reply = tool
            .execute(
                json!({"channel": "#other"}),
                &caller(PermissionLevel::Normal, "#here"),
            )
            .await;
        match reply {
            ToolReply::Error(msg) => assert!(msg.starts_with("Permission denied:")),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn admins_query_any_channel() {
        let (messages, tool) = tool();
        messages.append("#other", "bob", "secret plans", false, None).unwrap();
        let reply = tool
            .execute(
                json!({"channel": "#other"}),
                &caller(PermissionLevel::Admin, "#here"),
            )
            .await;
        match reply {
            ToolReply::Text(out) => assert!(out.contains("secret plans")),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn count_only_returns_statistics() {
        let (messages, tool) = tool();
        for _ in 0..3 {
            messages.append("#here", "bob", "rust talk", false, None).unwrap();
        }
        let reply = tool
            .execute(
                json!({"channel": "#here", "search_term": "rust", "count_only": true}),
                &caller(PermissionLevel::Normal, "#here"),
            )
            .await;
        match reply {
            ToolReply::Text(out) => assert!(out.starts_with("3 message(s)")),
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[test]
    fn verbose_timestamps_are_compacted() {
        assert_eq!(
            compact_timestamp("2026-05-01 12:00:00.123456789 +0200 EET m=+31.07"),
            "2026-05-01 12:00:00"
        );
        assert_eq!(
            compact_timestamp("2026-05-01T12:00:00.123Z"),
            "2026-05-01 12:00:00"
        );
    }
}
