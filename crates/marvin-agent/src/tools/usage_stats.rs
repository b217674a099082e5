//! `usage_stats` — token and cost queries over the usage ledger.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use marvin_core::pricing::PricingConfig;
use marvin_store::usage::UsageStore;

use super::{Caller, Tool, ToolReply};

pub struct UsageStatsTool {
    usage: Arc<UsageStore>,
    #[allow(dead_code)]
    pricing: PricingConfig,
}

impl UsageStatsTool {
    pub fn new(usage: Arc<UsageStore>, pricing: PricingConfig) -> Self {
        Self { usage, pricing }
    }
}

#[derive(Deserialize)]
struct Input {
    #[serde(default)]
    nick: Option<String>,
    #[serde(default = "default_range")]
    time_range: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    show_top_users: bool,
}

fn default_range() -> String {
    "today".to_string()
}

fn range_start(range: &str) -> Option<Option<DateTime<Utc>>> {
    let now = Utc::now();
    match range {
        "last_hour" => Some(Some(now - Duration::hours(1))),
        "today" | "last_24h" => Some(Some(now - Duration::hours(24))),
        "last_week" => Some(Some(now - Duration::days(7))),
        "last_month" => Some(Some(now - Duration::days(30))),
        "all_time" => Some(None),
        _ => None,
    }
}

#[async_trait]
impl Tool for UsageStatsTool {
    fn name(&self) -> &str {
        "usage_stats"
    }

    fn description(&self) -> &str {
        "Query AI usage statistics and costs from the ledger. Use when a user asks \
         how much they've spent, how many tokens they used, or wants a cost \
         breakdown. Admins can set show_top_users=true for a per-user cost ranking."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "nick": {
                    "type": ["string", "null"],
                    "description": "User to get stats for. Defaults to the requesting user."
                },
                "time_range": {
                    "type": "string",
                    "enum": ["last_hour", "today", "last_24h", "last_week", "last_month", "all_time"],
                    "description": "Time range for statistics. Default: today"
                },
                "channel": {
                    "type": ["string", "null"],
                    "description": "Optional channel filter"
                },
                "show_top_users": {
                    "type": "boolean",
                    "description": "Show top users by cost instead of one user's stats (admin only). Default: false"
                }
            },
            "required": [],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        let Some(since) = range_start(&input.time_range) else {
            return ToolReply::error(format!("Error: unknown time_range '{}'", input.time_range));
        };

        if input.show_top_users {
            if !caller.level.is_staff() {
                return ToolReply::error(
                    "Permission denied: only admins/owners can view the per-user ranking.",
                );
            }
            return match self.usage.top_users(since, 10) {
                Ok(rows) if rows.is_empty() => ToolReply::text("No usage recorded yet."),
                Ok(rows) => {
                    let lines: Vec<String> = rows
                        .iter()
                        .enumerate()
                        .map(|(i, (nick, cost, requests))| {
                            format!("{}. {nick}: ${cost:.4} over {requests} request(s)", i + 1)
                        })
                        .collect();
                    ToolReply::text(format!(
                        "Top users ({}): {}",
                        input.time_range,
                        lines.join(" | ")
                    ))
                }
                Err(e) => ToolReply::error(format!("Error: {e}")),
            };
        }

        let nick = input.nick.unwrap_or_else(|| caller.nick.clone());
        match self
            .usage
            .summary(Some(&nick), input.channel.as_deref(), since)
        {
            Ok(summary) if summary.requests == 0 => {
                ToolReply::text(format!("No usage recorded for {nick} in that range."))
            }
            Ok(summary) => ToolReply::text(format!(
                "{nick} ({}): {} request(s), {} input tokens ({} cached), {} output tokens, \
                 {} tool call(s), {} web search(es) = ${:.4}",
                input.time_range,
                summary.requests,
                summary.input_tokens,
                summary.cached_tokens,
                summary.output_tokens,
                summary.tool_calls,
                summary.web_search_calls,
                summary.cost_usd,
            )),
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marvin_core::types::PermissionLevel;
    use marvin_store::usage::UsageRecord;
    use std::sync::Mutex;

    fn tool() -> (Arc<UsageStore>, UsageStatsTool) {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        marvin_store::db::init_db(&conn).unwrap();
        let usage = Arc::new(UsageStore::new(Arc::new(Mutex::new(conn))));
        let tool = UsageStatsTool::new(usage.clone(), PricingConfig::default());
        (usage, tool)
    }

    fn caller(level: PermissionLevel) -> Caller {
        Caller {
            nick: "alice".to_string(),
            channel: "#x".to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn defaults_to_the_requesting_user() {
        let (usage, tool) = tool();
        usage
            .record(&UsageRecord {
                request_id: "r1".to_string(),
                nick: "alice".to_string(),
                channel: Some("#x".to_string()),
                model: "gpt-5.2".to_string(),
                input_tokens: 1000,
                cached_tokens: 200,
                output_tokens: 100,
                cost_usd: 0.0031,
                tool_calls: 1,
                web_search_calls: 0,
                code_interpreter_calls: 0,
            })
            .unwrap();

        let reply = tool
            .execute(json!({}), &caller(PermissionLevel::Normal))
            .await;
        match reply {
            ToolReply::Text(out) => {
                assert!(out.contains("alice"));
                assert!(out.contains("1000 input tokens"));
            }
            other => panic!("expected stats, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn top_users_is_staff_only() {
        let (_usage, tool) = tool();
        let reply = tool
            .execute(
                json!({"show_top_users": true}),
                &caller(PermissionLevel::Normal),
            )
            .await;
        match reply {
            ToolReply::Error(msg) => assert!(msg.starts_with("Permission denied:")),
            other => panic!("expected denial, got {other:?}"),
        }
    }
}
