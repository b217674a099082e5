//! `reminder` — create, list, cancel, and check reminders.
//!
//! Time reminders are delivered by the background engine when the target
//! is online; join reminders are delivered through the IRC client's
//! join-check hook. "Recurring" is a time reminder with a recurrence
//! period attached.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};

use marvin_scheduler::store::NewReminder;
use marvin_scheduler::{Recurrence, ReminderStore, ReminderType, SchedulerError};

use super::{Caller, Tool, ToolReply};

pub struct ReminderTool {
    store: Arc<ReminderStore>,
}

impl ReminderTool {
    pub fn new(store: Arc<ReminderStore>) -> Self {
        Self { store }
    }
}

#[derive(Deserialize)]
struct Input {
    action: String,
    #[serde(default)]
    reminder_type: Option<String>,
    #[serde(default)]
    target_nick: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    deliver_at: Option<String>,
    #[serde(default)]
    recurrence: Option<String>,
    #[serde(default)]
    reminder_id: Option<i64>,
}

/// Parse "+30s" / "+5m" / "+2h" / "+1d" / "+1w" or an ISO 8601 UTC time.
fn parse_deliver_at(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(rest) = raw.strip_prefix('+') {
        if rest.len() < 2 {
            return None;
        }
        let (digits, unit) = rest.split_at(rest.len() - 1);
        let value: i64 = digits.parse().ok()?;
        let delta = match unit {
            "s" => Duration::seconds(value),
            "m" => Duration::minutes(value),
            "h" => Duration::hours(value),
            "d" => Duration::days(value),
            "w" => Duration::weeks(value),
            _ => return None,
        };
        return Some(Utc::now() + delta);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Bare "YYYY-MM-DDTHH:MM:SS" without a zone is taken as UTC.
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[async_trait]
impl Tool for ReminderTool {
    fn name(&self) -> &str {
        "reminder"
    }

    fn description(&self) -> &str {
        "Manage reminders for IRC users.\n\
         TYPES: 'time' delivers at a specific time (retries until the target is \
         online, up to 10 attempts); 'join' delivers when the target next joins the \
         channel; 'recurring' is time-based but repeats (hourly, daily, weekly).\n\
         ACTIONS: 'create', 'list' (own, or all for admins), 'cancel' by ID, 'check' \
         (pending count).\n\
         EXAMPLES: 'remind me in 30 seconds to check tea' -> create, type=time, \
         deliver_at='+30s'; 'remind User2 when he joins to ping me' -> create, \
         type=join, target_nick='User2'; 'cancel reminder #3' -> cancel, \
         reminder_id=3.\n\
         TIME FORMAT for deliver_at: relative '+30s', '+5m', '+2h', '+1d', '+1w', or \
         absolute ISO 8601 UTC ('2026-03-15T14:00:00'). Convert from the user's \
         context to UTC."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "list", "cancel", "check"],
                    "description": "Action to perform"
                },
                "reminder_type": {
                    "type": "string",
                    "enum": ["time", "join", "recurring"],
                    "description": "Type of reminder (required for 'create')"
                },
                "target_nick": {
                    "type": "string",
                    "description": "Nick to remind. Defaults to the requesting user."
                },
                "message": {
                    "type": "string",
                    "description": "The reminder message (required for 'create')"
                },
                "deliver_at": {
                    "type": "string",
                    "description": "When to deliver: '+30s', '+5m', '+2h', '+1d', or ISO 8601 UTC. Required for time/recurring."
                },
                "recurrence": {
                    "type": "string",
                    "enum": ["hourly", "daily", "weekly"],
                    "description": "Recurrence interval (only for 'recurring')"
                },
                "reminder_id": {
                    "type": "integer",
                    "description": "Reminder ID (required for 'cancel')"
                }
            },
            "required": ["action"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        match input.action.as_str() {
            "create" => self.create(input, caller),
            "list" => self.list(caller),
            "cancel" => match input.reminder_id {
                Some(id) => self.cancel(id, caller),
                None => ToolReply::error("Error: reminder_id is required for cancel."),
            },
            "check" => match self.store.pending_count(&caller.nick) {
                Ok(0) => ToolReply::text(format!("{} has no pending reminders.", caller.nick)),
                Ok(count) => ToolReply::text(format!(
                    "{} has {count} pending reminder(s). Use action 'list' to see them.",
                    caller.nick
                )),
                Err(e) => ToolReply::error(format!("Error: {e}")),
            },
            other => ToolReply::error(format!(
                "Error: unknown action '{other}'. Use: create, list, cancel, check"
            )),
        }
    }
}

impl ReminderTool {
    fn create(&self, input: Input, caller: &Caller) -> ToolReply {
        let Some(kind) = input.reminder_type.as_deref() else {
            return ToolReply::error("Error: reminder_type is required (time, join, or recurring).");
        };
        let Some(message) = input.message.as_deref().filter(|m| !m.trim().is_empty()) else {
            return ToolReply::error("Error: message is required.");
        };
        let target = input
            .target_nick
            .clone()
            .unwrap_or_else(|| caller.nick.clone());

        let (reminder_type, recurrence) = match kind {
            "time" => (ReminderType::Time, None),
            "join" => (ReminderType::Join, None),
            "recurring" => {
                let Some(recurrence) = input
                    .recurrence
                    .as_deref()
                    .and_then(|r| r.parse::<Recurrence>().ok())
                else {
                    return ToolReply::error(
                        "Error: recurrence is required for recurring reminders (hourly, daily, weekly).",
                    );
                };
                (ReminderType::Time, Some(recurrence))
            }
            other => return ToolReply::error(format!("Error: unknown reminder_type '{other}'")),
        };

        let deliver_at = if reminder_type == ReminderType::Time {
            let Some(raw) = input.deliver_at.as_deref() else {
                return ToolReply::error("Error: deliver_at is required for time-based reminders.");
            };
            let Some(parsed) = parse_deliver_at(raw) else {
                return ToolReply::error(format!(
                    "Error: could not parse deliver_at '{raw}'. Use '+30m', '+2h', '+1d', or ISO 8601."
                ));
            };
            Some(parsed)
        } else {
            None
        };

        let new = NewReminder {
            creator_nick: caller.nick.clone(),
            target_nick: target.clone(),
            channel: caller.channel.clone(),
            message: message.to_string(),
            reminder_type,
            deliver_at,
            recurrence,
        };

        match self.store.create(&new) {
            Ok(id) => {
                let message = message.trim();
                match (reminder_type, recurrence) {
                    (ReminderType::Join, _) => ToolReply::text(format!(
                        "Reminder #{id} set! I'll remind {target} when they join {}: \"{message}\"",
                        caller.channel
                    )),
                    (_, Some(recurrence)) => ToolReply::text(format!(
                        "Recurring reminder #{id} set ({})! First delivery at {} UTC for {target}: \"{message}\"",
                        recurrence.as_str(),
                        deliver_at.unwrap().format("%Y-%m-%dT%H:%M:%S"),
                    )),
                    _ => ToolReply::text(format!(
                        "Reminder #{id} set for {} UTC! I'll remind {target} in {}: \"{message}\"",
                        deliver_at.unwrap().format("%Y-%m-%dT%H:%M:%S"),
                        caller.channel
                    )),
                }
            }
            Err(SchedulerError::TooManyPending { max }) => ToolReply::error(format!(
                "Error: you have too many pending reminders (max {max}). Cancel some first."
            )),
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }

    fn list(&self, caller: &Caller) -> ToolReply {
        match self.store.list_pending(&caller.nick, caller.level.is_staff()) {
            Ok(reminders) if reminders.is_empty() => ToolReply::text("No pending reminders found."),
            Ok(reminders) => {
                let lines: Vec<String> = reminders
                    .iter()
                    .map(|r| {
                        let trigger = match (r.reminder_type, r.recurrence, r.deliver_at) {
                            (ReminderType::Join, _, _) => format!("on-join in {}", r.channel),
                            (_, Some(recurrence), Some(at)) => format!(
                                "{} at {}",
                                recurrence.as_str(),
                                at.format("%Y-%m-%d %H:%M")
                            ),
                            (_, _, Some(at)) => {
                                format!("at {} UTC", at.format("%Y-%m-%d %H:%M"))
                            }
                            _ => "unscheduled".to_string(),
                        };
                        let target = if r.creator_nick.eq_ignore_ascii_case(&r.target_nick) {
                            "(self)".to_string()
                        } else {
                            format!("-> {}", r.target_nick)
                        };
                        let preview: String = r.message.chars().take(40).collect();
                        format!(
                            "#{} [{}] {trigger} {target}: {preview}",
                            r.id,
                            r.reminder_type.as_str()
                        )
                    })
                    .collect();
                ToolReply::text(format!("Pending reminders: {}", lines.join(" | ")))
            }
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }

    fn cancel(&self, id: i64, caller: &Caller) -> ToolReply {
        match self.store.cancel(id, &caller.nick, caller.level.is_staff()) {
            Ok(()) => ToolReply::text(format!("Reminder #{id} cancelled.")),
            Err(SchedulerError::NotFound { id }) => {
                ToolReply::error(format!("Error: reminder #{id} not found."))
            }
            Err(SchedulerError::Invalid(msg)) => ToolReply::error(format!("Error: {msg}")),
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marvin_core::types::PermissionLevel;

    fn tool() -> ReminderTool {
        let store =
            ReminderStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap();
        ReminderTool::new(Arc::new(store))
    }

    fn caller(nick: &str) -> Caller {
        Caller {
            nick: nick.to_string(),
            channel: "#x".to_string(),
            level: PermissionLevel::Normal,
        }
    }

    #[test]
    fn relative_times_parse() {
        let before = Utc::now();
        let parsed = parse_deliver_at("+30s").unwrap();
        assert!(parsed > before + Duration::seconds(29));
        assert!(parsed < before + Duration::seconds(35));

        assert!(parse_deliver_at("+2h").is_some());
        assert!(parse_deliver_at("+1w").is_some());
        assert!(parse_deliver_at("+5x").is_none());
        assert!(parse_deliver_at("tomorrow").is_none());
    }

    #[test]
    fn iso_times_parse_as_utc() {
        let parsed = parse_deliver_at("2030-03-15T14:00:00").unwrap();
        assert_eq!(parsed.format("%H:%M").to_string(), "14:00");
        assert!(parse_deliver_at("2030-03-15T14:00:00Z").is_some());
    }

    #[tokio::test]
    async fn create_then_check_then_cancel_roundtrip() {
        let tool = tool();
        let me = caller("bob");

        let reply = tool
            .execute(
                json!({"action": "create", "reminder_type": "time",
                       "message": "check the tea", "deliver_at": "+1h"}),
                &me,
            )
            .await;
        match reply {
            ToolReply::Text(out) => assert!(out.contains("Reminder #1 set")),
            other => panic!("expected confirmation, got {other:?}"),
        }

        match tool.execute(json!({"action": "check"}), &me).await {
            ToolReply::Text(out) => assert!(out.contains("1 pending")),
            other => panic!("expected count, got {other:?}"),
        }

        match tool
            .execute(json!({"action": "cancel", "reminder_id": 1}), &me)
            .await
        {
            ToolReply::Text(out) => assert!(out.contains("cancelled")),
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn recurring_requires_recurrence() {
        let tool = tool();
        let reply = tool
            .execute(
                json!({"action": "create", "reminder_type": "recurring",
                       "message": "daily standup", "deliver_at": "+1h"}),
                &caller("bob"),
            )
            .await;
        match reply {
            ToolReply::Error(msg) => assert!(msg.contains("recurrence is required")),
            other => panic!("expected error, got {other:?}"),
        }
    }
}
