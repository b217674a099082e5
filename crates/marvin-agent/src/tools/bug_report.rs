//! `bug_report` — ticket tracking for the bot itself. Reporting is open to
//! everyone; listing and management are staff-only.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use marvin_store::bugs::{BugStore, BUG_PRIORITIES, BUG_STATUSES};
use marvin_store::StoreError;

use super::{Caller, Tool, ToolReply};

pub struct BugReportTool {
    bugs: Arc<BugStore>,
}

impl BugReportTool {
    pub fn new(bugs: Arc<BugStore>) -> Self {
        Self { bugs }
    }
}

#[derive(Deserialize)]
struct Input {
    action: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    bug_id: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    priority: Option<String>,
    #[serde(default)]
    resolution_note: Option<String>,
}

#[async_trait]
impl Tool for BugReportTool {
    fn name(&self) -> &str {
        "bug_report"
    }

    fn description(&self) -> &str {
        "Manage bug reports for the bot. Actions: 'report' (any user submits a bug), \
         'list' (admin/owner), 'update' status/priority (admin/owner), 'resolve' with \
         a note (admin/owner), 'delete' (admin/owner). Use when a user says something \
         is broken or wants to report an issue, or when staff manage the backlog."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["report", "list", "update", "resolve", "delete"],
                    "description": "Action to perform"
                },
                "description": {
                    "type": ["string", "null"],
                    "description": "Bug description (required for 'report')"
                },
                "bug_id": {
                    "type": ["integer", "null"],
                    "description": "Bug ID (required for update/resolve/delete)"
                },
                "status": {
                    "type": ["string", "null"],
                    "enum": ["open", "in_progress", "resolved", "wontfix", "duplicate", null],
                    "description": "New status (for 'update'), or a filter (for 'list')"
                },
                "priority": {
                    "type": ["string", "null"],
                    "enum": ["low", "normal", "high", "critical", null],
                    "description": "New priority (for 'update')"
                },
                "resolution_note": {
                    "type": ["string", "null"],
                    "description": "Short note on how the bug was resolved (for 'resolve')"
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

        if input.action != "report" && !caller.level.is_staff() {
            return ToolReply::error(
                "Permission denied: only admins/owners can manage bug reports.",
            );
        }

        match input.action.as_str() {
            "report" => {
                let Some(description) = input
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                else {
                    return ToolReply::error("Error: description is required to report a bug.");
                };
                match self
                    .bugs
                    .report(&caller.nick, Some(&caller.channel), description)
                {
                    Ok(id) => ToolReply::text(format!(
                        "Bug #{id} reported. Thanks, {}! The admins will take a look.",
                        caller.nick
                    )),
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "list" => {
                if let Some(ref status) = input.status {
                    if !BUG_STATUSES.contains(&status.as_str()) {
                        return ToolReply::error(format!("Error: unknown status '{status}'"));
                    }
                }
                match self.bugs.list(input.status.as_deref(), 25) {
                    Ok(bugs) if bugs.is_empty() => ToolReply::text("No bug reports found."),
                    Ok(bugs) => {
                        let lines: Vec<String> = bugs
                            .iter()
                            .map(|b| {
                                let preview: String = b.description.chars().take(60).collect();
                                format!(
                                    "#{} [{}/{}] by {}: {preview}",
                                    b.id, b.status, b.priority, b.reporter
                                )
                            })
                            .collect();
                        ToolReply::text(format!("Bug reports: {}", lines.join(" | ")))
                    }
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "update" => {
                let Some(id) = input.bug_id else {
                    return ToolReply::error("Error: bug_id is required for update.");
                };
                if let Some(ref status) = input.status {
                    if !BUG_STATUSES.contains(&status.as_str()) {
                        return ToolReply::error(format!("Error: unknown status '{status}'"));
                    }
                }
                if let Some(ref priority) = input.priority {
                    if !BUG_PRIORITIES.contains(&priority.as_str()) {
                        return ToolReply::error(format!("Error: unknown priority '{priority}'"));
                    }
                }
                match self
                    .bugs
                    .update(id, input.status.as_deref(), input.priority.as_deref())
                {
                    Ok(()) => ToolReply::text(format!("Bug #{id} updated.")),
                    Err(StoreError::NotFound { .. }) => {
                        ToolReply::error(format!("Error: bug #{id} not found."))
                    }
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "resolve" => {
                let Some(id) = input.bug_id else {
                    return ToolReply::error("Error: bug_id is required for resolve.");
                };
                match self
                    .bugs
                    .resolve(id, &caller.nick, input.resolution_note.as_deref())
                {
                    Ok(()) => ToolReply::text(format!("Bug #{id} resolved by {}.", caller.nick)),
                    Err(StoreError::NotFound { .. }) => {
                        ToolReply::error(format!("Error: bug #{id} not found."))
                    }
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "delete" => {
                let Some(id) = input.bug_id else {
                    return ToolReply::error("Error: bug_id is required for delete.");
                };
                match self.bugs.delete(id) {
                    Ok(()) => ToolReply::text(format!("Bug #{id} deleted.")),
                    Err(StoreError::NotFound { .. }) => {
                        ToolReply::error(format!("Error: bug #{id} not found."))
                    }
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            other => ToolReply::error(format!("Error: unknown action '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marvin_core::types::PermissionLevel;
    use std::sync::Mutex;

    fn tool() -> BugReportTool {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        marvin_store::db::init_db(&conn).unwrap();
        BugReportTool::new(Arc::new(BugStore::new(Arc::new(Mutex::new(conn)))))
    }

    fn caller(level: PermissionLevel) -> Caller {
        Caller {
            nick: "alice".to_string(),
            channel: "#x".to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn anyone_can_report_but_only_staff_manage() {
        let tool = tool();
        let normal = caller(PermissionLevel::Normal);

        let reply = tool
            .execute(
                json!({"action": "report", "description": "the bot repeats itself"}),
                &normal,
            )
            .await;
        assert!(matches!(reply, ToolReply::Text(_)));

        let denied = tool.execute(json!({"action": "list"}), &normal).await;
        match denied {
            ToolReply::Error(msg) => assert!(msg.starts_with("Permission denied:")),
            other => panic!("expected denial, got {other:?}"),
        }

        let listed = tool
            .execute(json!({"action": "list"}), &caller(PermissionLevel::Admin))
            .await;
        match listed {
            ToolReply::Text(out) => assert!(out.contains("repeats itself")),
            other => panic!("expected listing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn resolve_records_the_resolver() {
        let tool = tool();
        tool.execute(
            json!({"action": "report", "description": "broken thing"}),
            &caller(PermissionLevel::Normal),
        )
        .await;

        let reply = tool
            .execute(
                json!({"action": "resolve", "bug_id": 1, "resolution_note": "restarted it"}),
                &caller(PermissionLevel::Owner),
            )
            .await;
        match reply {
            ToolReply::Text(out) => assert!(out.contains("resolved by alice")),
            other => panic!("expected resolution, got {other:?}"),
        }
    }
}
