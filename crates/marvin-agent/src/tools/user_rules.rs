//! `manage_user_rules` — the multi-entry user memory surface.
//!
//! Each user holds independent entries (facts, preferences, personas) that
//! the prompt assembler injects for them. Staff may manage entries for any
//! user; everyone else only their own.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use marvin_store::rules::UserRulesStore;

use super::{Caller, Tool, ToolReply};

pub struct ManageUserRulesTool {
    rules: Arc<UserRulesStore>,
}

impl ManageUserRulesTool {
    pub fn new(rules: Arc<UserRulesStore>) -> Self {
        Self { rules }
    }
}

#[derive(Deserialize)]
struct Input {
    action: String,
    #[serde(default)]
    target_user: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    entry_id: Option<u32>,
    #[serde(default)]
    search_term: Option<String>,
}

#[async_trait]
impl Tool for ManageUserRulesTool {
    fn name(&self) -> &str {
        "manage_user_rules"
    }

    fn description(&self) -> &str {
        "Manage per-user memories and custom rules that shape how you respond to them. \
         Each user can have MULTIPLE separate entries. Use when a user asks you to \
         remember something ('remember I like cats'), wants a persona ('roleplay as a \
         pirate'), wants to see what you remember, wants to forget or update a \
         specific entry, or wants to clear/enable/disable entries. Admins and owners \
         can manage OTHER users' entries via target_user. Use 'add' for NEW entries \
         and 'update' only to MODIFY existing ones."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "add", "update", "delete", "clear", "enable", "disable"],
                    "description": "list (view all), add (new entry), update (modify entry), delete (remove entry), clear (remove all), enable/disable (toggle one entry or all)"
                },
                "target_user": {
                    "type": ["string", "null"],
                    "description": "Target user's nick. Only admins may specify someone else; null applies to the requesting user."
                },
                "content": {
                    "type": ["string", "null"],
                    "description": "The memory/rule content for add or update. Concise but complete."
                },
                "entry_id": {
                    "type": ["integer", "null"],
                    "description": "Specific entry ID for update/delete/enable/disable. Null for enable/disable affects all entries."
                },
                "search_term": {
                    "type": ["string", "null"],
                    "description": "Find the entry by content instead of ID (case-insensitive partial match)."
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

        let target = input
            .target_user
            .clone()
            .unwrap_or_else(|| caller.nick.clone());
        if !target.eq_ignore_ascii_case(&caller.nick) && !caller.level.is_staff() {
            return ToolReply::error(
                "Permission denied: only admins/owners can manage other users' memories.",
            );
        }

        // Resolve entry_id from a search term when no explicit id was given.
        let resolve_id = |explicit: Option<u32>, term: &Option<String>| -> Result<Option<u32>, String> {
            if explicit.is_some() {
                return Ok(explicit);
            }
            match term {
                Some(term) => match self.rules.find_by_content(&target, term) {
                    Ok(Some(entry)) => Ok(Some(entry.id)),
                    Ok(None) => Err(format!("No entry found matching \"{term}\".")),
                    Err(e) => Err(format!("Error: {e}")),
                },
                None => Ok(None),
            }
        };

        match input.action.as_str() {
            "list" => match self.rules.list(&target) {
                Ok(entries) if entries.is_empty() => {
                    ToolReply::text(format!("No memories stored for {target}."))
                }
                Ok(entries) => {
                    let mut lines = vec![format!("Memories for {target}:")];
                    for entry in entries {
                        let state = if entry.enabled { "on" } else { "off" };
                        lines.push(format!("[{}] ({state}) {}", entry.id, entry.content));
                    }
                    ToolReply::text(lines.join(" | "))
                }
                Err(e) => ToolReply::error(format!("Error: {e}")),
            },

            "add" => {
                let Some(content) = input.content.filter(|c| !c.trim().is_empty()) else {
                    return ToolReply::error("No content provided. What should I remember?");
                };
                match self.rules.add(&target, content.trim()) {
                    Ok(id) => ToolReply::text(format!("Got it! Added memory #{id}: \"{}\"", content.trim())),
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "update" => {
                let Some(content) = input.content.filter(|c| !c.trim().is_empty()) else {
                    return ToolReply::error("No new content provided. What should I update it to?");
                };
                let id = match resolve_id(input.entry_id, &input.search_term) {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        return ToolReply::error(
                            "Please specify which entry to update (by ID or search term).",
                        )
                    }
                    Err(e) => return ToolReply::error(e),
                };
                match self.rules.update(&target, id, content.trim()) {
                    Ok(Some(old)) => ToolReply::text(format!(
                        "Updated entry #{id}: \"{old}\" -> \"{}\"",
                        content.trim()
                    )),
                    Ok(None) => ToolReply::error(format!("Entry #{id} not found.")),
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "delete" => {
                let id = match resolve_id(input.entry_id, &input.search_term) {
                    Ok(Some(id)) => id,
                    Ok(None) => {
                        return ToolReply::error(
                            "Please specify which entry to delete (by ID or search term).",
                        )
                    }
                    Err(e) => return ToolReply::error(e),
                };
                match self.rules.delete(&target, id) {
                    Ok(Some(content)) => {
                        ToolReply::text(format!("Deleted entry #{id}: \"{content}\""))
                    }
                    Ok(None) => ToolReply::error(format!("Entry #{id} not found.")),
                    Err(e) => ToolReply::error(format!("Error: {e}")),
                }
            }

            "clear" => match self.rules.clear(&target) {
                Ok(0) => ToolReply::text("No memories to clear."),
                Ok(count) => ToolReply::text(format!("Cleared all {count} memories for {target}.")),
                Err(e) => ToolReply::error(format!("Error: {e}")),
            },

            action @ ("enable" | "disable") => {
                let enabled = action == "enable";
                let id = match resolve_id(input.entry_id, &input.search_term) {
                    Ok(id) => id,
                    Err(e) => return ToolReply::error(e),
                };
                match self.rules.set_enabled(&target, id, enabled) {
                    Ok(0) if id.is_some() => {
                        ToolReply::error(format!("Entry #{} not found.", id.unwrap()))
                    }
                    Ok(0) => ToolReply::text(format!("No memories to {action}.")),
                    Ok(count) => {
                        let scope = match id {
                            Some(id) => format!("entry #{id}"),
                            None => format!("all {count} memories"),
                        };
                        let note = if enabled {
                            String::new()
                        } else {
                            " (kept but not applied)".to_string()
                        };
                        ToolReply::text(format!("{action}d {scope}{note}",))
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

    fn tool() -> (tempfile::TempDir, ManageUserRulesTool) {
        let dir = tempfile::tempdir().unwrap();
        let rules = Arc::new(UserRulesStore::new(dir.path().join("rules.json")).unwrap());
        (dir, ManageUserRulesTool::new(rules))
    }

    fn caller(nick: &str, level: PermissionLevel) -> Caller {
        Caller {
            nick: nick.to_string(),
            channel: "#x".to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn normal_user_cannot_target_others() {
        let (_dir, tool) = tool();
        let reply = tool
            .execute(
                json!({"action": "add", "target_user": "bob", "content": "x"}),
                &caller("alice", PermissionLevel::Normal),
            )
            .await;
        match reply {
            ToolReply::Error(msg) => assert!(msg.starts_with("Permission denied:")),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn admin_manages_other_users() {
        let (_dir, tool) = tool();
        let reply = tool
            .execute(
                json!({"action": "add", "target_user": "bob", "content": "likes tea"}),
                &caller("admin", PermissionLevel::Admin),
            )
            .await;
        assert!(matches!(reply, ToolReply::Text(_)));

        let listing = tool
            .execute(
                json!({"action": "list"}),
                &caller("bob", PermissionLevel::Normal),
            )
            .await;
        match listing {
            ToolReply::Text(out) => assert!(out.contains("likes tea")),
            other => panic!("expected listing, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn delete_by_search_term_works() {
        let (_dir, tool) = tool();
        let me = caller("alice", PermissionLevel::Normal);
        tool.execute(json!({"action": "add", "content": "loves rust"}), &me).await;
        tool.execute(json!({"action": "add", "content": "hates mondays"}), &me).await;

        let reply = tool
            .execute(json!({"action": "delete", "search_term": "mondays"}), &me)
            .await;
        match reply {
            ToolReply::Text(out) => assert!(out.contains("hates mondays")),
            other => panic!("expected delete confirmation, got {other:?}"),
        }
    }
}
