//! `irc_command` — run IRC operator and informational commands through the
//! bot, with permission-tiered access: everyone gets the informational
//! set, staff additionally get channel moderation and services commands.
//! No owner-exclusive subset exists currently.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::irc::IrcClient;

use super::{Caller, Tool, ToolReply};

/// Informational commands any user may run.
fn normal_commands() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "whois",
            "whowas",
            "ns_info",
            "nickserv_info",
            "cs_info",
            "chanserv_info",
            "alis_list",
            "alis_search",
            "version",
            "time",
            "bot_status",
            "channel_info",
            "channel_list",
            "user_status",
            "channel_ops",
            "channel_voiced",
            "channel_topic",
            "find_user",
        ]
        .into_iter()
        .collect()
    })
}

/// Moderation and services commands requiring admin or owner.
fn admin_commands() -> &'static HashSet<&'static str> {
    static SET: OnceLock<HashSet<&'static str>> = OnceLock::new();
    SET.get_or_init(|| {
        [
            "kick", "ban", "unban", "quiet", "unquiet", "op", "deop", "voice", "devoice",
            "halfop", "dehalfop", "topic", "mode", "invite", "cs_op", "cs_deop", "cs_voice",
            "cs_devoice", "cs_kick", "cs_ban", "cs_unban", "cs_quiet", "cs_unquiet", "cs_topic",
            "cs_flags", "cs_access", "cs_akick", "cs_invite", "cs_clear", "ns_ghost",
            "ns_release", "ns_regain",
        ]
        .into_iter()
        .collect()
    })
}

pub struct IrcCommandTool {
    irc: Arc<IrcClient>,
}

impl IrcCommandTool {
    pub fn new(irc: Arc<IrcClient>) -> Self {
        Self { irc }
    }
}

#[derive(Deserialize)]
struct Input {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    channel: Option<String>,
}

#[async_trait]
impl Tool for IrcCommandTool {
    fn name(&self) -> &str {
        "irc_command"
    }

    fn description(&self) -> &str {
        "Execute IRC commands through the bot. \
         NORMAL USERS: whois/whowas <nick>, ns_info <nick>, cs_info <channel>, \
         alis_search <pattern> (channel search), version/time <nick> (CTCP), \
         bot_status <channel>, channel_info/channel_list, user_status <channel> <nick>, \
         channel_ops/channel_voiced/channel_topic <channel>, find_user <nick>. \
         ADMIN/OWNER additionally: kick/ban/unban/quiet/unquiet, op/deop/voice/devoice, \
         topic/mode/invite, and the ChanServ equivalents (cs_op, cs_kick, cs_ban, \
         cs_topic, cs_flags, cs_access, cs_akick, cs_clear, ...) for when the bot \
         lacks op, plus ns_ghost/ns_release/ns_regain. \
         Before kick/ban/op commands, check bot_status first; if the bot has no op, \
         use the cs_* variants instead. \
         Example: 'who owns foobar' -> command='ns_info', args=['foobar']."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command name, e.g. 'whois', 'kick', 'cs_topic'"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Command arguments in order, e.g. ['#channel', 'nick', 'reason']"
                },
                "channel": {
                    "type": ["string", "null"],
                    "description": "Channel context when the command needs one and it is not in args"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };
        let command = input.command.to_lowercase();

        let allowed = normal_commands().contains(command.as_str())
            || (caller.level.is_staff() && admin_commands().contains(command.as_str()));
        if !allowed {
            return if admin_commands().contains(command.as_str()) {
                ToolReply::error(format!(
                    "Permission denied: '{command}' requires admin or owner."
                ))
            } else {
                ToolReply::error(format!("Error: unknown IRC command '{command}'"))
            };
        }

        info!(%command, nick = %caller.nick, "irc command dispatched");
        match self
            .irc
            .execute(&command, &input.args, input.channel.as_deref())
            .await
        {
            Ok(output) if output.is_empty() => ToolReply::text("(command sent, no output)"),
            Ok(output) => ToolReply::text(output),
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marvin_core::types::PermissionLevel;
    use std::time::Duration;

    fn tool() -> IrcCommandTool {
        // Unroutable base URL: permission checks run before any transport.
        IrcCommandTool::new(Arc::new(IrcClient::new(
            "http://127.0.0.1:1".to_string(),
            Duration::from_millis(50),
        )))
    }

    fn caller(level: PermissionLevel) -> Caller {
        Caller {
            nick: "alice".to_string(),
            channel: "#x".to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn moderation_commands_denied_to_normal_users() {
        let reply = tool()
            .execute(
                json!({"command": "kick", "args": ["#x", "bob"]}),
                &caller(PermissionLevel::Normal),
            )
            .await;
        match reply {
            ToolReply::Error(msg) => assert!(msg.starts_with("Permission denied:")),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_commands_are_rejected_for_everyone() {
        let reply = tool()
            .execute(
                json!({"command": "cs_drop", "args": ["#x"]}),
                &caller(PermissionLevel::Owner),
            )
            .await;
        match reply {
            ToolReply::Error(msg) => assert!(msg.contains("unknown IRC command")),
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn permission_sets_do_not_overlap() {
        for cmd in normal_commands().iter() {
            assert!(!admin_commands().contains(cmd), "{cmd} in both sets");
        }
    }
}
