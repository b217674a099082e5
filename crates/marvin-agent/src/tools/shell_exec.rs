//! `execute_shell` — run a shell command on the host. Owner only.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{Caller, Tool, ToolReply};

pub struct ExecuteShellTool {
    default_timeout_secs: u64,
}

impl ExecuteShellTool {
    pub fn new(default_timeout_secs: u64) -> Self {
        Self {
            default_timeout_secs,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    command: String,
    #[serde(default)]
    working_dir: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for ExecuteShellTool {
    fn name(&self) -> &str {
        "execute_shell"
    }

    fn description(&self) -> &str {
        "Execute shell commands on the Linux host. OWNER ONLY. Use for system status \
         checks (uptime, disk space, memory), diagnostics (curl, ping), service and \
         file management, or any administration task the owner asks for. Runs in a \
         bash shell; pipes and command chaining (&&, ||, ;) are allowed. Refuses to \
         run for anyone who is not the owner."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute. May include pipes, redirects, and chaining."
                },
                "working_dir": {
                    "type": ["string", "null"],
                    "description": "Working directory for the command. Defaults to the current directory."
                },
                "timeout": {
                    "type": ["integer", "null"],
                    "description": "Custom timeout in seconds. Defaults to 30."
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        if !caller.level.is_owner() {
            return ToolReply::error(
                "Permission denied: This tool is restricted to the bot owner only.",
            );
        }

        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        let timeout = Duration::from_secs(input.timeout.unwrap_or(self.default_timeout_secs));
        info!(command = %input.command, "owner shell execution");

        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c").arg(&input.command);
        if let Some(ref dir) = input.working_dir {
            cmd.current_dir(dir);
        }

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolReply::error(format!("Error: failed to spawn shell - {e}")),
            Err(_) => {
                warn!(command = %input.command, "shell command timed out");
                return ToolReply::error(format!(
                    "Error: command timed out after {} seconds",
                    timeout.as_secs()
                ));
            }
        };

        let mut result = String::new();
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stdout.is_empty() {
            result.push_str(stdout.trim_end());
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str("[stderr]\n");
            result.push_str(stderr.trim_end());
        }
        if !output.status.success() {
            result.push_str(&format!(
                "\n[exit code: {}]",
                output.status.code().unwrap_or(-1)
            ));
        }
        if result.is_empty() {
            result = "(no output)".to_string();
        }
        ToolReply::text(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marvin_core::types::PermissionLevel;

    fn caller(level: PermissionLevel) -> Caller {
        Caller {
            nick: "tester".to_string(),
            channel: "#x".to_string(),
            level,
        }
    }

    #[tokio::test]
    async fn non_owner_is_refused() {
        let tool = ExecuteShellTool::new(30);
        for level in [PermissionLevel::Admin, PermissionLevel::Normal] {
            let reply = tool
                .execute(json!({"command": "echo hi"}), &caller(level))
                .await;
            match reply {
                ToolReply::Error(msg) => assert!(msg.starts_with("Permission denied:")),
                other => panic!("expected permission error, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn owner_runs_and_captures_output() {
        let tool = ExecuteShellTool::new(30);
        let reply = tool
            .execute(
                json!({"command": "echo out; echo err 1>&2"}),
                &caller(PermissionLevel::Owner),
            )
            .await;
        match reply {
            ToolReply::Text(out) => {
                assert!(out.contains("out"));
                assert!(out.contains("[stderr]"));
                assert!(out.contains("err"));
            }
            other => panic!("expected text, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let tool = ExecuteShellTool::new(30);
        let reply = tool
            .execute(json!({"command": "exit 3"}), &caller(PermissionLevel::Owner))
            .await;
        match reply {
            ToolReply::Text(out) => assert!(out.contains("[exit code: 3]")),
            other => panic!("expected text, got {other:?}"),
        }
    }
}
