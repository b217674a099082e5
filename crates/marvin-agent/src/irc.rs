//! Client for the IRC bot's callback server.
//!
//! Everything the core pushes back into IRC (reminder lines, operator
//! commands, presence checks) goes through `POST {base}/irc/execute` with
//! `{command, args, channel?}` and comes back as `{status, output|error}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    status: String,
    #[serde(default)]
    output: String,
    #[serde(default)]
    error: String,
}

#[derive(Clone)]
pub struct IrcClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl IrcClient {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    /// Run one IRC command. `Ok(output)` on success, `Err(message)` on a
    /// transport failure or an error status from the bot.
    pub async fn execute(
        &self,
        command: &str,
        args: &[String],
        channel: Option<&str>,
    ) -> Result<String, String> {
        let mut body = serde_json::json!({
            "command": command,
            "args": args,
        });
        if let Some(channel) = channel {
            body["channel"] = serde_json::json!(channel);
        }

        debug!(%command, args = args.len(), "irc callback");
        let resp = self
            .client
            .post(format!("{}/irc/execute", self.base_url))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("IRC callback unreachable: {e}"))?;

        if !resp.status().is_success() {
            return Err(format!("IRC callback HTTP {}", resp.status().as_u16()));
        }

        let parsed: ExecuteResponse = resp
            .json()
            .await
            .map_err(|e| format!("IRC callback bad response: {e}"))?;

        if parsed.status == "success" {
            Ok(parsed.output)
        } else {
            Err(if parsed.error.is_empty() {
                format!("IRC command '{command}' failed")
            } else {
                parsed.error
            })
        }
    }

    /// Whether `nick` is currently present in `channel`.
    pub async fn user_status(&self, channel: &str, nick: &str) -> bool {
        match self
            .execute(
                "user_status",
                &[channel.to_string(), nick.to_string()],
                None,
            )
            .await
        {
            Ok(output) => {
                let lower = output.to_lowercase();
                !lower.contains("not in channel") && !lower.contains("not tracked")
            }
            Err(e) => {
                warn!(%channel, %nick, "user_status check failed: {e}");
                false
            }
        }
    }

    pub async fn send_line(&self, channel: &str, message: &str) -> bool {
        self.execute(
            "send_message",
            &[channel.to_string(), message.to_string()],
            None,
        )
        .await
        .is_ok()
    }
}

#[async_trait]
impl marvin_scheduler::Deliverer for IrcClient {
    async fn user_online(&self, channel: &str, nick: &str) -> bool {
        self.user_status(channel, nick).await
    }

    async fn send_message(&self, channel: &str, message: &str) -> bool {
        self.send_line(channel, message).await
    }
}
