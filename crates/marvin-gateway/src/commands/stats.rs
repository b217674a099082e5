//! `!stats` — channel message counts plus the request ledger summary.

use async_trait::async_trait;
use chrono::{Duration, Utc};

use marvin_store::messages::MessageQuery;

use crate::app::AppState;
use crate::http::CommandRequest;

use super::{ArgumentSpec, CommandHandler, CommandMetadata, CommandOutput};

pub struct StatsCommand;

#[async_trait]
impl CommandHandler for StatsCommand {
    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "stats",
            help_text: "Channel activity and AI usage stats. Usage: !stats [channel]",
            required_permission: "normal",
            arguments: vec![ArgumentSpec {
                name: "channel",
                arg_type: "channel",
                required: false,
                description: "Channel to report on; defaults to the current one",
            }],
            timeout: 15,
            cooldown: 10,
            streaming: false,
        }
    }

    async fn run(
        &self,
        req: &CommandRequest,
        state: &AppState,
    ) -> Result<CommandOutput, String> {
        let channel = req
            .args
            .first()
            .cloned()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| req.channel.clone());
        if channel.is_empty() {
            return Err("No channel given and the request has none.".to_string());
        }

        let day = state
            .messages
            .count(&MessageQuery {
                channel: channel.clone(),
                since: Some(Utc::now() - Duration::hours(24)),
                ..Default::default()
            })
            .map_err(|e| e.to_string())?;
        let week = state
            .messages
            .count(&MessageQuery {
                channel: channel.clone(),
                since: Some(Utc::now() - Duration::days(7)),
                ..Default::default()
            })
            .map_err(|e| e.to_string())?;

        let usage = state
            .usage
            .summary(None, Some(&channel), Some(Utc::now() - Duration::days(7)))
            .map_err(|e| e.to_string())?;

        Ok(CommandOutput::Single(format!(
            "{channel}: {day} messages in 24h, {week} in 7d | AI this week: \
             {} request(s), {} tokens out, ${:.4}",
            usage.requests, usage.output_tokens, usage.cost_usd,
        )))
    }
}
