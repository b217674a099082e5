//! `!ping` — liveness check with uptime.

use async_trait::async_trait;

use crate::app::AppState;
use crate::http::CommandRequest;

use super::{CommandHandler, CommandMetadata, CommandOutput};

pub struct PingCommand;

#[async_trait]
impl CommandHandler for PingCommand {
    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "ping",
            help_text: "Check that the bot core is alive. Usage: !ping",
            required_permission: "normal",
            arguments: vec![],
            timeout: 5,
            cooldown: 3,
            streaming: false,
        }
    }

    async fn run(
        &self,
        _req: &CommandRequest,
        state: &AppState,
    ) -> Result<CommandOutput, String> {
        let uptime = state.uptime_secs();
        let hours = (uptime / 3600.0) as u64;
        let minutes = ((uptime % 3600.0) / 60.0) as u64;
        Ok(CommandOutput::Single(format!(
            "Pong! Core up for {hours}h {minutes}m."
        )))
    }
}
