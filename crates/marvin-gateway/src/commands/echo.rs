//! `!echo` — repeat the arguments back.

use async_trait::async_trait;

use crate::app::AppState;
use crate::http::CommandRequest;

use super::{ArgumentSpec, CommandHandler, CommandMetadata, CommandOutput};

pub struct EchoCommand;

#[async_trait]
impl CommandHandler for EchoCommand {
    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "echo",
            help_text: "Echo text back. Usage: !echo <text>",
            required_permission: "normal",
            arguments: vec![ArgumentSpec {
                name: "text",
                arg_type: "string",
                required: true,
                description: "Text to echo back",
            }],
            timeout: 5,
            cooldown: 3,
            streaming: false,
        }
    }

    async fn run(
        &self,
        req: &CommandRequest,
        _state: &AppState,
    ) -> Result<CommandOutput, String> {
        Ok(CommandOutput::Single(req.args.join(" ")))
    }
}
