//! `!announce` — multi-chunk output; the reference streaming handler.

use async_trait::async_trait;

use crate::app::AppState;
use crate::http::CommandRequest;

use super::{ArgumentSpec, CommandHandler, CommandMetadata, CommandOutput};

pub struct AnnounceCommand;

#[async_trait]
impl CommandHandler for AnnounceCommand {
    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "announce",
            help_text: "Format an announcement, delivered line by line. \
                        Usage: !announce <text>",
            required_permission: "admin",
            arguments: vec![ArgumentSpec {
                name: "text",
                arg_type: "string",
                required: true,
                description: "Announcement text; sentences become separate lines",
            }],
            timeout: 10,
            cooldown: 30,
            streaming: true,
        }
    }

    async fn run(
        &self,
        req: &CommandRequest,
        _state: &AppState,
    ) -> Result<CommandOutput, String> {
        let text = req.args.join(" ");
        let mut chunks = vec!["=== ANNOUNCEMENT ===".to_string()];
        chunks.extend(
            text.split(". ")
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.trim_end_matches('.').to_string()),
        );
        chunks.push("=== END ===".to_string());
        Ok(CommandOutput::Stream(chunks))
    }
}
