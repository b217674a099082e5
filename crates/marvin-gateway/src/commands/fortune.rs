//! `!fortune` — a pseudo-random one-liner.

use async_trait::async_trait;

use crate::app::AppState;
use crate::http::CommandRequest;

use super::{CommandHandler, CommandMetadata, CommandOutput};

const FORTUNES: &[&str] = &[
    "A watched compiler never finishes.",
    "You will find the bug in the last place you look. Stop looking there first.",
    "Today is a good day to read the logs you have been ignoring.",
    "An off-by-one error is nearer than it appears.",
    "The network is reliable, said no one ever.",
    "Your future holds a merge conflict, but it resolves cleanly.",
    "He who deploys on Friday debugs on Saturday.",
    "A cached answer is a fast answer. It may even be correct.",
];

pub struct FortuneCommand;

#[async_trait]
impl CommandHandler for FortuneCommand {
    fn metadata(&self) -> CommandMetadata {
        CommandMetadata {
            name: "fortune",
            help_text: "Get a random fortune. Usage: !fortune",
            required_permission: "normal",
            arguments: vec![],
            timeout: 5,
            cooldown: 5,
            streaming: false,
        }
    }

    async fn run(
        &self,
        _req: &CommandRequest,
        _state: &AppState,
    ) -> Result<CommandOutput, String> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos() as usize)
            .unwrap_or(0);
        Ok(CommandOutput::Single(
            FORTUNES[nanos % FORTUNES.len()].to_string(),
        ))
    }
}
