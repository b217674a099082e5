//! Direct command handlers. These bypass the reasoning loop entirely: the
//! IRC client maps `!command args` straight onto `POST /command`.
//!
//! Each handler carries metadata (help text, argument schema, cooldown,
//! streaming flag) surfaced through `GET /commands` so the client can
//! validate and render help without hardcoding anything.

pub mod announce;
pub mod echo;
pub mod fortune;
pub mod ping;
pub mod stats;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::app::AppState;
use crate::http::CommandRequest;

#[derive(Debug, Clone, Serialize)]
pub struct ArgumentSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub arg_type: &'static str,
    pub required: bool,
    pub description: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandMetadata {
    pub name: &'static str,
    pub help_text: &'static str,
    pub required_permission: &'static str,
    pub arguments: Vec<ArgumentSpec>,
    /// Seconds the handler may run.
    pub timeout: u64,
    /// Per-user cooldown in seconds; 0 disables it.
    pub cooldown: u64,
    pub streaming: bool,
}

pub enum CommandOutput {
    Single(String),
    /// Progressive chunks for the streaming endpoint.
    Stream(Vec<String>),
}

pub struct CommandError {
    pub message: String,
    pub required_level: Option<String>,
}

impl CommandError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            required_level: None,
        }
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn metadata(&self) -> CommandMetadata;
    async fn run(&self, req: &CommandRequest, state: &AppState)
        -> Result<CommandOutput, String>;
}

pub struct CommandRegistry {
    handlers: HashMap<&'static str, Box<dyn CommandHandler>>,
    /// (command, lowercased nick) -> last invocation.
    cooldowns: DashMap<(String, String), Instant>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            cooldowns: DashMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(ping::PingCommand));
        registry.register(Box::new(echo::EchoCommand));
        registry.register(Box::new(fortune::FortuneCommand));
        registry.register(Box::new(stats::StatsCommand));
        registry.register(Box::new(announce::AnnounceCommand));
        registry
    }

    pub fn register(&mut self, handler: Box<dyn CommandHandler>) {
        self.handlers.insert(handler.metadata().name, handler);
    }

    pub fn metadata(&self) -> Vec<CommandMetadata> {
        let mut all: Vec<CommandMetadata> =
            self.handlers.values().map(|h| h.metadata()).collect();
        all.sort_by_key(|m| m.name);
        all
    }

    pub async fn dispatch(
        &self,
        req: &CommandRequest,
        state: &AppState,
    ) -> Result<CommandOutput, CommandError> {
        let Some(handler) = self.handlers.get(req.command.as_str()) else {
            return Err(CommandError::new(format!(
                "Unknown command: {}",
                req.command
            )));
        };
        let metadata = handler.metadata();

        let required = metadata.arguments.iter().filter(|a| a.required).count();
        if req.args.len() < required {
            let names: Vec<&str> = metadata
                .arguments
                .iter()
                .filter(|a| a.required)
                .map(|a| a.name)
                .collect();
            return Err(CommandError::new(format!(
                "Missing argument(s): {} requires {}",
                metadata.name,
                names.join(", ")
            )));
        }

        if metadata.cooldown > 0 {
            let key = (req.command.clone(), req.nick.to_lowercase());
            if let Some(last) = self.cooldowns.get(&key) {
                let elapsed = last.elapsed();
                let window = Duration::from_secs(metadata.cooldown);
                if elapsed < window {
                    return Err(CommandError::new(format!(
                        "Slow down: {} is on cooldown for another {}s",
                        metadata.name,
                        (window - elapsed).as_secs().max(1)
                    )));
                }
            }
            self.cooldowns.insert(key, Instant::now());
        }

        match tokio::time::timeout(
            Duration::from_secs(metadata.timeout),
            handler.run(req, state),
        )
        .await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(CommandError::new(message)),
            Err(_) => Err(CommandError::new(format!(
                "Command {} timed out after {}s",
                metadata.name, metadata.timeout
            ))),
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(command: &str, args: Vec<&str>) -> CommandRequest {
        CommandRequest {
            request_id: "req-1".to_string(),
            command: command.to_string(),
            args: args.into_iter().map(String::from).collect(),
            nick: "alice".to_string(),
            hostmask: None,
            channel: "#x".to_string(),
            is_pm: false,
        }
    }

    #[test]
    fn builtins_are_catalogued_sorted() {
        let registry = CommandRegistry::with_builtins();
        let names: Vec<&str> = registry.metadata().iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["announce", "echo", "fortune", "ping", "stats"]);
    }

    #[test]
    fn missing_required_args_are_rejected_before_dispatch() {
        let registry = CommandRegistry::with_builtins();
        let req = request("echo", vec![]);
        // The error path needs no AppState; validate against metadata only.
        let metadata = registry.handlers.get("echo").unwrap().metadata();
        let required = metadata.arguments.iter().filter(|a| a.required).count();
        assert!(req.args.len() < required);
    }
}
