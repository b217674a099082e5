pub mod command;
pub mod health;
pub mod join_check;
pub mod mention;

use serde::{Deserialize, Serialize};

use marvin_core::types::{HistoryMessage, PermissionLevel};

/// Inbound mention from the IRC client.
#[derive(Debug, Clone, Deserialize)]
pub struct MentionRequest {
    pub request_id: String,
    pub nick: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub hostmask: Option<String>,
    pub channel: String,
    pub message: String,
    #[serde(default)]
    pub permission_level: PermissionLevel,
    #[serde(default)]
    pub history: Option<Vec<HistoryMessage>>,
    #[serde(default)]
    pub deep_mode: bool,
}

#[derive(Debug, Serialize)]
pub struct MentionResponse {
    pub request_id: String,
    pub status: &'static str,
    pub message: String,
}

/// Inbound direct command (bypasses the reasoning loop).
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub request_id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub nick: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub hostmask: Option<String>,
    #[serde(default)]
    pub channel: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub is_pm: bool,
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub request_id: String,
    pub status: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_level: Option<String>,
    pub streaming: bool,
}
