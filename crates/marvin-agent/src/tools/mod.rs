//! Tool system for the reasoning loop.
//!
//! Every tool exposes a name, a provider-format definition, and a typed
//! `execute` taking the parsed argument object plus the injected caller
//! identity. Replies are a sum type; the legacy string markers exist only
//! at the wire edge (the two marker tools emit them, `ToolReply::from_wire`
//! parses them back) so language-agnostic clients keep working.

pub mod analyze_image;
pub mod bug_report;
pub mod chat_history;
pub mod fetch_url;
pub mod flux;
pub mod gemini_image;
pub mod gpt_image;
pub mod irc_command;
pub mod knowledge;
pub mod moltbook;
pub mod null_response;
pub mod paste;
pub mod python_exec;
pub mod reminder;
pub mod report_status;
pub mod shell_exec;
pub mod usage_stats;
pub mod user_rules;
pub mod video;
pub mod web_search;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use marvin_core::config::{Credentials, MarvinConfig};
use marvin_core::pricing::PricingConfig;
use marvin_core::types::PermissionLevel;
use marvin_kb::{Embedder, KnowledgeBase, VectorIndex};
use marvin_scheduler::ReminderStore;
use marvin_store::bugs::BugStore;
use marvin_store::creds::CredentialStore;
use marvin_store::messages::MessageStore;
use marvin_store::rules::UserRulesStore;
use marvin_store::usage::UsageStore;

use crate::irc::IrcClient;
use crate::limits::Quotas;
use crate::uploads::FileUploader;

/// Wire form of a status update: marker + status text.
pub const STATUS_UPDATE_MARKER: &str = "<<STATUS_UPDATE>>";
/// Wire form of the explicit decision not to speak.
pub const NULL_RESPONSE_MARKER: &str = "<<NULL_RESPONSE>>";

/// Who invoked the tool. Injected by the orchestrator on every call; tools
/// never see raw permission strings from the model.
#[derive(Debug, Clone)]
pub struct Caller {
    pub nick: String,
    pub channel: String,
    pub level: PermissionLevel,
}

/// Typed tool outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolReply {
    /// Normal result text fed back into the reasoning chain.
    Text(String),
    /// In-flight progress line for the user; the model sees an ack instead.
    Status(String),
    /// Explicit silence: the terminal event becomes `null`.
    Null,
    /// Recoverable failure; the message flows back so the model can adapt.
    Error(String),
}

impl ToolReply {
    pub fn text(s: impl Into<String>) -> Self {
        ToolReply::Text(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        ToolReply::Error(s.into())
    }

    /// Parse a wire-form string (with markers) into the typed reply.
    pub fn from_wire(s: String) -> Self {
        if s == NULL_RESPONSE_MARKER {
            ToolReply::Null
        } else if let Some(status) = s.strip_prefix(STATUS_UPDATE_MARKER) {
            ToolReply::Status(status.to_string())
        } else {
            ToolReply::Text(s)
        }
    }

    /// What the model sees as the function output.
    pub fn wire_output(&self) -> String {
        match self {
            ToolReply::Text(s) => s.clone(),
            ToolReply::Status(_) => "Status reported to user.".to_string(),
            ToolReply::Null => NULL_RESPONSE_MARKER.to_string(),
            ToolReply::Error(s) => s.clone(),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name, e.g. "fetch_url".
    fn name(&self) -> &str;
    /// Description shown to the model.
    fn description(&self) -> &str;
    /// JSON Schema for the argument object. Authoritative: the orchestrator
    /// does no validation beyond JSON parsing.
    fn parameters(&self) -> Value;
    /// Provider-format definition. Function tools use the default; native
    /// provider tools (web search) override it wholesale.
    fn definition(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name(),
            "description": self.description(),
            "parameters": self.parameters(),
        })
    }
    /// Execute with parsed arguments and injected caller identity.
    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply;
}

/// Image tools sharing the global hourly quota.
pub fn is_image_tool(name: &str) -> bool {
    matches!(
        name,
        "flux_create_image" | "flux_edit_image" | "gpt_image" | "gemini_image"
    )
}

/// Read-only after startup; names are unique.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug_assert!(!self.tools.contains_key(&name), "duplicate tool {name}");
        info!(tool = %name, "tool registered");
        self.order.push(name.clone());
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Definitions in registration order, sent with every provider call.
    pub fn definitions(&self) -> Vec<Value> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.definition())
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything tools may need, bundled for registry construction.
pub struct ToolServices {
    pub messages: Arc<MessageStore>,
    pub usage: Arc<UsageStore>,
    pub bugs: Arc<BugStore>,
    pub rules: Arc<UserRulesStore>,
    pub creds: Arc<CredentialStore>,
    pub reminders: Arc<ReminderStore>,
    pub kb: Arc<KnowledgeBase>,
    pub history_index: Arc<dyn VectorIndex>,
    pub embedder: Arc<dyn Embedder>,
    pub irc: Arc<IrcClient>,
    pub uploader: FileUploader,
    pub quotas: Arc<Quotas>,
    pub pricing: PricingConfig,
}

/// Build the registry from the config's enable flags. `report_status` is
/// always present; the orchestrator depends on it.
pub fn build_registry(
    config: &MarvinConfig,
    creds: &Credentials,
    services: &ToolServices,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    let flags = &config.tools;

    if flags.web_search {
        registry.register(Arc::new(web_search::WebSearchTool::new(
            config.web_search.external_web_access,
            config.web_search.allowed_domains.clone(),
        )));
    }
    if flags.python_exec {
        registry.register(Arc::new(python_exec::SandboxExecTool::new(
            config.sandbox.clone(),
            config.limits.sandbox_timeout_secs,
            services.uploader.clone(),
        )));
    }
    if flags.fetch_url {
        registry.register(Arc::new(fetch_url::FetchUrlTool::new()));
    }
    if flags.flux_create {
        registry.register(Arc::new(flux::FluxCreateTool::new(
            creds.bfl_api_key.clone(),
            services.uploader.clone(),
        )));
    }
    if flags.flux_edit {
        registry.register(Arc::new(flux::FluxEditTool::new(
            creds.bfl_api_key.clone(),
            services.uploader.clone(),
        )));
    }
    if flags.gpt_image {
        registry.register(Arc::new(gpt_image::GptImageTool::new(
            creds.openai_api_key.clone(),
            services.uploader.clone(),
        )));
    }
    if flags.gemini_image {
        registry.register(Arc::new(gemini_image::GeminiImageTool::new(
            creds.gemini_api_key.clone(),
            services.uploader.clone(),
        )));
    }
    if flags.image_analysis {
        registry.register(Arc::new(analyze_image::AnalyzeImageTool::new()));
    }
    if flags.chat_history {
        registry.register(Arc::new(chat_history::ChatHistoryTool::new(
            services.messages.clone(),
            services.history_index.clone(),
            services.embedder.clone(),
            config.kb.history_collection.clone(),
        )));
    }
    if flags.user_rules {
        registry.register(Arc::new(user_rules::ManageUserRulesTool::new(
            services.rules.clone(),
        )));
    }
    if flags.paste {
        registry.register(Arc::new(paste::CreatePasteTool::new(
            config.paste.api_url.clone(),
        )));
    }
    if flags.shell_exec {
        registry.register(Arc::new(shell_exec::ExecuteShellTool::new(
            config.limits.shell_exec_timeout_secs,
        )));
    }
    if flags.null_response {
        registry.register(Arc::new(null_response::NullResponseTool::new()));
    }
    if flags.bug_report {
        registry.register(Arc::new(bug_report::BugReportTool::new(
            services.bugs.clone(),
        )));
    }
    if flags.irc_command {
        registry.register(Arc::new(irc_command::IrcCommandTool::new(
            services.irc.clone(),
        )));
    }
    if flags.kb_learn {
        registry.register(Arc::new(knowledge::KbLearnTool::new(services.kb.clone())));
    }
    if flags.kb_search {
        registry.register(Arc::new(knowledge::KbSearchTool::new(services.kb.clone())));
    }
    if flags.kb_list {
        registry.register(Arc::new(knowledge::KbListTool::new(services.kb.clone())));
    }
    if flags.kb_forget {
        registry.register(Arc::new(knowledge::KbForgetTool::new(services.kb.clone())));
    }
    if flags.reminder {
        registry.register(Arc::new(reminder::ReminderTool::new(
            services.reminders.clone(),
        )));
    }
    if flags.usage_stats {
        registry.register(Arc::new(usage_stats::UsageStatsTool::new(
            services.usage.clone(),
            services.pricing.clone(),
        )));
    }
    if flags.youtube_search {
        registry.register(Arc::new(youtube::YouTubeSearchTool::new(
            creds.google_api_key.clone(),
        )));
    }
    if flags.sora_video {
        registry.register(Arc::new(video::SoraVideoTool::new(
            creds.openai_api_key.clone(),
            services.uploader.clone(),
            services.quotas.clone(),
        )));
    }
    if flags.moltbook_post {
        registry.register(Arc::new(moltbook::MoltbookPostTool::new(
            services.creds.clone(),
        )));
    }

    registry.register(Arc::new(report_status::ReportStatusTool::new()));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_roundtrip_preserves_markers() {
        assert_eq!(
            ToolReply::from_wire("<<NULL_RESPONSE>>".to_string()),
            ToolReply::Null
        );
        assert_eq!(
            ToolReply::from_wire("<<STATUS_UPDATE>>working on it".to_string()),
            ToolReply::Status("working on it".to_string())
        );
        assert_eq!(
            ToolReply::from_wire("plain result".to_string()),
            ToolReply::Text("plain result".to_string())
        );
    }

    #[test]
    fn status_reply_acks_to_the_model() {
        let reply = ToolReply::Status("Searching...".to_string());
        assert_eq!(reply.wire_output(), "Status reported to user.");
    }

    #[test]
    fn image_tool_set_matches_quota_scope() {
        assert!(is_image_tool("flux_create_image"));
        assert!(is_image_tool("gemini_image"));
        assert!(!is_image_tool("sora_video"));
        assert!(!is_image_tool("fetch_url"));
    }
}
