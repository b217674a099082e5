use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (marvin.toml + MARVIN_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MarvinConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web_search: WebSearchConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub irc: IrcConfig,
    #[serde(default)]
    pub kb: KbConfig,
    #[serde(default)]
    pub paste: PasteConfig,
    #[serde(default)]
    pub pricing: crate::pricing::PricingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,
    /// Reasoning effort for normal requests; deep mode forces "high".
    #[serde(default = "default_effort")]
    pub reasoning_effort: String,
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
    /// Embedding model used by the knowledge base.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            reasoning_effort: default_effort(),
            verbosity: default_verbosity(),
            embedding_model: default_embedding_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Provider call timeout in seconds for normal requests.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_shell_timeout")]
    pub shell_exec_timeout_secs: u64,
    #[serde(default = "default_irc_timeout")]
    pub irc_command_timeout_secs: u64,
    #[serde(default = "default_sandbox_timeout")]
    pub sandbox_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
            shell_exec_timeout_secs: default_shell_timeout(),
            irc_command_timeout_secs: default_irc_timeout(),
            sandbox_timeout_secs: default_sandbox_timeout(),
        }
    }
}

/// Enable flags for every tool. The status-report tool has no flag; it is
/// always registered because the orchestrator depends on it for progress
/// updates during long tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub web_search: bool,
    pub python_exec: bool,
    pub fetch_url: bool,
    pub flux_create: bool,
    pub flux_edit: bool,
    pub gpt_image: bool,
    pub gemini_image: bool,
    pub image_analysis: bool,
    pub chat_history: bool,
    pub user_rules: bool,
    pub paste: bool,
    pub shell_exec: bool,
    pub null_response: bool,
    pub bug_report: bool,
    pub irc_command: bool,
    pub kb_learn: bool,
    pub kb_search: bool,
    pub kb_list: bool,
    pub kb_forget: bool,
    pub reminder: bool,
    pub usage_stats: bool,
    pub youtube_search: bool,
    pub sora_video: bool,
    pub moltbook_post: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_search: true,
            python_exec: true,
            fetch_url: true,
            flux_create: true,
            flux_edit: true,
            gpt_image: true,
            gemini_image: true,
            image_analysis: true,
            chat_history: true,
            user_rules: true,
            paste: true,
            shell_exec: true,
            null_response: true,
            bug_report: true,
            irc_command: true,
            kb_learn: true,
            kb_search: true,
            kb_list: true,
            kb_forget: true,
            reminder: true,
            usage_stats: true,
            youtube_search: true,
            sora_video: true,
            moltbook_post: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Relational store (messages, usage, bugs).
    #[serde(default = "default_db_path")]
    pub path: String,
    /// Reminder store.
    #[serde(default = "default_reminders_path")]
    pub reminders_path: String,
    /// Per-user rules JSON file.
    #[serde(default = "default_rules_path")]
    pub user_rules_path: String,
    /// Service credentials JSON file.
    #[serde(default = "default_creds_path")]
    pub credentials_path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            reminders_path: default_reminders_path(),
            user_rules_path: default_rules_path(),
            credentials_path: default_creds_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSearchConfig {
    #[serde(default = "bool_true")]
    pub external_web_access: bool,
    /// When non-empty, native web search is restricted to these domains.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Default for WebSearchConfig {
    fn default() -> Self {
        Self {
            external_web_access: true,
            allowed_domains: Vec::new(),
        }
    }
}

/// Sandbox microVM wiring for the code-execution tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Host-side unix socket bridging to the guest vsock listener.
    #[serde(default = "default_vsock_path")]
    pub vsock_path: String,
    /// Guest vsock port the exec agent listens on.
    #[serde(default = "default_vsock_port")]
    pub vsock_port: u32,
    /// Script that boots the microVM when it is not running.
    #[serde(default)]
    pub start_script: Option<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            vsock_path: default_vsock_path(),
            vsock_port: default_vsock_port(),
            start_script: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrcConfig {
    /// Base URL of the IRC client's callback server (`/irc/execute` lives here).
    /// Overridden by the GO_BOT_CALLBACK_URL env var when set.
    #[serde(default = "default_irc_callback")]
    pub callback_url: String,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            callback_url: default_irc_callback(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KbConfig {
    /// Vector index endpoint (Chroma-style REST API).
    #[serde(default = "default_index_url")]
    pub index_url: String,
    #[serde(default = "default_kb_collection")]
    pub collection: String,
    /// Collection the message-embedding migration job writes to.
    #[serde(default = "default_history_collection")]
    pub history_collection: String,
}

impl Default for KbConfig {
    fn default() -> Self {
        Self {
            index_url: default_index_url(),
            collection: default_kb_collection(),
            history_collection: default_history_collection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasteConfig {
    /// Text paste service (bpa.st-compatible API).
    #[serde(default = "default_paste_url")]
    pub api_url: String,
    /// Binary/file upload host for generated images and videos.
    #[serde(default = "default_upload_url")]
    pub upload_url: String,
}

impl Default for PasteConfig {
    fn default() -> Self {
        Self {
            api_url: default_paste_url(),
            upload_url: default_upload_url(),
        }
    }
}

/// Credentials resolved from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub openai_api_key: String,
    pub bfl_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub botbin_api_key: Option<String>,
    pub bedrock_token: Option<String>,
}

impl Credentials {
    /// Read credentials from the environment. The provider key is required;
    /// the process must decline to start without it.
    pub fn from_env() -> crate::error::Result<Self> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(crate::error::CoreError::MissingCredential {
                name: "OPENAI_API_KEY",
            })?;
        Ok(Self {
            openai_api_key,
            bfl_api_key: std::env::var("BFL_API_KEY").ok(),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            google_api_key: std::env::var("GOOGLE_API_KEY").ok(),
            botbin_api_key: std::env::var("BOTBIN_API_KEY").ok(),
            bedrock_token: std::env::var("AWS_BEARER_TOKEN_BEDROCK").ok(),
        })
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "gpt-5.2".to_string()
}
fn default_effort() -> String {
    "medium".to_string()
}
fn default_verbosity() -> String {
    "low".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_max_output_tokens() -> u32 {
    4000
}
fn default_timeout_secs() -> u64 {
    240
}
fn default_shell_timeout() -> u64 {
    30
}
fn default_irc_timeout() -> u64 {
    30
}
fn default_sandbox_timeout() -> u64 {
    180
}
fn default_db_path() -> String {
    "data/bot.db".to_string()
}
fn default_reminders_path() -> String {
    "data/reminders.db".to_string()
}
fn default_rules_path() -> String {
    "data/user_rules.json".to_string()
}
fn default_creds_path() -> String {
    "data/service_credentials.json".to_string()
}
fn default_vsock_path() -> String {
    "scripts/firecracker/vsock.sock".to_string()
}
fn default_vsock_port() -> u32 {
    5000
}
fn default_irc_callback() -> String {
    "http://localhost:8001".to_string()
}
fn default_index_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_kb_collection() -> String {
    "knowledge_base".to_string()
}
fn default_history_collection() -> String {
    "chat_history".to_string()
}
fn default_paste_url() -> String {
    "https://bpa.st/api/v1/paste".to_string()
}
fn default_upload_url() -> String {
    "https://botbin.net/upload".to_string()
}
fn bool_true() -> bool {
    true
}

impl MarvinConfig {
    /// Load config from a TOML file with MARVIN_* env var overrides.
    ///
    /// Checks in order: explicit path argument, `MARVIN_CONFIG` env,
    /// `marvin.toml` in the working directory.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("MARVIN_CONFIG").ok())
            .unwrap_or_else(|| "marvin.toml".to_string());

        let mut config: MarvinConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("MARVIN_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        // The IRC client callback keeps its historical env override.
        if let Ok(url) = std::env::var("GO_BOT_CALLBACK_URL") {
            if !url.is_empty() {
                config.irc.callback_url = url;
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = MarvinConfig::default();
        assert_eq!(config.gateway.port, DEFAULT_PORT);
        assert_eq!(config.model.name, "gpt-5.2");
        assert_eq!(config.limits.timeout_secs, 240);
        assert!(config.tools.web_search);
        assert!(config.tools.reminder);
    }

    #[test]
    fn tools_section_accepts_partial_toml() {
        let config: ToolsConfig = toml::from_str("shell_exec = false").unwrap();
        assert!(!config.shell_exec);
        assert!(config.web_search);
    }
}
