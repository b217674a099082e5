use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{info, warn};

use marvin_agent::limits::Quotas;
use marvin_agent::openai::OpenAiProvider;
use marvin_agent::orchestrator::{Orchestrator, OrchestratorSettings};
use marvin_agent::prompt::PromptBuilder;
use marvin_agent::tools::{build_registry, ToolServices};
use marvin_agent::uploads::FileUploader;
use marvin_agent::IrcClient;
use marvin_core::config::{Credentials, MarvinConfig};
use marvin_kb::{HttpVectorIndex, KnowledgeBase, OpenAiEmbedder};
use marvin_scheduler::{ReminderEngine, ReminderStore};
use marvin_store::bugs::BugStore;
use marvin_store::creds::CredentialStore;
use marvin_store::messages::MessageStore;
use marvin_store::rules::UserRulesStore;
use marvin_store::usage::UsageStore;

mod app;
mod commands;
mod http;

const DEFAULT_SYSTEM_PROMPT: &str = "You are Marvin, an AI assistant living on IRC. \
Answer concisely: IRC messages are short, so keep replies to a few sentences unless \
the user asks for depth. Use your tools when they genuinely help. Never invent tool \
results.";

#[derive(Parser)]
#[command(name = "marvin-gateway", about = "AI orchestration core for the IRC assistant")]
struct Cli {
    /// Path to marvin.toml (defaults to MARVIN_CONFIG or ./marvin.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marvin_gateway=info,marvin_agent=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = MarvinConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        MarvinConfig::default()
    });

    // Missing provider credentials are fatal: the HTTP boundary must never
    // open without a working model behind it.
    let creds = Credentials::from_env()?;

    // Relational store: messages, usage ledger, bugs share one connection.
    if let Some(parent) = std::path::Path::new(&config.database.path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = rusqlite::Connection::open(&config.database.path)?;
    marvin_store::db::init_db(&conn)?;
    let conn = Arc::new(Mutex::new(conn));
    let messages = Arc::new(MessageStore::new(conn.clone()));
    let usage = Arc::new(UsageStore::new(conn.clone()));
    let bugs = Arc::new(BugStore::new(conn));

    let reminders = Arc::new(ReminderStore::new(rusqlite::Connection::open(
        &config.database.reminders_path,
    )?)?);
    let rules = Arc::new(UserRulesStore::new(&config.database.user_rules_path)?);
    let service_creds = Arc::new(CredentialStore::new(&config.database.credentials_path)?);

    // Knowledge base plumbing.
    let embedder = Arc::new(OpenAiEmbedder::new(
        creds.openai_api_key.clone(),
        config.model.embedding_model.clone(),
    ));
    let index = Arc::new(HttpVectorIndex::new(config.kb.index_url.clone()));
    let kb = Arc::new(KnowledgeBase::new(
        index.clone(),
        embedder.clone(),
        config.kb.collection.clone(),
    ));

    let irc = Arc::new(IrcClient::new(
        config.irc.callback_url.clone(),
        std::time::Duration::from_secs(config.limits.irc_command_timeout_secs),
    ));
    let uploader = FileUploader::new(config.paste.upload_url.clone(), creds.botbin_api_key.clone());
    let quotas = Arc::new(Quotas::default());

    let services = ToolServices {
        messages: messages.clone(),
        usage: usage.clone(),
        bugs,
        rules: rules.clone(),
        creds: service_creds,
        reminders: reminders.clone(),
        kb,
        history_index: index.clone(),
        embedder: embedder.clone(),
        irc: irc.clone(),
        uploader,
        quotas: quotas.clone(),
        pricing: config.pricing.clone(),
    };
    let registry = Arc::new(build_registry(&config, &creds, &services));
    info!(tools = registry.len(), "tool registry ready");

    let provider = Arc::new(OpenAiProvider::new(creds.openai_api_key.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        provider,
        registry,
        PromptBuilder::new(DEFAULT_SYSTEM_PROMPT.to_string()),
        rules,
        usage.clone(),
        config.pricing.clone(),
        quotas,
        OrchestratorSettings {
            model: config.model.name.clone(),
            reasoning_effort: config.model.reasoning_effort.clone(),
            verbosity: config.model.verbosity.clone(),
            max_output_tokens: config.limits.max_output_tokens,
            timeout: std::time::Duration::from_secs(config.limits.timeout_secs),
        },
    ));

    // Background tasks: reminder delivery and message-embedding mirror.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(ReminderEngine::new(reminders.clone(), irc).run(shutdown_rx.clone()));
    tokio::spawn(
        marvin_kb::migrate::HistoryMigrator::new(
            messages.clone(),
            index,
            embedder,
            config.kb.history_collection.clone(),
        )
        .run(shutdown_rx),
    );

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(
        config,
        orchestrator,
        reminders,
        messages,
        usage,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("Marvin gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}
