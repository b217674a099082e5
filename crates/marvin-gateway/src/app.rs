use std::sync::Arc;
use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};

use marvin_agent::orchestrator::Orchestrator;
use marvin_core::config::MarvinConfig;
use marvin_scheduler::ReminderStore;
use marvin_store::messages::MessageStore;
use marvin_store::usage::UsageStore;

use crate::commands::CommandRegistry;

/// Central shared state, passed as Arc<AppState> to every handler.
pub struct AppState {
    pub config: MarvinConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub reminders: Arc<ReminderStore>,
    pub messages: Arc<MessageStore>,
    pub usage: Arc<UsageStore>,
    pub commands: CommandRegistry,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: MarvinConfig,
        orchestrator: Arc<Orchestrator>,
        reminders: Arc<ReminderStore>,
        messages: Arc<MessageStore>,
        usage: Arc<UsageStore>,
    ) -> Self {
        Self {
            config,
            orchestrator,
            reminders,
            messages,
            usage,
            commands: CommandRegistry::with_builtins(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(crate::http::health::root_handler))
        .route("/health", get(crate::http::health::health_handler))
        .route("/mention", post(crate::http::mention::mention_handler))
        .route(
            "/mention/stream",
            post(crate::http::mention::mention_stream_handler),
        )
        .route("/command", post(crate::http::command::command_handler))
        .route(
            "/command/stream",
            post(crate::http::command::command_stream_handler),
        )
        .route("/commands", get(crate::http::command::commands_handler))
        .route(
            "/irc/join-check",
            post(crate::http::join_check::join_check_handler),
        )
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
