use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::app::AppState;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// GET /health — liveness probe.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime": state.uptime_secs(),
        "version": VERSION,
    }))
}

/// GET / — basic metadata.
pub async fn root_handler() -> Json<Value> {
    Json(json!({
        "name": "Marvin IRC assistant core",
        "version": VERSION,
        "status": "running",
    }))
}
