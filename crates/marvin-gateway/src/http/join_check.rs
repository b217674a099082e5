//! POST /irc/join-check — the pull side of join reminders. The IRC client
//! posts here when a user joins a channel; matched reminders come back as
//! ready-to-send lines and are marked delivered atomically, so a repeated
//! join cannot deliver twice.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::app::AppState;

#[derive(Deserialize)]
pub struct JoinCheckRequest {
    pub nick: String,
    pub channel: String,
}

#[derive(Serialize)]
pub struct JoinCheckResponse {
    pub messages: Vec<String>,
}

pub async fn join_check_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinCheckRequest>,
) -> Json<JoinCheckResponse> {
    match state.reminders.join_check(&req.nick, &req.channel) {
        Ok(messages) => Json(JoinCheckResponse { messages }),
        Err(e) => {
            warn!(nick = %req.nick, channel = %req.channel, "join check failed: {e}");
            Json(JoinCheckResponse {
                messages: Vec::new(),
            })
        }
    }
}
