//! Command endpoints: direct handlers that bypass the reasoning loop, plus
//! the `/commands` metadata catalogue the IRC client uses for help text
//! and argument validation.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{info, warn};

use crate::app::AppState;
use crate::commands::CommandOutput;

use super::{CommandRequest, CommandResponse};

/// POST /command — run a named handler and return its single response.
pub async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> Json<CommandResponse> {
    info!(request_id = %req.request_id, command = %req.command, nick = %req.nick, "command request");

    match state.commands.dispatch(&req, &state).await {
        Ok(CommandOutput::Single(message)) => Json(CommandResponse {
            request_id: req.request_id,
            status: "success",
            message,
            required_level: None,
            streaming: false,
        }),
        Ok(CommandOutput::Stream(chunks)) => Json(CommandResponse {
            request_id: req.request_id,
            status: "success",
            // A streaming handler hit through the blocking endpoint
            // collapses to its joined chunks.
            message: chunks.join(" "),
            required_level: None,
            streaming: false,
        }),
        Err(e) => {
            warn!(request_id = %req.request_id, "command failed: {}", e.message);
            Json(CommandResponse {
                request_id: req.request_id,
                status: "error",
                message: e.message,
                required_level: e.required_level,
                streaming: false,
            })
        }
    }
}

/// POST /command/stream — NDJSON frames. Single-value handlers are wrapped
/// as one non-streaming frame; multi-chunk handlers yield one frame per
/// chunk with `streaming: true` until the last.
pub async fn command_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CommandRequest>,
) -> Response {
    info!(request_id = %req.request_id, command = %req.command, "streaming command request");

    let result = state.commands.dispatch(&req, &state).await;
    let request_id = req.request_id.clone();

    let frames: Vec<serde_json::Value> = match result {
        Ok(CommandOutput::Single(message)) => vec![json!({
            "request_id": request_id,
            "status": "success",
            "message": message,
            "streaming": false,
        })],
        Ok(CommandOutput::Stream(chunks)) => {
            let last = chunks.len().saturating_sub(1);
            chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| {
                    json!({
                        "request_id": request_id,
                        "status": "success",
                        "message": chunk,
                        "streaming": i != last,
                    })
                })
                .collect()
        }
        Err(e) => vec![json!({
            "request_id": request_id,
            "status": "error",
            "message": e.message,
            "streaming": false,
        })],
    };

    let body = frames
        .into_iter()
        .map(|frame| format!("{frame}\n"))
        .collect::<String>();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// GET /commands — metadata for every registered command.
pub async fn commands_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({ "commands": state.commands.metadata() }))
}
