//! Mention endpoints: the blocking variant collects the orchestrator's
//! terminal event into one JSON body; the streaming variant relays every
//! event as one NDJSON frame per line, with buffering disabled so frames
//! reach the IRC client as they happen.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::info;

use marvin_agent::orchestrator::{AgentEvent, MentionJob};
use marvin_core::types::PermissionLevel;

use crate::app::AppState;

use super::{MentionRequest, MentionResponse};

fn to_job(req: &MentionRequest) -> MentionJob {
    MentionJob {
        request_id: if req.request_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            req.request_id.clone()
        },
        nick: req.nick.clone(),
        channel: req.channel.clone(),
        message: req.message.clone(),
        permission_level: req.permission_level,
        history: req.history.clone().unwrap_or_default(),
        deep_mode: req.deep_mode,
    }
}

/// Record the exchange in the message log; failures only warn, the reply
/// has priority over bookkeeping.
fn log_exchange(state: &AppState, req: &MentionRequest, reply: Option<&str>) {
    let _ = state
        .messages
        .append(&req.channel, &req.nick, &req.message, false, None);
    if let Some(reply) = reply {
        let _ = state.messages.append(&req.channel, "marvin", reply, true, None);
    }
}

/// POST /mention — blocking; runs the reasoning loop to completion.
pub async fn mention_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MentionRequest>,
) -> Json<MentionResponse> {
    info!(request_id = %req.request_id, nick = %req.nick, "mention request");

    if req.permission_level == PermissionLevel::Ignored {
        return Json(MentionResponse {
            request_id: req.request_id,
            status: "error",
            message: "You are on the ignore list.".to_string(),
        });
    }

    let mut rx = state.orchestrator.stream(to_job(&req));
    let mut terminal = AgentEvent::Error("No response produced.".to_string());
    while let Some(event) = rx.recv().await {
        if event.is_terminal() {
            terminal = event;
        }
        // Processing frames are dropped in blocking mode.
    }

    let reply = match &terminal {
        AgentEvent::Success(msg) => Some(msg.as_str()),
        _ => None,
    };
    log_exchange(&state, &req, reply);

    Json(MentionResponse {
        request_id: req.request_id,
        status: terminal.status(),
        message: terminal.message().to_string(),
    })
}

/// POST /mention/stream — newline-delimited JSON: zero or more processing
/// frames, then exactly one terminal frame.
pub async fn mention_stream_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MentionRequest>,
) -> Response {
    info!(request_id = %req.request_id, nick = %req.nick, "streaming mention request");

    if req.permission_level == PermissionLevel::Ignored {
        let frame = json!({
            "request_id": req.request_id,
            "status": "error",
            "message": "You are on the ignore list.",
            "streaming": false,
        });
        return ndjson_response(Body::from(format!("{frame}\n")));
    }

    let request_id = req.request_id.clone();
    let mut rx = state.orchestrator.stream(to_job(&req));

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            let frame = json!({
                "request_id": request_id,
                "status": event.status(),
                "message": event.message(),
                "streaming": !terminal,
            });
            if terminal {
                let reply = match &event {
                    AgentEvent::Success(msg) => Some(msg.as_str()),
                    _ => None,
                };
                log_exchange(&state, &req, reply);
            }
            yield Ok::<String, std::convert::Infallible>(format!("{frame}\n"));
            if terminal {
                break;
            }
        }
    };

    ndjson_response(Body::from_stream(stream))
}

fn ndjson_response(body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/x-ndjson")
        .header(header::CACHE_CONTROL, "no-cache")
        // Defeats proxy buffering so frames are delivered immediately.
        .header("X-Accel-Buffering", "no")
        .body(body)
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
