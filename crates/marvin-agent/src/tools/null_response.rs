//! `null_response` — the explicit decision to say nothing at all.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{Caller, Tool, ToolReply};

pub struct NullResponseTool;

impl NullResponseTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullResponseTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Input {
    #[serde(default)]
    reason: String,
}

#[async_trait]
impl Tool for NullResponseTool {
    fn name(&self) -> &str {
        "null_response"
    }

    fn description(&self) -> &str {
        "Use this tool when the user explicitly asks you NOT to respond, stay silent, \
         or ignore their message (e.g. 'don't respond to this', 'stay quiet', 'shh', \
         'no reply please'). This causes NO message to be sent to IRC. Do NOT use it \
         for normal questions, rudeness, or uncertainty; only when the user explicitly \
         requests silence."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Brief reason for staying silent (logged only, never sent)."
                }
            },
            "required": ["reason"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let reason = serde_json::from_value::<Input>(args)
            .map(|i| i.reason)
            .unwrap_or_default();
        info!(nick = %caller.nick, %reason, "null response: staying silent");
        ToolReply::Null
    }
}
