//! `report_status` — surface an in-flight progress line to the user
//! without breaking the reasoning chain.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Caller, Tool, ToolReply};

pub struct ReportStatusTool;

impl ReportStatusTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReportStatusTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Input {
    status_message: String,
}

#[async_trait]
impl Tool for ReportStatusTool {
    fn name(&self) -> &str {
        "report_status"
    }

    fn description(&self) -> &str {
        "Report your current status or what you are doing to the user. Use this when \
         performing multi-step tasks, research, or when an operation might take time. \
         This keeps the user informed without stopping your work. \
         Example: 'Reading the abstract of the paper...', 'Searching for counter-arguments...'"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "status_message": {
                    "type": "string",
                    "description": "The concise status message to show the user (e.g. 'Searching for X', 'Reading file Y')"
                }
            },
            "required": ["status_message"]
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        match serde_json::from_value::<Input>(args) {
            Ok(input) => ToolReply::Status(input.status_message),
            Err(_) => ToolReply::error("Error: status_message is required"),
        }
    }
}
