//! `create_paste` — push long or formatted content to the paste service
//! and hand back a short URL.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Caller, Tool, ToolReply};

const VALID_EXPIRIES: &[&str] = &["1day", "1week", "1month"];

pub struct CreatePasteTool {
    client: reqwest::Client,
    api_url: String,
}

impl CreatePasteTool {
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    content: String,
    #[serde(default = "default_lexer")]
    lexer: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default = "default_expiry")]
    expiry: String,
}

fn default_lexer() -> String {
    "text".to_string()
}

fn default_expiry() -> String {
    "1week".to_string()
}

#[async_trait]
impl Tool for CreatePasteTool {
    fn name(&self) -> &str {
        "create_paste"
    }

    fn description(&self) -> &str {
        "Create a paste for content that doesn't work well on IRC (code, long text, \
         formatted content). Use this when your response would exceed 3 IRC messages \
         or contains code that needs proper display. Returns a short URL."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The text or code content to paste"
                },
                "lexer": {
                    "type": "string",
                    "description": "Syntax highlighting language. Common: python, javascript, go, rust, bash, json, yaml, text. Default: text"
                },
                "filename": {
                    "type": "string",
                    "description": "Optional filename for the paste (e.g. 'example.py')"
                },
                "expiry": {
                    "type": "string",
                    "enum": ["1day", "1week", "1month"],
                    "description": "How long to keep the paste. Default: 1week"
                }
            },
            "required": ["content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };
        if input.content.is_empty() {
            return ToolReply::error("Error: paste content cannot be empty");
        }
        let expiry = if VALID_EXPIRIES.contains(&input.expiry.as_str()) {
            input.expiry
        } else {
            default_expiry()
        };

        let mut file = json!({
            "lexer": input.lexer,
            "content": input.content,
        });
        if let Some(name) = input.filename {
            file["name"] = json!(name);
        }

        let resp = match self
            .client
            .post(&self.api_url)
            .json(&json!({ "expiry": expiry, "files": [file] }))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolReply::error(format!("Error: paste service unreachable - {e}")),
        };

        if !resp.status().is_success() {
            return ToolReply::error(format!(
                "Error: paste service returned HTTP {}",
                resp.status().as_u16()
            ));
        }

        match resp.json::<Value>().await {
            Ok(body) => match body.get("link").or_else(|| body.get("url")).and_then(|v| v.as_str()) {
                Some(url) => ToolReply::text(format!("Paste created: {url}")),
                None => ToolReply::error("Error: paste service response had no link"),
            },
            Err(e) => ToolReply::error(format!("Error: unreadable paste response - {e}")),
        }
    }
}
