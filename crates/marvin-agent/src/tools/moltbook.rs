//! `moltbook_post` — create posts on Moltbook (a social network for AI
//! agents). Credentials live in the service-credential store; the tool
//! only supports creating posts, not comments or votes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use marvin_store::creds::CredentialStore;

use super::{Caller, Tool, ToolReply};

// The www host matters: the bare domain redirects and strips the auth header.
const API_BASE: &str = "https://www.moltbook.com/api/v1";
const SUBMOLTS: &[&str] = &[
    "general",
    "aithoughts",
    "techhelp",
    "discoveries",
    "introductions",
];

pub struct MoltbookPostTool {
    client: reqwest::Client,
    creds: Arc<CredentialStore>,
}

impl MoltbookPostTool {
    pub fn new(creds: Arc<CredentialStore>) -> Self {
        Self {
            client: reqwest::Client::new(),
            creds,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    title: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default = "default_submolt")]
    submolt: String,
}

fn default_submolt() -> String {
    "general".to_string()
}

#[async_trait]
impl Tool for MoltbookPostTool {
    fn name(&self) -> &str {
        "moltbook_post"
    }

    fn description(&self) -> &str {
        "Create a new post on Moltbook (social network for AI agents). Use when a \
         user asks you to post or share something there. Submolts: general (default), \
         aithoughts (AI musings/philosophy), techhelp, discoveries, introductions. \
         Keep posts thoughtful; the title concise but descriptive. Either content \
         text or a url link is required. Rate limit: 1 post per 30 minutes."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "title": {
                    "type": "string",
                    "description": "Post title, concise but descriptive"
                },
                "content": {
                    "type": ["string", "null"],
                    "description": "Post body text. Mutually exclusive with url."
                },
                "url": {
                    "type": ["string", "null"],
                    "description": "Link to share instead of body text."
                },
                "submolt": {
                    "type": "string",
                    "enum": SUBMOLTS,
                    "description": "Community to post in. Default: general"
                }
            },
            "required": ["title"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        let Some(creds) = self.creds.get("moltbook") else {
            return ToolReply::error("Error: Moltbook credentials not configured");
        };
        let Some(api_key) = creds.get("api_key").and_then(|k| k.as_str()) else {
            return ToolReply::error("Error: Moltbook credentials have no api_key");
        };

        if input.title.trim().is_empty() {
            return ToolReply::error("Error: title cannot be empty");
        }
        if input.content.is_none() && input.url.is_none() {
            return ToolReply::error("Error: either content or url is required");
        }
        if !SUBMOLTS.contains(&input.submolt.as_str()) {
            return ToolReply::error(format!("Error: unknown submolt '{}'", input.submolt));
        }

        let mut body = json!({
            "title": input.title,
            "submolt": input.submolt,
        });
        if let Some(content) = input.content {
            body["content"] = json!(content);
        }
        if let Some(url) = input.url {
            body["url"] = json!(url);
        }

        let resp = match self
            .client
            .post(format!("{API_BASE}/posts"))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolReply::error(format!("Error: request failed - {e}")),
        };

        let status = resp.status().as_u16();
        if status == 429 {
            return ToolReply::error(
                "Error: Moltbook rate limit reached (1 post per 30 minutes). Try again later.",
            );
        }
        if status != 200 && status != 201 {
            let text = resp.text().await.unwrap_or_default();
            return ToolReply::error(format!("Error: {status} {text}"));
        }

        let parsed: Value = resp.json().await.unwrap_or_default();
        info!(nick = %caller.nick, "moltbook post created");
        match parsed.pointer("/post/url").or_else(|| parsed.get("url")).and_then(|u| u.as_str()) {
            Some(url) => ToolReply::text(format!("Posted to Moltbook: {url}")),
            None => ToolReply::text("Posted to Moltbook."),
        }
    }
}
