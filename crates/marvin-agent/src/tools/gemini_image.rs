//! `gemini_image` — image generation through the Gemini generateContent
//! API. Responses may contain several inline images; each is re-hosted and
//! the URLs are returned `|`-joined.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::uploads::FileUploader;

use super::{Caller, Tool, ToolReply};

const MODEL: &str = "gemini-3-pro-image-preview";
const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiImageTool {
    client: reqwest::Client,
    api_key: Option<String>,
    uploader: FileUploader,
}

impl GeminiImageTool {
    pub fn new(api_key: Option<String>, uploader: FileUploader) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            uploader,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    prompt: String,
}

#[async_trait]
impl Tool for GeminiImageTool {
    fn name(&self) -> &str {
        "gemini_image"
    }

    fn description(&self) -> &str {
        "Generate an image with Google's Gemini image model. Strong at artistic \
         styles, multi-subject scenes, and iterating on a concept. Returns one URL, \
         or several joined with '|' when the model produces variants."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the image to generate"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let Some(ref api_key) = self.api_key else {
            return ToolReply::error("Error: GEMINI_API_KEY not configured");
        };
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        debug!("gemini image generation");
        let url = format!("{API_BASE}/models/{MODEL}:generateContent?key={api_key}");
        let resp = match self
            .client
            .post(&url)
            .json(&json!({
                "contents": [{ "parts": [{ "text": input.prompt }] }],
            }))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolReply::error(format!("Error: request failed - {e}")),
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(status, "gemini image API error");
            return ToolReply::error(format!("Error: {status} {body}"));
        }

        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => return ToolReply::error(format!("Error: bad response - {e}")),
        };

        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        let mut urls = Vec::new();
        for (i, part) in parts.iter().enumerate() {
            let Some(data) = part.pointer("/inlineData/data").and_then(|d| d.as_str()) else {
                continue;
            };
            let bytes = match base64::engine::general_purpose::STANDARD.decode(data) {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            match self
                .uploader
                .upload(bytes, &format!("gemini_image_{i}.png"))
                .await
            {
                Ok(url) => urls.push(url),
                Err(e) => return ToolReply::error(format!("Error: {e}")),
            }
        }

        if urls.is_empty() {
            return ToolReply::error("Error: response contained no image data");
        }
        ToolReply::text(urls.join("|"))
    }
}
