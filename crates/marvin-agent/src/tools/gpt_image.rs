//! `gpt_image` — image generation through the provider's images endpoint.
//! The API returns base64 payloads; results are re-hosted on the upload
//! service so IRC gets a plain URL.

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::uploads::FileUploader;

use super::{Caller, Tool, ToolReply};

const MODEL: &str = "gpt-image-1.5";
const VALID_SIZES: &[&str] = &["1024x1024", "1536x1024", "1024x1536", "auto"];
const VALID_QUALITY: &[&str] = &["low", "medium", "high", "auto"];

pub struct GptImageTool {
    client: reqwest::Client,
    api_key: String,
    uploader: FileUploader,
}

impl GptImageTool {
    pub fn new(api_key: String, uploader: FileUploader) -> Self {
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
    #[serde(default = "default_size")]
    size: String,
    #[serde(default = "default_quality")]
    quality: String,
}

fn default_size() -> String {
    "1024x1024".to_string()
}

fn default_quality() -> String {
    "medium".to_string()
}

#[async_trait]
impl Tool for GptImageTool {
    fn name(&self) -> &str {
        "gpt_image"
    }

    fn description(&self) -> &str {
        "Generate an image with the gpt-image-1.5 model. Best for images with text, \
         diagrams, precise layouts, or photorealistic detail. Returns a URL to the \
         generated image."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the image to generate"
                },
                "size": {
                    "type": "string",
                    "enum": VALID_SIZES,
                    "description": "Image size. Default: 1024x1024"
                },
                "quality": {
                    "type": "string",
                    "enum": VALID_QUALITY,
                    "description": "Rendering quality; higher costs more. Default: medium"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };
        if !VALID_SIZES.contains(&input.size.as_str()) {
            return ToolReply::error(format!("Error: invalid size {}", input.size));
        }
        if !VALID_QUALITY.contains(&input.quality.as_str()) {
            return ToolReply::error(format!("Error: invalid quality {}", input.quality));
        }

        debug!(size = %input.size, quality = %input.quality, "gpt image generation");
        let resp = match self
            .client
            .post("https://api.openai.com/v1/images/generations")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": MODEL,
                "prompt": input.prompt,
                "size": input.size,
                "quality": input.quality,
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
            warn!(status, "gpt image API error");
            return ToolReply::error(format!("Error: {status} {body}"));
        }

        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => return ToolReply::error(format!("Error: bad response - {e}")),
        };
        let Some(b64) = body.pointer("/data/0/b64_json").and_then(|v| v.as_str()) else {
            return ToolReply::error("Error: response contained no image data");
        };
        let bytes = match base64::engine::general_purpose::STANDARD.decode(b64) {
            Ok(bytes) => bytes,
            Err(e) => return ToolReply::error(format!("Error: undecodable image data - {e}")),
        };

        match self.uploader.upload(bytes, "gpt_image.png").await {
            Ok(url) => ToolReply::text(url),
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}
