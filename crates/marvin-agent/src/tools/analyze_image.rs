//! `analyze_image` — pull an image from a URL into a vision sub-call.
//!
//! The tool itself only validates and packages the image: it returns a
//! JSON carrier with a base64 data URL that the orchestrator feeds into a
//! nested provider call. Raw image bytes never enter the main reasoning
//! chain.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::fetch_url::validate_url;
use super::{Caller, Tool, ToolReply};

const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024;
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AnalyzeImageTool {
    client: reqwest::Client,
}

impl AnalyzeImageTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for AnalyzeImageTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Input {
    image_url: String,
    #[serde(default = "default_question")]
    question: String,
    #[serde(default = "default_detail")]
    detail: String,
}

fn default_question() -> String {
    "Describe this image.".to_string()
}

fn default_detail() -> String {
    "auto".to_string()
}

#[async_trait]
impl Tool for AnalyzeImageTool {
    fn name(&self) -> &str {
        "analyze_image"
    }

    fn description(&self) -> &str {
        "Analyze an image from a URL: describe its content, read text in it, or answer \
         a specific question about it. Supports png, jpeg, webp, and non-animated gif \
         up to 50 MB. Use when a user shares an image link and wants to know what it \
         shows."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "image_url": {
                    "type": "string",
                    "description": "Direct URL of the image to analyze"
                },
                "question": {
                    "type": "string",
                    "description": "What to find out about the image. Default: a general description."
                },
                "detail": {
                    "type": "string",
                    "enum": ["auto", "low", "high"],
                    "description": "Vision detail level. 'high' costs more tokens. Default: auto"
                }
            },
            "required": ["image_url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        if let Err(reason) = validate_url(&input.image_url) {
            return ToolReply::error(format!("Error: {reason}"));
        }

        let resp = match self
            .client
            .get(&input.image_url)
            .timeout(DOWNLOAD_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolReply::error(format!("Error: image download failed - {e}")),
        };
        if !resp.status().is_success() {
            return ToolReply::error(format!("Error: HTTP {}", resp.status().as_u16()));
        }
        if let Some(len) = resp.content_length() {
            if len as usize > MAX_IMAGE_BYTES {
                return ToolReply::error("Error: image exceeds the 50 MB limit");
            }
        }

        let bytes = match resp.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return ToolReply::error(format!("Error: image download failed - {e}")),
        };
        if bytes.len() > MAX_IMAGE_BYTES {
            return ToolReply::error("Error: image exceeds the 50 MB limit");
        }

        let format = match sniff_format(&bytes) {
            Some(format) => format,
            None => {
                return ToolReply::error(
                    "Error: unsupported image format (png, jpeg, webp, non-animated gif only)",
                )
            }
        };
        if format == "gif" && is_animated_gif(&bytes) {
            return ToolReply::error("Error: animated GIFs are not supported");
        }

        let estimated_tokens = estimate_vision_tokens(&bytes, &input.detail);
        debug!(
            format,
            size = bytes.len(),
            estimated_tokens,
            "image packaged for vision sub-call"
        );

        let data_url = format!(
            "data:image/{format};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        );

        // Consumed by the orchestrator, never by the model directly.
        ToolReply::text(
            json!({
                "status": "success",
                "image_data": { "image_url": data_url, "detail": input.detail },
                "question": input.question,
                "estimated_tokens": estimated_tokens,
            })
            .to_string(),
        )
    }
}

fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpeg")
    } else if bytes.len() > 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else {
        None
    }
}

/// More than one graphic-control extension block means multiple frames.
fn is_animated_gif(bytes: &[u8]) -> bool {
    bytes
        .windows(2)
        .filter(|w| w[0] == 0x21 && w[1] == 0xF9)
        .count()
        > 1
}

/// Tile-based vision token estimate; falls back to a size heuristic when
/// the image cannot be decoded.
fn estimate_vision_tokens(bytes: &[u8], detail: &str) -> u64 {
    if detail == "low" {
        return 85;
    }
    match image::load_from_memory(bytes) {
        Ok(img) => {
            let tiles_x = (img.width() as u64).div_ceil(512);
            let tiles_y = (img.height() as u64).div_ceil(512);
            85 + 170 * tiles_x * tiles_y
        }
        Err(_) => 85 + (bytes.len() as u64 / 10_000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sniffing_recognises_the_supported_set() {
        assert_eq!(sniff_format(&[0x89, b'P', b'N', b'G', 0, 0]), Some("png"));
        assert_eq!(sniff_format(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("jpeg"));
        let mut webp = b"RIFF____WEBPVP8 ".to_vec();
        webp[4..8].copy_from_slice(&[0, 0, 0, 0]);
        assert_eq!(sniff_format(&webp), Some("webp"));
        assert_eq!(sniff_format(b"GIF89a trailer"), Some("gif"));
        assert_eq!(sniff_format(b"BM bitmap"), None);
    }

    #[test]
    fn single_frame_gif_is_not_animated() {
        let mut gif = b"GIF89a".to_vec();
        gif.extend_from_slice(&[0x21, 0xF9, 0x04, 0x00]);
        assert!(!is_animated_gif(&gif));
        gif.extend_from_slice(&[0x21, 0xF9, 0x04, 0x00]);
        assert!(is_animated_gif(&gif));
    }

    #[test]
    fn low_detail_has_flat_token_cost() {
        assert_eq!(estimate_vision_tokens(&[0u8; 100], "low"), 85);
    }
}
