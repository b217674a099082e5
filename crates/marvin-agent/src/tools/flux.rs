//! `flux_create_image` / `flux_edit_image` — image generation and editing
//! through the BFL Flux API. Generation is an async job: submit, poll the
//! returned URL until Ready, download the sample, re-host it, and hand
//! back a stable URL.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::uploads::FileUploader;

use super::{Caller, Tool, ToolReply};

const BFL_BASE: &str = "https://api.bfl.ai/v1";
const POLL_ATTEMPTS: usize = 60;
const POLL_INTERVAL: Duration = Duration::from_secs(1);
const VALID_MODELS: &[&str] = &["flux-2-pro", "flux-2-flex"];

fn validate_dimension(name: &str, value: u32) -> Result<(), String> {
    if value % 16 != 0 {
        return Err(format!("{name} must be a multiple of 16, got {value}"));
    }
    if !(64..=4096).contains(&value) {
        return Err(format!("{name} must be between 64 and 4096, got {value}"));
    }
    Ok(())
}

/// Submit a generation payload and poll it to completion; returns the
/// re-hosted image URL.
async fn run_flux_job(
    client: &reqwest::Client,
    uploader: &FileUploader,
    api_key: &str,
    model: &str,
    payload: Value,
    output_format: &str,
) -> Result<String, String> {
    let resp = client
        .post(format!("{BFL_BASE}/{model}"))
        .header("accept", "application/json")
        .header("x-key", api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| format!("request failed - {e}"))?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(format!("{status} {body}"));
    }

    #[derive(Deserialize)]
    struct Submitted {
        polling_url: String,
    }
    let submitted: Submitted = resp
        .json()
        .await
        .map_err(|e| format!("bad submit response - {e}"))?;

    for _ in 0..POLL_ATTEMPTS {
        tokio::time::sleep(POLL_INTERVAL).await;
        let poll = client
            .get(&submitted.polling_url)
            .header("accept", "application/json")
            .header("x-key", api_key)
            .send()
            .await
            .map_err(|e| format!("polling failed - {e}"))?;
        let body: Value = poll
            .json()
            .await
            .map_err(|e| format!("bad poll response - {e}"))?;

        match body.get("status").and_then(|s| s.as_str()) {
            Some("Ready") => {
                let sample = body
                    .pointer("/result/sample")
                    .and_then(|s| s.as_str())
                    .ok_or("poll result had no sample url")?;
                let image = client
                    .get(sample)
                    .send()
                    .await
                    .map_err(|e| format!("sample download failed - {e}"))?
                    .bytes()
                    .await
                    .map_err(|e| format!("sample download failed - {e}"))?;
                return uploader
                    .upload(image.to_vec(), &format!("flux.{output_format}"))
                    .await;
            }
            Some("Error") | Some("Failed") => {
                let detail = body
                    .get("error")
                    .and_then(|e| e.as_str())
                    .unwrap_or("unknown error");
                return Err(format!("generation failed - {detail}"));
            }
            _ => continue,
        }
    }
    Err("generation timed out".to_string())
}

// ---------------------------------------------------------------------------
// flux_create_image
// ---------------------------------------------------------------------------

pub struct FluxCreateTool {
    client: reqwest::Client,
    api_key: Option<String>,
    uploader: FileUploader,
}

impl FluxCreateTool {
    pub fn new(api_key: Option<String>, uploader: FileUploader) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            uploader,
        }
    }
}

#[derive(Deserialize)]
struct CreateInput {
    prompt: String,
    #[serde(default = "default_dim")]
    width: u32,
    #[serde(default = "default_dim")]
    height: u32,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default)]
    output_format: Option<String>,
}

fn default_dim() -> u32 {
    1024
}

fn default_model() -> String {
    "flux-2-pro".to_string()
}

#[async_trait]
impl Tool for FluxCreateTool {
    fn name(&self) -> &str {
        "flux_create_image"
    }

    fn description(&self) -> &str {
        "Generate images from text prompts using Flux AI. Returns a URL to the \
         generated image. Default size 1024x1024, default model flux-2-pro (fast). \
         Common sizes: 1024x1024 (square), 1920x1088 (16:9), 1088x1920 (9:16), \
         2048x1024 (2:1). Dimensions must be multiples of 16."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the image to generate"
                },
                "width": {
                    "type": "integer",
                    "description": "Width in pixels (multiple of 16, 64-4096). Default: 1024"
                },
                "height": {
                    "type": "integer",
                    "description": "Height in pixels (multiple of 16, 64-4096). Default: 1024"
                },
                "model": {
                    "type": "string",
                    "enum": ["flux-2-pro", "flux-2-flex"],
                    "description": "flux-2-pro (fast) or flux-2-flex (higher quality, slower). Default: flux-2-pro"
                },
                "output_format": {
                    "type": "string",
                    "enum": ["jpeg", "png"],
                    "description": "Output image format. Default: jpeg"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let Some(ref api_key) = self.api_key else {
            return ToolReply::error("Error: BFL_API_KEY not configured");
        };
        let input: CreateInput = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        if let Err(e) = validate_dimension("width", input.width)
            .and_then(|_| validate_dimension("height", input.height))
        {
            return ToolReply::error(format!("Error: {e}"));
        }
        if !VALID_MODELS.contains(&input.model.as_str()) {
            return ToolReply::error(format!(
                "Error: model must be flux-2-pro or flux-2-flex, got {}",
                input.model
            ));
        }
        let output_format = input.output_format.unwrap_or_else(|| "jpeg".to_string());

        debug!(model = %input.model, width = input.width, height = input.height, "flux create");
        let payload = json!({
            "prompt": input.prompt,
            "width": input.width,
            "height": input.height,
            "safety_tolerance": 5,
            "output_format": output_format,
        });

        match run_flux_job(
            &self.client,
            &self.uploader,
            api_key,
            &input.model,
            payload,
            &output_format,
        )
        .await
        {
            Ok(url) => ToolReply::text(url),
            Err(e) => {
                warn!("flux create failed: {e}");
                ToolReply::error(format!("Error: {e}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// flux_edit_image
// ---------------------------------------------------------------------------

pub struct FluxEditTool {
    client: reqwest::Client,
    api_key: Option<String>,
    uploader: FileUploader,
}

impl FluxEditTool {
    pub fn new(api_key: Option<String>, uploader: FileUploader) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            uploader,
        }
    }

    /// Output dimensions for an edit: explicit values win, otherwise the
    /// input image's size rounded UP to multiples of 16 (padding, never
    /// cropping, so the aspect ratio survives).
    async fn resolve_edit_dims(
        &self,
        input_image_url: &str,
        width: Option<u32>,
        height: Option<u32>,
    ) -> Result<(u32, u32), String> {
        if let (Some(w), Some(h)) = (width, height) {
            return Ok((w, h));
        }
        let bytes = self
            .client
            .get(input_image_url)
            .send()
            .await
            .map_err(|e| format!("could not fetch input image - {e}"))?
            .bytes()
            .await
            .map_err(|e| format!("could not fetch input image - {e}"))?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| format!("could not decode input image - {e}"))?;
        let w = width.unwrap_or_else(|| pad_to_16(img.width()));
        let h = height.unwrap_or_else(|| pad_to_16(img.height()));
        Ok((w, h))
    }
}

fn pad_to_16(value: u32) -> u32 {
    value.div_ceil(16).max(4) * 16
}

#[derive(Deserialize)]
struct EditInput {
    prompt: String,
    input_image_url: String,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default = "default_model")]
    model: String,
    #[serde(default)]
    output_format: Option<String>,
}

#[async_trait]
impl Tool for FluxEditTool {
    fn name(&self) -> &str {
        "flux_edit_image"
    }

    fn description(&self) -> &str {
        "Edit an existing image with a text instruction using Flux AI (style changes, \
         object addition/removal, inpainting-style edits). Takes the image URL and a \
         prompt describing the change. Output keeps the input aspect ratio (padded to \
         valid dimensions, never cropped). Returns a URL to the edited image."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Instruction describing the edit to apply"
                },
                "input_image_url": {
                    "type": "string",
                    "description": "URL of the image to edit"
                },
                "width": {
                    "type": "integer",
                    "description": "Output width (multiple of 16). Defaults to the input width padded to a valid size."
                },
                "height": {
                    "type": "integer",
                    "description": "Output height (multiple of 16). Defaults to the input height padded to a valid size."
                },
                "model": {
                    "type": "string",
                    "enum": ["flux-2-pro", "flux-2-flex"],
                    "description": "Model to use. Default: flux-2-pro"
                },
                "output_format": {
                    "type": "string",
                    "enum": ["jpeg", "png"],
                    "description": "Output image format. Default: jpeg"
                }
            },
            "required": ["prompt", "input_image_url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let Some(ref api_key) = self.api_key else {
            return ToolReply::error("Error: BFL_API_KEY not configured");
        };
        let input: EditInput = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        for (name, value) in [("width", input.width), ("height", input.height)] {
            if let Some(value) = value {
                if let Err(e) = validate_dimension(name, value) {
                    return ToolReply::error(format!("Error: {e}"));
                }
            }
        }
        if !VALID_MODELS.contains(&input.model.as_str()) {
            return ToolReply::error(format!(
                "Error: model must be flux-2-pro or flux-2-flex, got {}",
                input.model
            ));
        }

        let (width, height) = match self
            .resolve_edit_dims(&input.input_image_url, input.width, input.height)
            .await
        {
            Ok(dims) => dims,
            Err(e) => return ToolReply::error(format!("Error: {e}")),
        };
        let output_format = input.output_format.unwrap_or_else(|| "jpeg".to_string());

        debug!(model = %input.model, width, height, "flux edit");
        let payload = json!({
            "prompt": input.prompt,
            "input_image": input.input_image_url,
            "width": width,
            "height": height,
            "safety_tolerance": 5,
            "output_format": output_format,
        });

        match run_flux_job(
            &self.client,
            &self.uploader,
            api_key,
            &input.model,
            payload,
            &output_format,
        )
        .await
        {
            Ok(url) => ToolReply::text(url),
            Err(e) => {
                warn!("flux edit failed: {e}");
                ToolReply::error(format!("Error: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_validation_enforces_grid_and_bounds() {
        assert!(validate_dimension("width", 1024).is_ok());
        assert!(validate_dimension("width", 1000).is_err());
        assert!(validate_dimension("width", 48).is_err());
        assert!(validate_dimension("height", 8192).is_err());
    }

    #[test]
    fn padding_rounds_up_never_down() {
        assert_eq!(pad_to_16(1024), 1024);
        assert_eq!(pad_to_16(1025), 1040);
        assert_eq!(pad_to_16(1), 64);
        assert_eq!(pad_to_16(700), 704);
    }
}
