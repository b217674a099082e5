//! `sora_video` — text-to-video through the provider's async video jobs:
//! submit, poll until completed, download the MP4, re-host it. Shares a
//! daily pool of four generations; only the owner bypasses it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::limits::Quotas;
use crate::uploads::FileUploader;

use super::{Caller, Tool, ToolReply};

const VIDEOS_URL: &str = "https://api.openai.com/v1/videos";
const MODEL: &str = "sora-2";
const POLL_ATTEMPTS: usize = 100;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct SoraVideoTool {
    client: reqwest::Client,
    api_key: String,
    uploader: FileUploader,
    quotas: Arc<Quotas>,
}

impl SoraVideoTool {
    pub fn new(api_key: String, uploader: FileUploader, quotas: Arc<Quotas>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            uploader,
            quotas,
        }
    }
}

#[derive(Deserialize)]
struct Input {
    prompt: String,
    #[serde(default = "default_seconds")]
    seconds: u32,
    #[serde(default = "default_orientation")]
    orientation: String,
}

fn default_seconds() -> u32 {
    4
}

fn default_orientation() -> String {
    "landscape".to_string()
}

#[async_trait]
impl Tool for SoraVideoTool {
    fn name(&self) -> &str {
        "sora_video"
    }

    fn description(&self) -> &str {
        "Generate a short video from a text prompt using Sora 2. Returns a URL to the \
         MP4. Videos take 1-5 minutes to render. Rate limited: 4 videos/day shared \
         across users; the owner is unlimited. Prompt tips: describe shot type, \
         subject, action, setting, and lighting, e.g. 'Wide shot of a cat walking \
         across a sunlit kitchen counter, morning light, slow camera pan right.'"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt": {
                    "type": "string",
                    "description": "Text description of the video. Be specific about shot type, subject, action, setting, and lighting."
                },
                "seconds": {
                    "type": "integer",
                    "description": "Duration in seconds: 4 or 8 (12 for the owner only). Default: 4"
                },
                "orientation": {
                    "type": "string",
                    "enum": ["landscape", "portrait"],
                    "description": "landscape=1280x720, portrait=720x1280. Default: landscape"
                }
            },
            "required": ["prompt"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        let allowed_seconds: &[u32] = if caller.level.is_owner() {
            &[4, 8, 12]
        } else {
            &[4, 8]
        };
        if !allowed_seconds.contains(&input.seconds) {
            return ToolReply::error(format!(
                "Error: seconds must be one of {allowed_seconds:?}, got {}",
                input.seconds
            ));
        }
        let size = match input.orientation.as_str() {
            "landscape" => "1280x720",
            "portrait" => "720x1280",
            other => return ToolReply::error(format!("Error: unknown orientation '{other}'")),
        };

        if let Err(msg) = self.quotas.video.check(caller.level) {
            return ToolReply::error(msg);
        }

        debug!(seconds = input.seconds, size, "sora video submission");
        let resp = match self
            .client
            .post(VIDEOS_URL)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": MODEL,
                "prompt": input.prompt,
                "seconds": input.seconds.to_string(),
                "size": size,
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
            return ToolReply::error(format!("Error: {status} {body}"));
        }
        let submitted: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => return ToolReply::error(format!("Error: bad response - {e}")),
        };
        let Some(job_id) = submitted.get("id").and_then(|v| v.as_str()).map(String::from) else {
            return ToolReply::error("Error: submission returned no job id");
        };

        for _ in 0..POLL_ATTEMPTS {
            tokio::time::sleep(POLL_INTERVAL).await;
            let poll = match self
                .client
                .get(format!("{VIDEOS_URL}/{job_id}"))
                .bearer_auth(&self.api_key)
                .send()
                .await
            {
                Ok(poll) => poll,
                Err(e) => return ToolReply::error(format!("Error: polling failed - {e}")),
            };
            let body: Value = match poll.json().await {
                Ok(body) => body,
                Err(e) => return ToolReply::error(format!("Error: bad poll response - {e}")),
            };

            match body.get("status").and_then(|s| s.as_str()) {
                Some("completed") => {
                    let content = match self
                        .client
                        .get(format!("{VIDEOS_URL}/{job_id}/content"))
                        .bearer_auth(&self.api_key)
                        .send()
                        .await
                    {
                        Ok(resp) => resp,
                        Err(e) => {
                            return ToolReply::error(format!("Error: download failed - {e}"))
                        }
                    };
                    let bytes = match content.bytes().await {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            return ToolReply::error(format!("Error: download failed - {e}"))
                        }
                    };
                    return match self.uploader.upload(bytes.to_vec(), "sora_video.mp4").await {
                        Ok(url) => {
                            self.quotas.video.record(caller.level);
                            ToolReply::text(url)
                        }
                        Err(e) => ToolReply::error(format!("Error: {e}")),
                    };
                }
                Some("failed") => {
                    let detail = body
                        .pointer("/error/message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("unknown error");
                    warn!("sora job failed: {detail}");
                    return ToolReply::error(format!("Error: video generation failed - {detail}"));
                }
                _ => continue,
            }
        }
        ToolReply::error("Error: video generation timed out")
    }
}
