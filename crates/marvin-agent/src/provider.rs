//! Typed model of the responses-style provider protocol.
//!
//! A request carries either a full prompt (first turn) or the previous
//! turn's function outputs plus `previous_response_id` (continuation
//! turns, which keep the provider's hidden reasoning and prompt-prefix
//! cache alive). Responses are traversed through an exhaustive tagged
//! item enum instead of duck-typed field probing.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How long the provider may keep the prompt prefix cached.
pub const PROMPT_CACHE_RETENTION: &str = "24h";

#[derive(Debug, Clone)]
pub enum RequestInput {
    /// Full assembled prompt (first turn of a request).
    Prompt(String),
    /// Function outputs feeding a continuation turn.
    FunctionOutputs(Vec<FunctionOutput>),
    /// Nested vision query (image analysis sub-call).
    Vision { image_url: String, question: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FunctionOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    pub call_id: String,
    pub output: String,
}

impl FunctionOutput {
    pub fn new(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind: "function_call_output",
            call_id: call_id.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponsesRequest {
    pub model: String,
    pub input: RequestInput,
    /// Provider-format tool definitions; the schemas are authoritative.
    pub tools: Vec<serde_json::Value>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
    pub max_output_tokens: u32,
    pub previous_response_id: Option<String>,
    pub prompt_cache_retention: Option<&'static str>,
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Response DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderResponse {
    pub id: String,
    #[serde(default)]
    pub output: Vec<OutputItem>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputItem {
    Message {
        #[serde(default)]
        content: Vec<ContentItem>,
    },
    FunctionCall {
        name: String,
        /// JSON-encoded argument object.
        arguments: String,
        call_id: String,
    },
    WebSearchCall {},
    CodeInterpreterCall {},
    Reasoning {},
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    OutputText {
        text: String,
        #[serde(default)]
        annotations: Vec<Annotation>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Annotation {
    UrlCitation { url: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub input_tokens_details: Option<InputTokensDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputTokensDetails {
    #[serde(default)]
    pub cached_tokens: u64,
}

impl Usage {
    /// Cached tokens, clamped to the input total: cached is a subset of
    /// input, never an addition, even if the provider claims otherwise.
    pub fn cached_tokens(&self) -> u64 {
        self.input_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .unwrap_or(0)
            .min(self.input_tokens)
    }
}

/// Per-item-type counts for one response, used for usage accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolCounts {
    pub function_calls: u64,
    pub web_search_calls: u64,
    pub code_interpreter_calls: u64,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
    pub call_id: String,
}

impl ProviderResponse {
    /// Text of the first message item, empty when the turn produced none.
    pub fn output_text(&self) -> String {
        for item in &self.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if let ContentItem::OutputText { text, .. } = part {
                        if !text.is_empty() {
                            return text.clone();
                        }
                    }
                }
            }
        }
        String::new()
    }

    pub fn function_calls(&self) -> Vec<FunctionCall> {
        self.output
            .iter()
            .filter_map(|item| match item {
                OutputItem::FunctionCall {
                    name,
                    arguments,
                    call_id,
                } => Some(FunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                    call_id: call_id.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn tool_counts(&self) -> ToolCounts {
        let mut counts = ToolCounts::default();
        for item in &self.output {
            match item {
                OutputItem::FunctionCall { .. } => counts.function_calls += 1,
                OutputItem::WebSearchCall {} => counts.web_search_calls += 1,
                OutputItem::CodeInterpreterCall {} => counts.code_interpreter_calls += 1,
                _ => {}
            }
        }
        counts
    }

    /// Raw citation URLs in document order (not yet cleaned or deduped).
    pub fn citation_urls(&self) -> Vec<String> {
        let mut urls = Vec::new();
        for item in &self.output {
            if let OutputItem::Message { content } = item {
                for part in content {
                    if let ContentItem::OutputText { annotations, .. } = part {
                        for annotation in annotations {
                            if let Annotation::UrlCitation { url } = annotation {
                                urls.push(url.clone());
                            }
                        }
                    }
                }
            }
        }
        urls
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

/// Common interface to the responses API; the orchestrator only ever talks
/// through this, so tests can script turn sequences.
#[async_trait]
pub trait ResponsesProvider: Send + Sync {
    async fn create(&self, req: &ResponsesRequest) -> Result<ProviderResponse, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ProviderResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn tagged_items_deserialize_and_count() {
        let resp = parse(
            r#"{
                "id": "resp_1",
                "output": [
                    {"type": "reasoning", "summary": []},
                    {"type": "web_search_call", "status": "completed"},
                    {"type": "function_call", "name": "fetch_url",
                     "arguments": "{\"url\": \"https://x\"}", "call_id": "call_1"},
                    {"type": "message", "role": "assistant", "content": [
                        {"type": "output_text", "text": "done", "annotations": [
                            {"type": "url_citation", "url": "https://src.example"}
                        ]}
                    ]}
                ],
                "usage": {"input_tokens": 100, "output_tokens": 20,
                          "input_tokens_details": {"cached_tokens": 60}}
            }"#,
        );

        let counts = resp.tool_counts();
        assert_eq!(counts.function_calls, 1);
        assert_eq!(counts.web_search_calls, 1);
        assert_eq!(counts.code_interpreter_calls, 0);

        assert_eq!(resp.output_text(), "done");
        assert_eq!(resp.citation_urls(), vec!["https://src.example"]);
        assert_eq!(resp.function_calls()[0].name, "fetch_url");
        assert_eq!(resp.usage.as_ref().unwrap().cached_tokens(), 60);
    }

    #[test]
    fn unknown_item_types_are_tolerated() {
        let resp = parse(
            r#"{"id": "r", "output": [{"type": "mystery_item", "data": 1}]}"#,
        );
        assert!(matches!(resp.output[0], OutputItem::Other));
        assert_eq!(resp.output_text(), "");
    }

    #[test]
    fn cached_tokens_clamp_to_input() {
        let usage = Usage {
            input_tokens: 50,
            output_tokens: 0,
            input_tokens_details: Some(InputTokensDetails { cached_tokens: 90 }),
        };
        assert_eq!(usage.cached_tokens(), 50);
    }
}
