use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use crate::provider::{
    ProviderError, ProviderResponse, RequestInput, ResponsesProvider, ResponsesRequest,
};

/// Responses-API client. One instance is shared by the whole process.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, "https://api.openai.com".to_string())
    }

    /// `base_url` without a trailing slash; used by tests pointing at a stub.
    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
        }
    }

    fn build_body(req: &ResponsesRequest) -> serde_json::Value {
        let input = match &req.input {
            RequestInput::Prompt(text) => json!(text),
            RequestInput::FunctionOutputs(outputs) => json!(outputs),
            RequestInput::Vision {
                image_url,
                question,
            } => json!([{
                "type": "message",
                "role": "user",
                "content": [
                    {"type": "input_image", "image_url": image_url},
                    {"type": "input_text", "text": format!("Please analyze this image. {question}")},
                ],
            }]),
        };

        let mut body = json!({
            "model": req.model,
            "input": input,
            "max_output_tokens": req.max_output_tokens,
        });
        if let Some(ref effort) = req.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }
        if let Some(ref verbosity) = req.verbosity {
            body["text"] = json!({ "verbosity": verbosity });
        }
        if !req.tools.is_empty() {
            body["tools"] = json!(req.tools);
        }
        if let Some(ref prev) = req.previous_response_id {
            body["previous_response_id"] = json!(prev);
        }
        if let Some(retention) = req.prompt_cache_retention {
            body["prompt_cache_retention"] = json!(retention);
        }
        body
    }
}

#[async_trait]
impl ResponsesProvider for OpenAiProvider {
    async fn create(&self, req: &ResponsesRequest) -> Result<ProviderResponse, ProviderError> {
        let body = Self::build_body(req);
        let url = format!("{}/v1/responses", self.base_url);

        debug!(model = %req.model, chained = req.previous_response_id.is_some(), "provider call");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .timeout(req.timeout)
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "provider API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        resp.json::<ProviderResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FunctionOutput;
    use std::time::Duration;

    fn base_request(input: RequestInput) -> ResponsesRequest {
        ResponsesRequest {
            model: "gpt-5.2".to_string(),
            input,
            tools: vec![],
            reasoning_effort: Some("medium".to_string()),
            verbosity: Some("low".to_string()),
            max_output_tokens: 4000,
            previous_response_id: None,
            prompt_cache_retention: Some(crate::provider::PROMPT_CACHE_RETENTION),
            timeout: Duration::from_secs(240),
        }
    }

    #[test]
    fn prompt_turn_serialises_input_as_string() {
        let body = OpenAiProvider::build_body(&base_request(RequestInput::Prompt(
            "hello".to_string(),
        )));
        assert_eq!(body["input"], "hello");
        assert_eq!(body["reasoning"]["effort"], "medium");
        assert_eq!(body["prompt_cache_retention"], "24h");
        assert!(body.get("previous_response_id").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn continuation_turn_carries_outputs_and_prior_id() {
        let mut req = base_request(RequestInput::FunctionOutputs(vec![FunctionOutput::new(
            "call_1", "result text",
        )]));
        req.previous_response_id = Some("resp_9".to_string());

        let body = OpenAiProvider::build_body(&req);
        assert_eq!(body["previous_response_id"], "resp_9");
        assert_eq!(body["input"][0]["type"], "function_call_output");
        assert_eq!(body["input"][0]["call_id"], "call_1");
        assert_eq!(body["input"][0]["output"], "result text");
    }

    #[test]
    fn vision_turn_builds_image_message() {
        let body = OpenAiProvider::build_body(&base_request(RequestInput::Vision {
            image_url: "data:image/png;base64,AAAA".to_string(),
            question: "What is shown?".to_string(),
        }));
        assert_eq!(body["input"][0]["content"][0]["type"], "input_image");
        assert!(body["input"][0]["content"][1]["text"]
            .as_str()
            .unwrap()
            .contains("What is shown?"));
    }
}
