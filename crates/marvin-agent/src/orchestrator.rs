//! The multi-turn reasoning loop.
//!
//! One mention request becomes a sequence of provider turns. Each turn may
//! produce function calls; those are executed through the registry (rate
//! limits and caller identity applied here) and their outputs feed the
//! next turn via `previous_response_id`. The prompt is never resent, which
//! keeps the provider's prompt-prefix cache and hidden reasoning alive.
//! The loop exits when a turn produces no calls or the iteration cap is
//! hit. Usage and citations accumulate across every turn and are flushed
//! once at the end.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use marvin_core::pricing::PricingConfig;
use marvin_core::types::{HistoryMessage, PermissionLevel};
use marvin_store::rules::UserRulesStore;
use marvin_store::usage::{UsageRecord, UsageStore};

use crate::limits::Quotas;
use crate::output::{clean_citation_url, clean_for_irc};
use crate::prompt::PromptBuilder;
use crate::provider::{
    FunctionOutput, ProviderError, ProviderResponse, RequestInput, ResponsesProvider,
    ResponsesRequest, ToolCounts, PROMPT_CACHE_RETENTION,
};
use crate::tools::{is_image_tool, Caller, ToolRegistry, ToolReply};

const NORMAL_MAX_ITERATIONS: usize = 18;
const DEEP_MAX_ITERATIONS: usize = 30;
const DEEP_MAX_TOKENS: u32 = 16_000;
const DEEP_TIMEOUT: Duration = Duration::from_secs(480);
const VISION_MAX_TOKENS: u32 = 1000;
const VISION_TIMEOUT: Duration = Duration::from_secs(60);

const GENERIC_ERROR: &str = "Sorry, I encountered an error generating a response.";
const EMPTY_ERROR: &str = "I couldn't generate a proper response. Please try again.";

/// Events streamed to the caller. Zero or more `Processing`, then exactly
/// one terminal `Success`/`Null`/`Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Processing(String),
    Success(String),
    Null,
    Error(String),
}

impl AgentEvent {
    pub fn status(&self) -> &'static str {
        match self {
            AgentEvent::Processing(_) => "processing",
            AgentEvent::Success(_) => "success",
            AgentEvent::Null => "null",
            AgentEvent::Error(_) => "error",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AgentEvent::Processing(msg) | AgentEvent::Success(msg) | AgentEvent::Error(msg) => msg,
            AgentEvent::Null => "",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentEvent::Processing(_))
    }
}

/// One mention request as handed over by the HTTP boundary.
#[derive(Debug, Clone)]
pub struct MentionJob {
    pub request_id: String,
    pub nick: String,
    pub channel: String,
    pub message: String,
    pub permission_level: PermissionLevel,
    pub history: Vec<HistoryMessage>,
    pub deep_mode: bool,
}

/// Model parameters for normal-mode requests; deep mode overrides effort,
/// token budget, and timeout on the initial turn.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub model: String,
    pub reasoning_effort: String,
    pub verbosity: String,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

#[derive(Debug, Default)]
struct UsageTotals {
    input_tokens: u64,
    cached_tokens: u64,
    output_tokens: u64,
    tool_calls: u64,
    web_search_calls: u64,
    code_interpreter_calls: u64,
}

impl UsageTotals {
    fn absorb(&mut self, response: &ProviderResponse) {
        if let Some(ref usage) = response.usage {
            self.input_tokens += usage.input_tokens;
            self.cached_tokens += usage.cached_tokens();
            self.output_tokens += usage.output_tokens;
        }
        let ToolCounts {
            function_calls,
            web_search_calls,
            code_interpreter_calls,
        } = response.tool_counts();
        self.tool_calls += function_calls;
        self.web_search_calls += web_search_calls;
        self.code_interpreter_calls += code_interpreter_calls;
    }
}

struct LoopOutcome {
    response: ProviderResponse,
    null_triggered: bool,
    totals: UsageTotals,
    citations: Vec<String>,
}

pub struct Orchestrator {
    provider: Arc<dyn ResponsesProvider>,
    registry: Arc<ToolRegistry>,
    prompt: PromptBuilder,
    rules: Arc<UserRulesStore>,
    usage: Arc<UsageStore>,
    pricing: PricingConfig,
    quotas: Arc<Quotas>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ResponsesProvider>,
        registry: Arc<ToolRegistry>,
        prompt: PromptBuilder,
        rules: Arc<UserRulesStore>,
        usage: Arc<UsageStore>,
        pricing: PricingConfig,
        quotas: Arc<Quotas>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            provider,
            registry,
            prompt,
            rules,
            usage,
            pricing,
            quotas,
            settings,
        }
    }

    pub fn quotas(&self) -> &Quotas {
        &self.quotas
    }

    /// Spawn the reasoning loop for one request; the caller consumes the
    /// event stream lazily. The task runs to completion even if the
    /// receiver is dropped (no client-cancellation propagation).
    pub fn stream(self: &Arc<Self>, job: MentionJob) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(32);
        let this = self.clone();
        tokio::spawn(async move {
            this.run(job, tx).await;
        });
        rx
    }

    /// Run the loop, pushing events into `tx`. Exactly one terminal event
    /// is sent.
    pub async fn run(&self, job: MentionJob, tx: mpsc::Sender<AgentEvent>) {
        let request_id = job.request_id.clone();
        info!(
            request_id = %request_id,
            nick = %job.nick,
            channel = %job.channel,
            deep = job.deep_mode,
            "processing mention"
        );

        if job.deep_mode {
            if let Err(msg) = self.quotas.deep.check(&job.nick, job.permission_level) {
                warn!(request_id = %request_id, nick = %job.nick, "deep mode quota exhausted");
                let _ = tx.send(AgentEvent::Error(msg)).await;
                return;
            }
        }

        let user_rules = self.rules.active_rules(&job.nick);
        let prompt = self.prompt.build(
            &job.message,
            &job.nick,
            &job.channel,
            &job.history,
            user_rules.as_deref(),
            job.deep_mode,
        );

        let initial = ResponsesRequest {
            model: self.settings.model.clone(),
            input: RequestInput::Prompt(prompt),
            tools: self.registry.definitions(),
            reasoning_effort: Some(if job.deep_mode {
                "high".to_string()
            } else {
                self.settings.reasoning_effort.clone()
            }),
            verbosity: Some(self.settings.verbosity.clone()),
            max_output_tokens: if job.deep_mode {
                DEEP_MAX_TOKENS
            } else {
                self.settings.max_output_tokens
            },
            previous_response_id: None,
            prompt_cache_retention: Some(PROMPT_CACHE_RETENTION),
            timeout: if job.deep_mode {
                DEEP_TIMEOUT
            } else {
                self.settings.timeout
            },
        };

        let response = match self.provider.create(&initial).await {
            Ok(response) => response,
            Err(e) => {
                error!(request_id = %request_id, "initial provider call failed: {e}");
                let _ = tx.send(AgentEvent::Error(GENERIC_ERROR.to_string())).await;
                return;
            }
        };

        let outcome = match self.tool_loop(&job, response, &tx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(request_id = %request_id, "provider error in tool loop: {e}");
                let _ = tx.send(AgentEvent::Error(GENERIC_ERROR.to_string())).await;
                return;
            }
        };

        // One summed ledger row per request, null responses included.
        let cost = self.pricing.calculate_cost(
            &self.settings.model,
            outcome.totals.input_tokens,
            outcome.totals.cached_tokens,
            outcome.totals.output_tokens,
            outcome.totals.web_search_calls,
        );
        let record = UsageRecord {
            request_id: request_id.clone(),
            nick: job.nick.clone(),
            channel: Some(job.channel.clone()),
            model: self.settings.model.clone(),
            input_tokens: outcome.totals.input_tokens,
            cached_tokens: outcome.totals.cached_tokens,
            output_tokens: outcome.totals.output_tokens,
            cost_usd: cost,
            tool_calls: outcome.totals.tool_calls,
            web_search_calls: outcome.totals.web_search_calls,
            code_interpreter_calls: outcome.totals.code_interpreter_calls,
        };
        if let Err(e) = self.usage.record(&record) {
            warn!(request_id = %request_id, "usage record failed: {e}");
        }

        if outcome.null_triggered {
            info!(request_id = %request_id, "null response triggered, staying silent");
            let _ = tx.send(AgentEvent::Null).await;
            return;
        }

        // Merge: accumulated citations first, then any new ones from the
        // terminal turn; first occurrence wins.
        let mut citations = outcome.citations;
        for url in outcome.response.citation_urls() {
            let cleaned = clean_citation_url(&url);
            if !citations.contains(&cleaned) {
                citations.push(cleaned);
            }
        }

        let raw = outcome.response.output_text();
        if raw.trim().is_empty() {
            error!(request_id = %request_id, "model produced an empty terminal message");
            let _ = tx.send(AgentEvent::Error(EMPTY_ERROR.to_string())).await;
            return;
        }

        let cleaned = clean_for_irc(&raw, &citations);

        // Quota is consumed only by completed deep runs.
        if job.deep_mode {
            self.quotas.deep.record(&job.nick, job.permission_level);
        }

        info!(request_id = %request_id, "mention answered");
        let _ = tx.send(AgentEvent::Success(cleaned)).await;
    }

    async fn tool_loop(
        &self,
        job: &MentionJob,
        mut response: ProviderResponse,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> Result<LoopOutcome, ProviderError> {
        let max_iterations = if job.deep_mode {
            DEEP_MAX_ITERATIONS
        } else {
            NORMAL_MAX_ITERATIONS
        };
        let caller = Caller {
            nick: job.nick.clone(),
            channel: job.channel.clone(),
            level: job.permission_level,
        };

        let mut totals = UsageTotals::default();
        totals.absorb(&response);

        let mut null_triggered = false;
        let mut citations: Vec<String> = Vec::new();

        for iteration in 0..max_iterations {
            for url in response.citation_urls() {
                let cleaned = clean_citation_url(&url);
                if !citations.contains(&cleaned) {
                    citations.push(cleaned);
                }
            }

            let calls = response.function_calls();
            if calls.is_empty() {
                return Ok(LoopOutcome {
                    response,
                    null_triggered,
                    totals,
                    citations,
                });
            }

            info!(
                request_id = %job.request_id,
                iteration = iteration + 1,
                calls = calls.len(),
                "executing function calls"
            );

            let mut outputs: Vec<FunctionOutput> = Vec::with_capacity(calls.len());
            for call in calls {
                let args: serde_json::Value = match serde_json::from_str(&call.arguments) {
                    Ok(args) => args,
                    Err(e) => {
                        warn!(tool = %call.name, "malformed tool arguments: {e}");
                        outputs.push(FunctionOutput::new(
                            call.call_id,
                            format!("Error: Invalid JSON in tool arguments - {e}"),
                        ));
                        continue;
                    }
                };

                let Some(tool) = self.registry.get(&call.name) else {
                    outputs.push(FunctionOutput::new(
                        call.call_id,
                        format!("Error: Unknown tool '{}'", call.name),
                    ));
                    continue;
                };

                // Image tools share a global hourly quota, checked before
                // the tool runs and recorded only on success.
                if is_image_tool(&call.name) {
                    if let Err(msg) = self.quotas.image.check(job.permission_level) {
                        warn!(request_id = %job.request_id, tool = %call.name, "image quota hit");
                        outputs.push(FunctionOutput::new(call.call_id, msg));
                        continue;
                    }
                }

                info!(request_id = %job.request_id, tool = %call.name, "executing tool");
                let mut reply = tool.execute(args, &caller).await;

                if is_image_tool(&call.name) && matches!(reply, ToolReply::Text(_)) {
                    self.quotas.image.record();
                }

                // Image analysis succeeded: swap the JSON carrier for the
                // vision description before it reaches the model.
                if call.name == "analyze_image" {
                    if let ToolReply::Text(payload) = &reply {
                        let payload = payload.clone();
                        reply = self.vision_sub_call(job, &payload, tx).await;
                    }
                }

                match &reply {
                    ToolReply::Status(msg) => {
                        // Frame drops must not kill the request.
                        let _ = tx.send(AgentEvent::Processing(msg.clone())).await;
                    }
                    ToolReply::Null => {
                        // The loop keeps going; any final message will be
                        // suppressed at the end.
                        null_triggered = true;
                    }
                    _ => {}
                }

                outputs.push(FunctionOutput::new(call.call_id, reply.wire_output()));
            }

            // Continuation turn: function outputs plus the prior response
            // id; the prompt itself is never resent.
            let next = ResponsesRequest {
                model: self.settings.model.clone(),
                input: RequestInput::FunctionOutputs(outputs),
                tools: self.registry.definitions(),
                reasoning_effort: Some(self.settings.reasoning_effort.clone()),
                verbosity: Some(self.settings.verbosity.clone()),
                max_output_tokens: self.settings.max_output_tokens,
                previous_response_id: Some(response.id.clone()),
                prompt_cache_retention: Some(PROMPT_CACHE_RETENTION),
                timeout: self.settings.timeout,
            };
            response = self.provider.create(&next).await?;
            totals.absorb(&response);
        }

        warn!(
            request_id = %job.request_id,
            max_iterations,
            "tool loop hit the iteration cap"
        );
        Ok(LoopOutcome {
            response,
            null_triggered,
            totals,
            citations,
        })
    }

    /// Nested provider call for image analysis: the image bytes go into a
    /// dedicated vision turn and only the textual description re-enters
    /// the main reasoning chain.
    async fn vision_sub_call(
        &self,
        job: &MentionJob,
        payload: &str,
        tx: &mpsc::Sender<AgentEvent>,
    ) -> ToolReply {
        let parsed: serde_json::Value = match serde_json::from_str(payload) {
            Ok(parsed) => parsed,
            Err(_) => return ToolReply::Text(payload.to_string()),
        };
        if parsed.get("status").and_then(|s| s.as_str()) != Some("success") {
            return ToolReply::Text(payload.to_string());
        }
        let Some(image_url) = parsed
            .pointer("/image_data/image_url")
            .and_then(|u| u.as_str())
        else {
            return ToolReply::Text(payload.to_string());
        };
        let question = parsed
            .get("question")
            .and_then(|q| q.as_str())
            .unwrap_or("Describe this image.");

        let _ = tx
            .send(AgentEvent::Processing("Analyzing image content...".to_string()))
            .await;

        let request = ResponsesRequest {
            model: self.settings.model.clone(),
            input: RequestInput::Vision {
                image_url: image_url.to_string(),
                question: question.to_string(),
            },
            tools: Vec::new(),
            reasoning_effort: None,
            verbosity: None,
            max_output_tokens: VISION_MAX_TOKENS,
            previous_response_id: None,
            prompt_cache_retention: None,
            timeout: VISION_TIMEOUT,
        };

        match self.provider.create(&request).await {
            Ok(vision) => {
                info!(request_id = %job.request_id, "vision analysis complete");
                ToolReply::Text(format!("Image Analysis Result:\n{}", vision.output_text()))
            }
            Err(e) => {
                error!(request_id = %job.request_id, "vision analysis failed: {e}");
                ToolReply::Error(format!("Error analyzing image: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{null_response::NullResponseTool, report_status::ReportStatusTool};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted provider: pops pre-built responses and records every
    /// request it saw.
    struct ScriptedProvider {
        script: Mutex<Vec<Result<ProviderResponse, ProviderError>>>,
        requests: Mutex<Vec<ResponsesRequest>>,
        /// When the script runs dry, keep replaying this response.
        filler: Option<String>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script),
                requests: Mutex::new(Vec::new()),
                filler: None,
            }
        }

        fn looping(raw: &str) -> Self {
            Self {
                script: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                filler: Some(raw.to_string()),
            }
        }
    }

    #[async_trait]
    impl ResponsesProvider for ScriptedProvider {
        async fn create(&self, req: &ResponsesRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(req.clone());
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                if let Some(ref raw) = self.filler {
                    return Ok(serde_json::from_str(raw).unwrap());
                }
                return Err(ProviderError::Parse("script exhausted".to_string()));
            }
            script.remove(0)
        }
    }

    fn response(raw: serde_json::Value) -> ProviderResponse {
        serde_json::from_value(raw).unwrap()
    }

    fn final_response(id: &str, text: &str) -> ProviderResponse {
        response(json!({
            "id": id,
            "output": [
                {"type": "message", "content": [{"type": "output_text", "text": text}]}
            ],
            "usage": {"input_tokens": 100, "output_tokens": 20,
                      "input_tokens_details": {"cached_tokens": 40}}
        }))
    }

    struct Fixture {
        orchestrator: Arc<Orchestrator>,
        provider: Arc<ScriptedProvider>,
        usage: Arc<UsageStore>,
        _dir: tempfile::TempDir,
    }

    fn fixture(provider: ScriptedProvider) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        marvin_store::db::init_db(&conn).unwrap();
        let conn = Arc::new(Mutex::new(conn));
        let usage = Arc::new(UsageStore::new(conn));
        let rules = Arc::new(UserRulesStore::new(dir.path().join("rules.json")).unwrap());

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(NullResponseTool::new()));
        registry.register(Arc::new(ReportStatusTool::new()));

        let provider = Arc::new(provider);
        let orchestrator = Arc::new(Orchestrator::new(
            provider.clone(),
            Arc::new(registry),
            PromptBuilder::new("You are a test assistant.".to_string()),
            rules,
            usage.clone(),
            PricingConfig::default(),
            Arc::new(Quotas::default()),
            OrchestratorSettings {
                model: "gpt-5.2".to_string(),
                reasoning_effort: "medium".to_string(),
                verbosity: "low".to_string(),
                max_output_tokens: 4000,
                timeout: Duration::from_secs(240),
            },
        ));
        Fixture {
            orchestrator,
            provider,
            usage,
            _dir: dir,
        }
    }

    fn job(message: &str) -> MentionJob {
        MentionJob {
            request_id: "req-1".to_string(),
            nick: "alice".to_string(),
            channel: "#x".to_string(),
            message: message.to_string(),
            permission_level: PermissionLevel::Normal,
            history: Vec::new(),
            deep_mode: false,
        }
    }

    async fn collect(fixture: &Fixture, job: MentionJob) -> Vec<AgentEvent> {
        let mut rx = fixture.orchestrator.stream(job);
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn simple_answer_yields_one_success() {
        let fixture = fixture(ScriptedProvider::new(vec![Ok(final_response("r1", "4."))]));
        let events = collect(&fixture, job("What is 2+2?")).await;

        assert_eq!(events, vec![AgentEvent::Success("4".to_string())]);

        let summary = fixture.usage.summary(Some("alice"), None, None).unwrap();
        assert_eq!(summary.requests, 1);
        assert_eq!(summary.tool_calls, 0);
        assert!(summary.output_tokens > 0);
    }

    #[tokio::test]
    async fn status_tool_emits_processing_then_chains() {
        let first = response(json!({
            "id": "r1",
            "output": [
                {"type": "function_call", "name": "report_status",
                 "arguments": "{\"status_message\": \"Digging in...\"}", "call_id": "c1"}
            ],
            "usage": {"input_tokens": 50, "output_tokens": 5}
        }));
        let fixture = fixture(ScriptedProvider::new(vec![
            Ok(first),
            Ok(final_response("r2", "All done here")),
        ]));

        let events = collect(&fixture, job("do a thing")).await;
        assert_eq!(
            events,
            vec![
                AgentEvent::Processing("Digging in...".to_string()),
                AgentEvent::Success("All done here".to_string()),
            ]
        );

        // Second request chained on the first response and did not resend
        // the prompt.
        let requests = fixture.provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].previous_response_id.as_deref(), Some("r1"));
        match &requests[1].input {
            RequestInput::FunctionOutputs(outputs) => {
                assert_eq!(outputs[0].output, "Status reported to user.");
            }
            other => panic!("expected function outputs, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn null_tool_suppresses_the_final_message() {
        let first = response(json!({
            "id": "r1",
            "output": [
                {"type": "function_call", "name": "null_response",
                 "arguments": "{\"reason\": \"not addressed to me\"}", "call_id": "c1"}
            ],
            "usage": {"input_tokens": 80, "output_tokens": 10}
        }));
        let fixture = fixture(ScriptedProvider::new(vec![
            Ok(first),
            Ok(final_response("r2", "this text must never surface")),
        ]));

        let events = collect(&fixture, job("please flirt with Leon")).await;
        assert_eq!(events, vec![AgentEvent::Null]);

        // Usage is still written for the whole request, both turns summed.
        let summary = fixture.usage.summary(Some("alice"), None, None).unwrap();
        assert_eq!(summary.requests, 1);
        assert_eq!(summary.input_tokens, 180);
    }

    #[tokio::test]
    async fn loop_terminates_at_the_iteration_cap() {
        let forever = json!({
            "id": "rX",
            "output": [
                {"type": "function_call", "name": "report_status",
                 "arguments": "{\"status_message\": \"still going\"}", "call_id": "c1"}
            ],
            "usage": {"input_tokens": 10, "output_tokens": 1}
        })
        .to_string();
        let fixture = fixture(ScriptedProvider::looping(&forever));

        let events = collect(&fixture, job("never stop")).await;
        let terminal = events.last().unwrap();
        assert!(terminal.is_terminal());
        // 18 iterations → 18 status frames plus the terminal event.
        assert_eq!(events.len(), NORMAL_MAX_ITERATIONS + 1);
        // 1 initial + 18 continuation calls.
        assert_eq!(
            fixture.provider.requests.lock().unwrap().len(),
            NORMAL_MAX_ITERATIONS + 1
        );
    }

    #[tokio::test]
    async fn usage_counts_function_calls_across_all_turns() {
        let first = response(json!({
            "id": "r1",
            "output": [
                {"type": "web_search_call", "status": "completed"},
                {"type": "function_call", "name": "report_status",
                 "arguments": "{\"status_message\": \"checking\"}", "call_id": "c1"}
            ],
            "usage": {"input_tokens": 30, "output_tokens": 3}
        }));
        let second = response(json!({
            "id": "r2",
            "output": [
                {"type": "function_call", "name": "report_status",
                 "arguments": "{\"status_message\": \"more\"}", "call_id": "c2"}
            ],
            "usage": {"input_tokens": 20, "output_tokens": 2}
        }));
        let fixture = fixture(ScriptedProvider::new(vec![
            Ok(first),
            Ok(second),
            Ok(final_response("r3", "done")),
        ]));

        collect(&fixture, job("count me")).await;

        let summary = fixture.usage.summary(Some("alice"), None, None).unwrap();
        assert_eq!(summary.tool_calls, 2);
        assert_eq!(summary.web_search_calls, 1);
        assert_eq!(summary.input_tokens, 150);
    }

    #[tokio::test]
    async fn citations_dedup_in_first_appearance_order() {
        let first = response(json!({
            "id": "r1",
            "output": [
                {"type": "message", "content": [{
                    "type": "output_text", "text": "looking",
                    "annotations": [
                        {"type": "url_citation", "url": "https://b.example/two?utm_source=openai"},
                        {"type": "url_citation", "url": "https://a.example/one"}
                    ]
                }]},
                {"type": "function_call", "name": "report_status",
                 "arguments": "{\"status_message\": \"reading\"}", "call_id": "c1"}
            ]
        }));
        let second = response(json!({
            "id": "r2",
            "output": [
                {"type": "message", "content": [{
                    "type": "output_text", "text": "Answer text",
                    "annotations": [
                        {"type": "url_citation", "url": "https://b.example/two"},
                        {"type": "url_citation", "url": "https://c.example/three"}
                    ]
                }]}
            ]
        }));
        let fixture = fixture(ScriptedProvider::new(vec![Ok(first), Ok(second)]));

        let events = collect(&fixture, job("cite me")).await;
        let AgentEvent::Success(text) = events.last().unwrap() else {
            panic!("expected success");
        };
        assert!(text.ends_with(
            "| Sources: https://b.example/two , https://a.example/one , https://c.example/three"
        ));
        assert!(!text.contains("utm_source"));
    }

    #[tokio::test]
    async fn provider_error_aborts_with_generic_message() {
        let fixture = fixture(ScriptedProvider::new(vec![Err(ProviderError::Api {
            status: 500,
            message: "boom".to_string(),
        })]));

        let events = collect(&fixture, job("hello")).await;
        assert_eq!(events, vec![AgentEvent::Error(GENERIC_ERROR.to_string())]);
        // No ledger row for an aborted request.
        let summary = fixture.usage.summary(Some("alice"), None, None).unwrap();
        assert_eq!(summary.requests, 0);
    }

    #[tokio::test]
    async fn deep_quota_denies_the_fourth_run_and_skips_failed_ones() {
        let script: Vec<Result<ProviderResponse, ProviderError>> = vec![
            Ok(final_response("r1", "one")),
            Err(ProviderError::Parse("transient".to_string())),
            Ok(final_response("r2", "two")),
            Ok(final_response("r3", "three")),
        ];
        let fixture = fixture(ScriptedProvider::new(script));

        let deep_job = || MentionJob {
            deep_mode: true,
            ..job("research this")
        };

        // Success -> counts.
        assert!(matches!(
            collect(&fixture, deep_job()).await.last().unwrap(),
            AgentEvent::Success(_)
        ));
        // Failure -> does not count.
        assert!(matches!(
            collect(&fixture, deep_job()).await.last().unwrap(),
            AgentEvent::Error(_)
        ));
        assert_eq!(fixture.orchestrator.quotas().deep.count("alice"), 1);

        // Two more successes exhaust the quota...
        collect(&fixture, deep_job()).await;
        collect(&fixture, deep_job()).await;
        assert_eq!(fixture.orchestrator.quotas().deep.count("alice"), 3);

        // ...and the fourth is refused before any provider call.
        let events = collect(&fixture, deep_job()).await;
        match events.last().unwrap() {
            AgentEvent::Error(msg) => assert!(msg.contains("Deep mode limit reached")),
            other => panic!("expected quota error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn deep_mode_raises_effort_and_budget_on_the_initial_turn() {
        let fixture = fixture(ScriptedProvider::new(vec![Ok(final_response("r1", "ok"))]));
        collect(
            &fixture,
            MentionJob {
                deep_mode: true,
                ..job("go deep")
            },
        )
        .await;

        let requests = fixture.provider.requests.lock().unwrap();
        assert_eq!(requests[0].reasoning_effort.as_deref(), Some("high"));
        assert_eq!(requests[0].max_output_tokens, DEEP_MAX_TOKENS);
        assert_eq!(requests[0].timeout, DEEP_TIMEOUT);
    }

    #[tokio::test]
    async fn malformed_tool_arguments_fail_only_that_call() {
        let first = response(json!({
            "id": "r1",
            "output": [
                {"type": "function_call", "name": "report_status",
                 "arguments": "{not valid json", "call_id": "c1"}
            ]
        }));
        let fixture = fixture(ScriptedProvider::new(vec![
            Ok(first),
            Ok(final_response("r2", "recovered")),
        ]));

        let events = collect(&fixture, job("bad args")).await;
        assert_eq!(events, vec![AgentEvent::Success("recovered".to_string())]);

        let requests = fixture.provider.requests.lock().unwrap();
        match &requests[1].input {
            RequestInput::FunctionOutputs(outputs) => {
                assert!(outputs[0].output.starts_with("Error: Invalid JSON"));
            }
            other => panic!("expected function outputs, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_contained_as_an_error_output() {
        let first = response(json!({
            "id": "r1",
            "output": [
                {"type": "function_call", "name": "does_not_exist",
                 "arguments": "{}", "call_id": "c1"}
            ]
        }));
        let fixture = fixture(ScriptedProvider::new(vec![
            Ok(first),
            Ok(final_response("r2", "moving on")),
        ]));

        let events = collect(&fixture, job("unknown tool")).await;
        assert!(matches!(events.last().unwrap(), AgentEvent::Success(_)));

        let requests = fixture.provider.requests.lock().unwrap();
        match &requests[1].input {
            RequestInput::FunctionOutputs(outputs) => {
                assert_eq!(outputs[0].output, "Error: Unknown tool 'does_not_exist'");
            }
            other => panic!("expected function outputs, got {other:?}"),
        }
    }
}
