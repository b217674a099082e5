//! Knowledge base tools: `kb_learn`, `kb_search`, `kb_list`, `kb_forget`.
//!
//! Backed by the shared `KnowledgeBase` manager; ingestion is idempotent
//! per URL (learn rejects a known URL until it is forgotten).

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use marvin_kb::{KbError, KnowledgeBase};

use super::{Caller, Tool, ToolReply};

// ---------------------------------------------------------------------------
// kb_learn
// ---------------------------------------------------------------------------

pub struct KbLearnTool {
    kb: Arc<KnowledgeBase>,
}

impl KbLearnTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[derive(Deserialize)]
struct LearnInput {
    url: String,
}

#[async_trait]
impl Tool for KbLearnTool {
    fn name(&self) -> &str {
        "kb_learn"
    }

    fn description(&self) -> &str {
        "Ingest a web page or PDF into the persistent knowledge base so its content \
         can be retrieved semantically later. Use when a user says 'learn this page' \
         or shares documentation worth remembering. Re-learning an already ingested \
         URL is rejected; use kb_forget first to refresh it."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch and ingest (HTML, PDF, or plain text)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: LearnInput = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };
        match self.kb.learn_from_url(&input.url).await {
            Ok(outcome) => ToolReply::text(format!(
                "Successfully learned '{}'. Stored {} chunks.",
                outcome.title, outcome.chunks_added
            )),
            Err(KbError::AlreadyIngested) => {
                ToolReply::error("Error: URL already ingested. Use kb_forget to re-ingest.")
            }
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// kb_search
// ---------------------------------------------------------------------------

pub struct KbSearchTool {
    kb: Arc<KnowledgeBase>,
}

impl KbSearchTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[derive(Deserialize)]
struct SearchInput {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[async_trait]
impl Tool for KbSearchTool {
    fn name(&self) -> &str {
        "kb_search"
    }

    fn description(&self) -> &str {
        "Semantically search the knowledge base of previously ingested documents. Use \
         before answering questions that previously learned pages might cover. \
         Returns the most relevant chunks with their source URLs."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Natural-language query describing what to look for"
                },
                "top_k": {
                    "type": "integer",
                    "description": "How many chunks to return (1-10). Default: 5"
                }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: SearchInput = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        match self.kb.search(&input.query, input.top_k).await {
            Ok(hits) if hits.is_empty() => match self.kb.empty_result_hint().await {
                Ok(hint) => ToolReply::text(hint),
                Err(e) => ToolReply::error(format!("Error: {e}")),
            },
            Ok(hits) => {
                let mut out = format!("Found {} relevant chunk(s):\n\n", hits.len());
                for hit in hits {
                    out.push_str(&format!(
                        "### {} ({})\n{}\n(distance {:.3})\n\n",
                        hit.metadata.title, hit.metadata.source_url, hit.text, hit.distance
                    ));
                }
                ToolReply::text(out.trim_end().to_string())
            }
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// kb_list
// ---------------------------------------------------------------------------

pub struct KbListTool {
    kb: Arc<KnowledgeBase>,
}

impl KbListTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[async_trait]
impl Tool for KbListTool {
    fn name(&self) -> &str {
        "kb_list"
    }

    fn description(&self) -> &str {
        "List every source currently in the knowledge base with its title and chunk \
         count. Use when a user asks what the knowledge base contains."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, _args: Value, _caller: &Caller) -> ToolReply {
        match self.kb.list_sources().await {
            Ok(sources) if sources.is_empty() => {
                ToolReply::text("The knowledge base is empty.")
            }
            Ok(sources) => {
                let mut out = format!("{} source(s) in the knowledge base:\n", sources.len());
                for source in sources {
                    out.push_str(&format!(
                        "- {} ({} chunks) <{}>\n",
                        source.title, source.chunks, source.url
                    ));
                }
                ToolReply::text(out.trim_end().to_string())
            }
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// kb_forget
// ---------------------------------------------------------------------------

pub struct KbForgetTool {
    kb: Arc<KnowledgeBase>,
}

impl KbForgetTool {
    pub fn new(kb: Arc<KnowledgeBase>) -> Self {
        Self { kb }
    }
}

#[derive(Deserialize)]
struct ForgetInput {
    url: String,
}

#[async_trait]
impl Tool for KbForgetTool {
    fn name(&self) -> &str {
        "kb_forget"
    }

    fn description(&self) -> &str {
        "Remove every chunk of a previously ingested URL from the knowledge base. Use \
         when content is outdated or before re-learning a page."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The source URL to forget"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: ForgetInput = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };
        match self.kb.forget_url(&input.url).await {
            Ok(count) => ToolReply::text(format!("Removed {count} chunks from that URL.")),
            Err(KbError::UnknownUrl) => {
                ToolReply::error("Error: URL not found in the knowledge base.")
            }
            Err(e) => ToolReply::error(format!("Error: {e}")),
        }
    }
}
