//! `web_search` — the provider's native search tool. There is no local
//! implementation: the definition is sent with every call and the provider
//! executes searches server-side, reporting them as `web_search_call`
//! output items.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Caller, Tool, ToolReply};

pub struct WebSearchTool {
    external_access: bool,
    allowed_domains: Vec<String>,
}

impl WebSearchTool {
    pub fn new(external_access: bool, allowed_domains: Vec<String>) -> Self {
        Self {
            external_access,
            allowed_domains,
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information (executed by the provider)."
    }

    fn parameters(&self) -> Value {
        json!({})
    }

    fn definition(&self) -> Value {
        let mut def = json!({ "type": "web_search" });
        if !self.allowed_domains.is_empty() {
            def["filters"] = json!({ "allowed_domains": self.allowed_domains });
        }
        if !self.external_access {
            def["external_web_access"] = json!(false);
        }
        def
    }

    async fn execute(&self, _args: Value, _caller: &Caller) -> ToolReply {
        // Never dispatched locally; the provider handles web_search calls.
        ToolReply::error("Error: web_search is executed by the provider, not locally")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_is_native_not_function() {
        let tool = WebSearchTool::new(true, vec!["docs.rs".to_string()]);
        let def = tool.definition();
        assert_eq!(def["type"], "web_search");
        assert!(def.get("name").is_none());
        assert_eq!(def["filters"]["allowed_domains"][0], "docs.rs");
    }

    #[test]
    fn no_allowlist_means_no_filters_key() {
        let tool = WebSearchTool::new(true, vec![]);
        assert!(tool.definition().get("filters").is_none());
    }
}
