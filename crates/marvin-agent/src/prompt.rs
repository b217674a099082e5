//! Prompt assembly with a cache-stable prefix.
//!
//! Section order is fixed: static system prompt, deep-mode preamble,
//! per-user memory, then the volatile blocks (current question, recent
//! history, closing instruction). Everything that changes per request
//! comes after everything that does not, so the provider's prompt-prefix
//! cache survives conversation churn. The system prompt never embeds the
//! current datetime; the timestamp lives in the question block.

use chrono::Utc;
use marvin_core::types::HistoryMessage;

const QUESTION_MARKER: &str = "=== CURRENT QUESTION ===";
const CONTEXT_MARKER: &str = "=== RECENT CONVERSATION CONTEXT ===";
const CONTEXT_END_MARKER: &str = "=== END OF CONTEXT ===";

const DEEP_MODE_PREAMBLE: &str = "=== DEEP RESEARCH MODE ACTIVATED ===
You are in DEEP RESEARCH MODE. The user wants a thorough, well-researched answer.

PROGRESS UPDATES (REQUIRED):
Use the report_status tool to announce what you are doing at each major step,
e.g. \"Searching for information on the topic...\", \"Found relevant sources, analyzing...\",
\"Compiling findings into a comprehensive answer...\".

THOROUGH RESEARCH:
Perform at least 2-3 web searches on different aspects of the topic, and use
fetch_url to read full articles when snippets are not enough.

USE ALL AVAILABLE TOOLS as needed: web search, code execution, image analysis,
URL fetching, or anything else that helps answer thoroughly.

USE THE PASTE TOOL FOR THE FINAL ANSWER: your response will likely be long.
Create a formatted paste with the full answer and return only the paste URL
with a brief summary.

Quality over speed. The user explicitly requested deep research.
=== END DEEP RESEARCH MODE ===";

/// Assembles the full prompt for one mention request.
pub struct PromptBuilder {
    system_prompt: String,
}

impl PromptBuilder {
    pub fn new(system_prompt: String) -> Self {
        Self { system_prompt }
    }

    /// Build the prompt. `user_rules` is the rendered bulleted list of the
    /// user's enabled memory entries, if any.
    pub fn build(
        &self,
        user_message: &str,
        nick: &str,
        channel: &str,
        history: &[HistoryMessage],
        user_rules: Option<&str>,
        deep_mode: bool,
    ) -> String {
        self.build_at(
            user_message,
            nick,
            channel,
            history,
            user_rules,
            deep_mode,
            &Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        )
    }

    /// Deterministic variant used by tests: the timestamp is injected.
    pub fn build_at(
        &self,
        user_message: &str,
        nick: &str,
        channel: &str,
        history: &[HistoryMessage],
        user_rules: Option<&str>,
        deep_mode: bool,
        timestamp: &str,
    ) -> String {
        let mut parts: Vec<String> = vec![self.system_prompt.clone(), String::new()];

        if deep_mode {
            parts.push(DEEP_MODE_PREAMBLE.to_string());
            parts.push(String::new());
        }

        if let Some(rules) = user_rules {
            parts.push("=== CUSTOM RULES FOR THIS USER ===".to_string());
            parts.push(format!(
                "The following custom rules have been set by/for {nick}. Apply them when responding:"
            ));
            parts.push(rules.to_string());
            parts.push("=== END CUSTOM RULES ===".to_string());
            parts.push(String::new());
        }

        parts.push(QUESTION_MARKER.to_string());
        parts.push(format!("Timestamp: {timestamp}"));
        parts.push(format!("Channel: {channel}"));
        parts.push(format!("User: {nick}"));
        parts.push(format!("Message: {user_message}"));
        parts.push(String::new());

        if !history.is_empty() {
            parts.push(CONTEXT_MARKER.to_string());
            parts.push(format!(
                "(Last {} messages from {channel} for context)",
                history.len()
            ));
            parts.push(String::new());
            for msg in history {
                parts.push(format!("[{}] {}: {}", msg.timestamp, msg.nick, msg.content));
            }
            parts.push(String::new());
            parts.push(CONTEXT_END_MARKER.to_string());
        }

        parts.push(String::new());
        parts.push(
            "Please respond to the CURRENT QUESTION above. Use the conversation context \
             if relevant, but focus on answering what was just asked."
                .to_string(),
        );

        parts.join("\n")
    }

    /// Byte length of the stable prefix (everything before the question
    /// marker) for a given memory/deep-mode combination.
    pub fn stable_prefix_len(&self, user_rules: Option<&str>, deep_mode: bool) -> usize {
        let prompt = self.build_at("", "", "", &[], user_rules, deep_mode, "");
        prompt.find(QUESTION_MARKER).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> PromptBuilder {
        PromptBuilder::new("You are Marvin, an IRC assistant.".to_string())
    }

    fn history(n: usize) -> Vec<HistoryMessage> {
        (0..n)
            .map(|i| HistoryMessage {
                timestamp: format!("2026-05-01 12:0{i}:00"),
                nick: format!("user{i}"),
                content: format!("message number {i}"),
            })
            .collect()
    }

    #[test]
    fn prefix_is_byte_identical_across_requests() {
        let builder = builder();
        let a = builder.build_at("what is 2+2?", "alice", "#x", &history(3), None, false, "t1");
        let b = builder.build_at(
            "completely different question",
            "bob",
            "#y",
            &history(5),
            None,
            false,
            "t2",
        );
        let k = builder.stable_prefix_len(None, false);
        assert!(k > 0);
        assert_eq!(&a.as_bytes()[..k], &b.as_bytes()[..k]);
    }

    #[test]
    fn deep_mode_prefix_is_stable_per_flag() {
        let builder = builder();
        let a = builder.build_at("q1", "alice", "#x", &[], None, true, "t1");
        let b = builder.build_at("q2", "bob", "#x", &[], None, true, "t2");
        let k = builder.stable_prefix_len(None, true);
        assert_eq!(&a.as_bytes()[..k], &b.as_bytes()[..k]);
        assert!(a.contains("DEEP RESEARCH MODE"));
        // Deep and non-deep prefixes differ, as they must.
        assert_ne!(k, builder.stable_prefix_len(None, false));
    }

    #[test]
    fn question_block_carries_timestamp_not_system_prompt() {
        let builder = builder();
        let prompt = builder.build_at("hi", "alice", "#x", &[], None, false, "2026-05-01 09:00:00");
        let question_pos = prompt.find(QUESTION_MARKER).unwrap();
        let ts_pos = prompt.find("Timestamp: 2026-05-01 09:00:00").unwrap();
        assert!(ts_pos > question_pos);
        // Nothing before the question block mentions the timestamp.
        assert!(!prompt[..question_pos].contains("2026-05-01"));
    }

    #[test]
    fn history_renders_after_question_in_bracket_form() {
        let builder = builder();
        let prompt = builder.build_at("q", "alice", "#x", &history(2), None, false, "t");
        let q = prompt.find(QUESTION_MARKER).unwrap();
        let ctx = prompt.find(CONTEXT_MARKER).unwrap();
        assert!(ctx > q);
        assert!(prompt.contains("[2026-05-01 12:00:00] user0: message number 0"));
        assert!(prompt.contains(CONTEXT_END_MARKER));
    }

    #[test]
    fn memory_entries_sit_in_the_prefix() {
        let builder = builder();
        let rules = "- likes cats\n- prefers metric";
        let prompt = builder.build_at("q", "alice", "#x", &[], Some(rules), false, "t");
        let rules_pos = prompt.find("- likes cats").unwrap();
        let q_pos = prompt.find(QUESTION_MARKER).unwrap();
        assert!(rules_pos < q_pos);

        // Same user, same rules → identical prefix.
        let again = builder.build_at("other", "alice", "#z", &[], Some(rules), false, "t9");
        let k = builder.stable_prefix_len(Some(rules), false);
        assert_eq!(&prompt.as_bytes()[..k], &again.as_bytes()[..k]);
    }

    #[test]
    fn empty_history_omits_context_block() {
        let builder = builder();
        let prompt = builder.build_at("q", "alice", "#x", &[], None, false, "t");
        assert!(!prompt.contains(CONTEXT_MARKER));
    }
}
