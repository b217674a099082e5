//! `fetch_url` — fetch and extract readable content from web pages, PDFs,
//! and code files. Output is capped; a `search_term` parameter lets the
//! model pull specific sections of large documents across repeat calls
//! instead of re-reading what it has already seen.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{Caller, Tool, ToolReply};

/// Roughly 6k tokens of content per call.
const MAX_CONTENT_CHARS: usize = 25_000;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const TRUNCATION_SUFFIX: &str = "\n[TRUNCATED]";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub struct FetchUrlTool {
    client: reqwest::Client,
}

impl FetchUrlTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for FetchUrlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct Input {
    url: String,
    #[serde(default)]
    search_term: Option<String>,
}

#[async_trait]
impl Tool for FetchUrlTool {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch content from a URL. Works with web pages (extracts readable text with \
         links preserved as markdown), PDFs, code files, JSON, XML, YAML, and other \
         text content.\n\n\
         TRUNCATION HANDLING (~25000 char limit): when content ends with [TRUNCATED], \
         call fetch_url again with the SAME url and a search_term taken from the last \
         section shown (or the next expected heading/function/page) to retrieve the \
         next relevant part without re-reading what you have already seen. \
         For code files use function or class names; for articles use section \
         headings; for PDFs use page markers like 'Page 5'."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "search_term": {
                    "type": ["string", "null"],
                    "description": "Return only sections matching this term (case-insensitive). \
                                    Use to find specific functions/topics in large files or to \
                                    continue reading past a truncation point."
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _caller: &Caller) -> ToolReply {
        let input: Input = match serde_json::from_value(args) {
            Ok(input) => input,
            Err(e) => return ToolReply::error(format!("Error: invalid arguments - {e}")),
        };

        if let Err(reason) = validate_url(&input.url) {
            return ToolReply::error(format!("Error: {reason}"));
        }

        debug!(url = %input.url, "fetching url");
        let resp = match self
            .client
            .get(&input.url)
            .timeout(REQUEST_TIMEOUT)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
            .header("Accept-Language", "en-US,en;q=0.5")
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolReply::error(format!("Error: fetch failed - {e}")),
        };

        if !resp.status().is_success() {
            return ToolReply::error(format!("Error: HTTP {}", resp.status().as_u16()));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        const BLOCKED: &[&str] = &[
            "image/",
            "video/",
            "audio/",
            "application/octet-stream",
            "application/zip",
            "application/gzip",
            "application/x-tar",
            "font/",
        ];
        if BLOCKED.iter().any(|b| content_type.contains(b)) {
            return ToolReply::error(format!(
                "Error: cannot fetch binary content ({content_type})"
            ));
        }

        let is_pdf =
            content_type.contains("application/pdf") || input.url.to_lowercase().ends_with(".pdf");

        let content = if is_pdf {
            let bytes = match resp.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => return ToolReply::error(format!("Error: reading body failed - {e}")),
            };
            match extract_pdf_pages(&bytes) {
                Ok(text) => text,
                Err(e) => return ToolReply::error(format!("Error: {e}")),
            }
        } else {
            let body = match resp.text().await {
                Ok(body) => body,
                Err(e) => return ToolReply::error(format!("Error: reading body failed - {e}")),
            };
            if content_type.contains("text/html") {
                // Markdown conversion keeps anchors as [label](url).
                html2md::parse_html(&body)
            } else {
                // Code, JSON, plain text and friends pass through as-is.
                body
            }
        };

        let output = match input.search_term.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(term) => match extract_matching_sections(&content, term) {
                Some(sections) => sections,
                None => {
                    return ToolReply::text(format!(
                        "No sections matching '{term}' found in {}.",
                        input.url
                    ))
                }
            },
            None => content,
        };

        ToolReply::text(truncate_with_marker(&output))
    }
}

/// Scheme and private-network guard: only http(s), and never loopback,
/// RFC 1918, or link-local hosts.
pub(crate) fn validate_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("URL scheme '{other}' not allowed (http/https only)")),
    }

    let host = parsed.host_str().ok_or("invalid URL: no host found")?;
    // IPv6 hosts serialize with brackets.
    let host = host.to_lowercase();
    let host = host.trim_matches(|c| c == '[' || c == ']');

    if host == "localhost" || host.ends_with(".localhost") || host == "::1" {
        return Err("cannot fetch local/private URLs".to_string());
    }
    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        let private = match ip {
            std::net::IpAddr::V4(v4) => {
                v4.is_loopback()
                    || v4.is_private()
                    || v4.is_link_local()
                    || v4.is_unspecified()
            }
            std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
        };
        if private {
            return Err("cannot fetch local/private URLs".to_string());
        }
    }
    Ok(())
}

/// Page-tagged PDF text so follow-up searches can target "Page N".
fn extract_pdf_pages(bytes: &[u8]) -> Result<String, String> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| format!("failed to parse PDF: {e}"))?;
    if pages.iter().all(|p| p.trim().is_empty()) {
        return Err("PDF contains no extractable text".to_string());
    }
    Ok(pages
        .iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(i, text)| format!("[Page {}]\n{}", i + 1, text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n"))
}

/// Paragraph-level matches with one neighbouring paragraph of context on
/// each side, separated by `[...]` where the document is skipped.
fn extract_matching_sections(content: &str, term: &str) -> Option<String> {
    let term_lower = term.to_lowercase();
    let paragraphs: Vec<&str> = if content.contains("\n\n") {
        content.split("\n\n").collect()
    } else {
        content.lines().collect()
    };

    let mut keep = vec![false; paragraphs.len()];
    let mut any = false;
    for (i, paragraph) in paragraphs.iter().enumerate() {
        if paragraph.to_lowercase().contains(&term_lower) {
            any = true;
            keep[i] = true;
            if i > 0 {
                keep[i - 1] = true;
            }
            if i + 1 < paragraphs.len() {
                keep[i + 1] = true;
            }
        }
    }
    if !any {
        return None;
    }

    let mut out = String::new();
    let mut in_gap = false;
    for (i, paragraph) in paragraphs.iter().enumerate() {
        if keep[i] {
            if in_gap && !out.is_empty() {
                out.push_str("\n\n[...]\n\n");
            } else if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(paragraph.trim_end());
            in_gap = false;
        } else {
            in_gap = true;
        }
        if out.chars().count() > MAX_CONTENT_CHARS {
            break;
        }
    }
    Some(out)
}

/// Cap at the content limit on a char boundary, with an explicit marker.
fn truncate_with_marker(content: &str) -> String {
    let count = content.chars().count();
    if count <= MAX_CONTENT_CHARS {
        return content.to_string();
    }
    let mut out: String = content.chars().take(MAX_CONTENT_CHARS).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_guard_rejects_non_http() {
        assert!(validate_url("ftp://example.com/file").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("https://example.com/page").is_ok());
    }

    #[test]
    fn private_hosts_are_blocked() {
        for url in [
            "http://localhost:8080/x",
            "http://127.0.0.1/x",
            "http://10.1.2.3/x",
            "http://192.168.1.1/x",
            "http://172.16.0.9/x",
            "http://0.0.0.0/x",
            "http://[::1]/x",
        ] {
            assert!(validate_url(url).is_err(), "{url} should be blocked");
        }
        assert!(validate_url("http://93.184.216.34/x").is_ok());
    }

    #[test]
    fn truncation_appends_marker_at_cap() {
        let long = "a".repeat(MAX_CONTENT_CHARS + 100);
        let out = truncate_with_marker(&long);
        assert!(out.ends_with(TRUNCATION_SUFFIX));
        assert_eq!(
            out.chars().count(),
            MAX_CONTENT_CHARS + TRUNCATION_SUFFIX.chars().count()
        );

        let short = "short content";
        assert_eq!(truncate_with_marker(short), short);
    }

    #[test]
    fn search_term_pulls_matching_sections_with_context() {
        let doc = "Intro paragraph.\n\nChapter 3: Authentication basics.\n\n\
                   Filler one.\n\nFiller two.\n\nChapter 4: Authorization rules.\n\nOutro.";
        let out = extract_matching_sections(doc, "chapter 4").unwrap();
        assert!(out.contains("Chapter 4: Authorization rules."));
        assert!(out.contains("Filler two."));
        assert!(out.contains("Outro."));
        assert!(!out.contains("Chapter 3"));
        assert!(out.contains("[...]") || !out.contains("Intro paragraph."));
    }

    #[test]
    fn search_term_miss_returns_none() {
        assert!(extract_matching_sections("some text here", "absent").is_none());
    }
}
