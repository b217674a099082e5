//! IRC output post-processing: flatten the model's markdown-ish text to a
//! single line and append a clean citation appendix.

use regex::Regex;
use std::sync::OnceLock;

fn markdown_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap())
}

fn bare_domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\s*\([\w.-]+\.(com|org|net|gov|edu|io|co|uk|de|fr|info|dev)\)").unwrap()
    })
}

fn sources_section_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*Sources?:\s*[^|]*?(\||$)").unwrap())
}

/// Flatten `text` for IRC and append `citations` (already cleaned and
/// deduplicated, in first-appearance order) as a `Sources:` suffix.
pub fn clean_for_irc(text: &str, citations: &[String]) -> String {
    if text.is_empty() {
        return "I couldn't generate a response.".to_string();
    }

    // Inline markdown links keep their label only.
    let mut out = markdown_link_re().replace_all(text, "$1").to_string();
    // Parenthetical bare-domain artefacts left over from stripped links.
    out = bare_domain_re().replace_all(&out, "").to_string();
    // The model's own sources section; a clean one is re-appended below.
    out = sources_section_re().replace_all(&out, "$1").to_string();

    out = out.replace(['\n', '\r'], " ");
    let mut flat = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.ends_with('.') {
        flat.pop();
    }
    flat = flat.trim().to_string();

    if flat.is_empty() {
        return "I couldn't generate a response.".to_string();
    }

    if !citations.is_empty() {
        flat.push_str(" | Sources: ");
        flat.push_str(&citations.join(" , "));
    }
    flat
}

/// Strip known tracking query parameters from a citation URL.
pub fn clean_citation_url(url: &str) -> String {
    const TRACKING: &[&str] = &[
        "utm_source",
        "utm_medium",
        "utm_campaign",
        "utm_term",
        "utm_content",
    ];

    let Ok(mut parsed) = reqwest::Url::parse(url) else {
        return url.to_string();
    };

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = kept
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    urlencoding::encode(k).into_owned()
                } else {
                    format!("{}={}", urlencoding::encode(k), urlencoding::encode(v))
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        parsed.set_query(Some(&query));
    }
    parsed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_links_keep_label() {
        let out = clean_for_irc("See [the docs](https://example.com/docs) for details", &[]);
        assert_eq!(out, "See the docs for details");
    }

    #[test]
    fn parenthetical_domains_are_removed() {
        let out = clean_for_irc("Reported by Reuters (reuters.com) today", &[]);
        assert_eq!(out, "Reported by Reuters today");
    }

    #[test]
    fn newlines_collapse_to_single_spaces() {
        let out = clean_for_irc("line one\nline two\r\n\n  line   three", &[]);
        assert_eq!(out, "line one line two line three");
    }

    #[test]
    fn single_trailing_period_is_trimmed() {
        assert_eq!(clean_for_irc("Done.", &[]), "Done");
        assert_eq!(clean_for_irc("v1.2.3", &[]), "v1.2.3");
    }

    #[test]
    fn model_authored_sources_section_is_replaced() {
        let citations = vec!["https://a.example/one".to_string()];
        let out = clean_for_irc("Answer text. Sources: a.example and stuff", &citations);
        assert!(out.starts_with("Answer text"));
        assert_eq!(out.matches("Sources:").count(), 1);
        assert!(out.ends_with("| Sources: https://a.example/one"));
    }

    #[test]
    fn citations_append_in_order() {
        let citations = vec![
            "https://a.example/1".to_string(),
            "https://b.example/2".to_string(),
        ];
        let out = clean_for_irc("Answer", &citations);
        assert_eq!(
            out,
            "Answer | Sources: https://a.example/1 , https://b.example/2"
        );
    }

    #[test]
    fn empty_input_yields_fallback_line() {
        assert_eq!(clean_for_irc("", &[]), "I couldn't generate a response.");
        assert_eq!(clean_for_irc("\n\n", &[]), "I couldn't generate a response.");
    }

    #[test]
    fn tracking_params_are_stripped() {
        let cleaned = clean_citation_url(
            "https://site.example/article?utm_source=openai&id=7&utm_campaign=x",
        );
        assert_eq!(cleaned, "https://site.example/article?id=7");
    }

    #[test]
    fn url_without_query_is_untouched() {
        assert_eq!(
            clean_citation_url("https://site.example/a/b"),
            "https://site.example/a/b"
        );
    }

    #[test]
    fn all_tracking_query_drops_question_mark() {
        assert_eq!(
            clean_citation_url("https://site.example/a?utm_source=openai"),
            "https://site.example/a"
        );
    }
}
