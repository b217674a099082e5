use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::chunk::chunk_text;
use crate::embed::Embedder;
use crate::error::{KbError, Result};
use crate::index::{ChunkMetadata, IndexedChunk, QueryHit, VectorIndex};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOP_K: usize = 10;

#[derive(Debug, Clone)]
pub struct LearnOutcome {
    pub title: String,
    pub chunks_added: usize,
}

#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub url: String,
    pub title: String,
    pub chunks: usize,
}

/// Ingestion and retrieval over one vector-index collection.
pub struct KnowledgeBase {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    http: reqwest::Client,
    collection: String,
}

impl KnowledgeBase {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>, collection: String) -> Self {
        Self {
            index,
            embedder,
            http: reqwest::Client::new(),
            collection,
        }
    }

    /// Fetch a URL, extract its text, and store it chunked + embedded.
    /// Re-ingesting a known URL is rejected until it is forgotten.
    pub async fn learn_from_url(&self, url: &str) -> Result<LearnOutcome> {
        if !self.ids_for_url(url).await?.is_empty() {
            return Err(KbError::AlreadyIngested);
        }

        let (text, title) = self.fetch_and_extract(url).await?;
        let title = title.unwrap_or_else(|| title_from_url(url));

        let chunks = chunk_text(&text);
        if chunks.is_empty() {
            return Err(KbError::EmptyContent);
        }

        let embeddings = self.embedder.embed(&chunks).await?;
        let ingested_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let prefix = chunk_id_prefix(url);
        let total = chunks.len();

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| IndexedChunk {
                id: format!("{prefix}_{i}"),
                text,
                embedding,
                metadata: ChunkMetadata {
                    source_url: url.to_string(),
                    title: title.clone(),
                    chunk_index: i,
                    total_chunks: total,
                    ingested_at: ingested_at.clone(),
                },
            })
            .collect();

        self.index.upsert(&self.collection, indexed).await?;
        info!(%url, %title, chunks = total, "knowledge base ingested url");
        Ok(LearnOutcome {
            title,
            chunks_added: total,
        })
    }

    /// Semantic retrieval. `top_k` is clamped to 10.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<QueryHit>> {
        let embeddings = self.embedder.embed(&[query.to_string()]).await?;
        let Some(embedding) = embeddings.into_iter().next() else {
            return Ok(Vec::new());
        };
        self.index
            .query(&self.collection, &embedding, top_k.clamp(1, MAX_TOP_K))
            .await
    }

    /// When a search comes back empty, a hint listing known sources lets
    /// the model refine its query instead of giving up.
    pub async fn empty_result_hint(&self) -> Result<String> {
        let sources = self.list_sources().await?;
        if sources.is_empty() {
            return Ok("The knowledge base is empty. Use kb_learn with a URL first.".to_string());
        }
        let titles: Vec<String> = sources.iter().map(|s| s.title.clone()).collect();
        Ok(format!(
            "No matching chunks. Available sources: {}",
            titles.join(", ")
        ))
    }

    pub async fn list_sources(&self) -> Result<Vec<SourceInfo>> {
        let entries = self.index.list(&self.collection).await?;
        let mut sources: HashMap<String, SourceInfo> = HashMap::new();
        for (_, metadata) in entries {
            sources
                .entry(metadata.source_url.clone())
                .or_insert_with(|| SourceInfo {
                    url: metadata.source_url.clone(),
                    title: metadata.title.clone(),
                    chunks: 0,
                })
                .chunks += 1;
        }
        let mut out: Vec<SourceInfo> = sources.into_values().collect();
        out.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(out)
    }

    /// Remove every chunk of a URL. Returns how many were deleted.
    pub async fn forget_url(&self, url: &str) -> Result<usize> {
        let ids = self.ids_for_url(url).await?;
        if ids.is_empty() {
            return Err(KbError::UnknownUrl);
        }
        let count = ids.len();
        self.index.delete(&self.collection, &ids).await?;
        info!(%url, chunks = count, "knowledge base forgot url");
        Ok(count)
    }

    async fn ids_for_url(&self, url: &str) -> Result<Vec<String>> {
        Ok(self
            .index
            .list(&self.collection)
            .await?
            .into_iter()
            .filter(|(_, meta)| meta.source_url == url)
            .map(|(id, _)| id)
            .collect())
    }

    async fn fetch_and_extract(&self, url: &str) -> Result<(String, Option<String>)> {
        let resp = self
            .http
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .header(
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
            )
            .send()
            .await
            .map_err(|e| KbError::Fetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(KbError::Fetch(format!("HTTP {}", resp.status().as_u16())));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();

        if content_type.contains("application/pdf") || url.to_lowercase().ends_with(".pdf") {
            let bytes = resp.bytes().await.map_err(|e| KbError::Fetch(e.to_string()))?;
            let text = pdf_extract::extract_text_from_mem(&bytes)
                .map_err(|e| KbError::Fetch(format!("failed to parse PDF: {e}")))?;
            return Ok((text, None));
        }

        let body = resp.text().await.map_err(|e| KbError::Fetch(e.to_string()))?;
        if content_type.contains("text/html") {
            Ok(extract_html_text(&body))
        } else {
            Ok((body, None))
        }
    }
}

/// Plain text + title from an HTML document. Scripts, styles, and chrome
/// elements are discarded; an `article`/`main` region wins when present.
pub fn extract_html_text(html: &str) -> (String, Option<String>) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let main_selectors = ["article", "main", "[role=\"main\"]", ".content", ".post"];
    for raw in main_selectors {
        if let Ok(sel) = Selector::parse(raw) {
            if let Some(element) = document.select(&sel).next() {
                return (collapse_whitespace(&element.text().collect::<Vec<_>>().join(" ")), title);
            }
        }
    }

    let body_text = match Selector::parse("body")
        .ok()
        .and_then(|sel| document.select(&sel).next())
    {
        Some(body) => body.text().collect::<Vec<_>>().join(" "),
        None => document.root_element().text().collect::<Vec<_>>().join(" "),
    };
    (collapse_whitespace(&body_text), title)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Deterministic per-URL id prefix: `kb_<sha256(url)[..8]>`.
fn chunk_id_prefix(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("kb_{}", &hex::encode(digest)[..8])
}

/// Last path segment as a title of last resort.
fn title_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains("://"))
        .unwrap_or(url)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use async_trait::async_trait;

    /// Deterministic embedder: vector derived from text length so distinct
    /// chunks stay distinct without network access.
    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| vec![t.len() as f32, t.chars().next().map(|c| c as u32 as f32).unwrap_or(0.0)])
                .collect())
        }
    }

    fn kb(index: Arc<MemoryIndex>) -> KnowledgeBase {
        KnowledgeBase::new(index, Arc::new(FakeEmbedder), "kb_test".to_string())
    }

    async fn seed(kb: &KnowledgeBase, url: &str, text: &str, title: &str) -> usize {
        // Bypass the network path: index pre-chunked content directly.
        let chunks = chunk_text(text);
        let embeddings = kb.embedder.embed(&chunks).await.unwrap();
        let total = chunks.len();
        let prefix = chunk_id_prefix(url);
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| IndexedChunk {
                id: format!("{prefix}_{i}"),
                text,
                embedding,
                metadata: ChunkMetadata {
                    source_url: url.to_string(),
                    title: title.to_string(),
                    chunk_index: i,
                    total_chunks: total,
                    ingested_at: "2026-01-01 00:00:00".to_string(),
                },
            })
            .collect();
        kb.index.upsert(&kb.collection, indexed).await.unwrap();
        total
    }

    #[tokio::test]
    async fn duplicate_url_is_rejected_until_forgotten() {
        let index = Arc::new(MemoryIndex::new());
        let kb = kb(index);
        let first = seed(&kb, "https://example.com/doc", &"content. ".repeat(300), "Doc").await;
        assert!(first > 0);

        // The learn path must refuse while chunks for the url exist.
        let err = kb.learn_from_url("https://example.com/doc").await.unwrap_err();
        assert!(matches!(err, KbError::AlreadyIngested));

        let removed = kb.forget_url("https://example.com/doc").await.unwrap();
        assert_eq!(removed, first);
        assert!(kb.ids_for_url("https://example.com/doc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn forget_unknown_url_errors() {
        let index = Arc::new(MemoryIndex::new());
        let kb = kb(index);
        assert!(matches!(
            kb.forget_url("https://nowhere.invalid").await.unwrap_err(),
            KbError::UnknownUrl
        ));
    }

    #[tokio::test]
    async fn list_sources_groups_chunks_per_url() {
        let index = Arc::new(MemoryIndex::new());
        let kb = kb(index);
        let n = seed(&kb, "https://a.example/x", &"alpha. ".repeat(400), "Alpha").await;
        seed(&kb, "https://b.example/y", "short beta text.", "Beta").await;

        let sources = kb.list_sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        let alpha = sources.iter().find(|s| s.title == "Alpha").unwrap();
        assert_eq!(alpha.chunks, n);
    }

    #[tokio::test]
    async fn empty_search_hint_names_sources() {
        let index = Arc::new(MemoryIndex::new());
        let kb = kb(index);
        seed(&kb, "https://a.example/x", "alpha doc.", "Alpha Guide").await;
        let hint = kb.empty_result_hint().await.unwrap();
        assert!(hint.contains("Alpha Guide"));
    }

    #[test]
    fn html_extraction_prefers_article_and_title() {
        let html = r#"<html><head><title>My Page</title><style>.x{}</style></head>
            <body><nav>menu</nav><article>Real content here.</article></body></html>"#;
        let (text, title) = extract_html_text(html);
        assert_eq!(title.as_deref(), Some("My Page"));
        assert_eq!(text, "Real content here.");
    }

    #[test]
    fn url_title_fallback_uses_last_segment() {
        assert_eq!(title_from_url("https://x.example/docs/guide.pdf"), "guide.pdf");
        assert_eq!(title_from_url("https://x.example/"), "x.example");
    }

    #[test]
    fn chunk_ids_are_stable_per_url() {
        assert_eq!(chunk_id_prefix("https://a"), chunk_id_prefix("https://a"));
        assert_ne!(chunk_id_prefix("https://a"), chunk_id_prefix("https://b"));
        assert_eq!(chunk_id_prefix("https://a").len(), "kb_".len() + 8);
    }
}
