//! The vector index contract and its two implementations: an HTTP client
//! for a Chroma-style collection API, and an in-memory cosine index used
//! by tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KbError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub source_url: String,
    pub title: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub ingested_at: String,
}

#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    /// Cosine distance; smaller is closer.
    pub distance: f32,
}

/// The only surface the core relies on. Single-writer: the KB manager and
/// the migration job are the sole upsert paths for their collections.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, collection: &str, chunks: Vec<IndexedChunk>) -> Result<()>;
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryHit>>;
    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()>;
    /// All (id, metadata) pairs in a collection.
    async fn list(&self, collection: &str) -> Result<Vec<(String, ChunkMetadata)>>;
}

// ---------------------------------------------------------------------------
// HTTP implementation (Chroma-style REST collections)
// ---------------------------------------------------------------------------

pub struct HttpVectorIndex {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVectorIndex {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, collection: &str, op: &str) -> String {
        format!("{}/collections/{collection}/{op}", self.base_url)
    }

    async fn post(&self, url: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| KbError::Index(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(KbError::Index(format!("HTTP {status}: {text}")));
        }
        resp.json().await.map_err(|e| KbError::Index(e.to_string()))
    }
}

#[derive(Deserialize, Default)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    metadatas: Vec<ChunkMetadata>,
}

#[derive(Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Vec<Vec<String>>,
    #[serde(default)]
    metadatas: Vec<Vec<ChunkMetadata>>,
    #[serde(default)]
    distances: Vec<Vec<f32>>,
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    async fn upsert(&self, collection: &str, chunks: Vec<IndexedChunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        let documents: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let embeddings: Vec<&[f32]> = chunks.iter().map(|c| c.embedding.as_slice()).collect();
        let metadatas: Vec<&ChunkMetadata> = chunks.iter().map(|c| &c.metadata).collect();

        self.post(
            &self.url(collection, "upsert"),
            serde_json::json!({
                "ids": ids,
                "embeddings": embeddings,
                "documents": documents,
                "metadatas": metadatas,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryHit>> {
        let value = self
            .post(
                &self.url(collection, "query"),
                serde_json::json!({
                    "query_embeddings": [embedding],
                    "n_results": top_k,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;
        let parsed: QueryResponse =
            serde_json::from_value(value).map_err(|e| KbError::Index(e.to_string()))?;

        let (Some(ids), Some(documents), Some(metadatas), Some(distances)) = (
            parsed.ids.into_iter().next(),
            parsed.documents.into_iter().next(),
            parsed.metadatas.into_iter().next(),
            parsed.distances.into_iter().next(),
        ) else {
            return Ok(Vec::new());
        };

        Ok(ids
            .into_iter()
            .zip(documents)
            .zip(metadatas.into_iter().zip(distances))
            .map(|((id, text), (metadata, distance))| QueryHit {
                id,
                text,
                metadata,
                distance,
            })
            .collect())
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.post(
            &self.url(collection, "delete"),
            serde_json::json!({ "ids": ids }),
        )
        .await?;
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, ChunkMetadata)>> {
        let value = self
            .post(&self.url(collection, "get"), serde_json::json!({}))
            .await?;
        let parsed: GetResponse =
            serde_json::from_value(value).map_err(|e| KbError::Index(e.to_string()))?;
        Ok(parsed.ids.into_iter().zip(parsed.metadatas).collect())
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation (tests, local development)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryIndex {
    collections: Mutex<HashMap<String, Vec<IndexedChunk>>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn upsert(&self, collection: &str, chunks: Vec<IndexedChunk>) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        let entries = collections.entry(collection.to_string()).or_default();
        for chunk in chunks {
            if let Some(existing) = entries.iter_mut().find(|c| c.id == chunk.id) {
                *existing = chunk;
            } else {
                entries.push(chunk);
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<QueryHit>> {
        let collections = self.collections.lock().unwrap();
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<QueryHit> = entries
            .iter()
            .map(|c| QueryHit {
                id: c.id.clone(),
                text: c.text.clone(),
                metadata: c.metadata.clone(),
                distance: cosine_distance(&c.embedding, embedding),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, ids: &[String]) -> Result<()> {
        let mut collections = self.collections.lock().unwrap();
        if let Some(entries) = collections.get_mut(collection) {
            entries.retain(|c| !ids.contains(&c.id));
        }
        Ok(())
    }

    async fn list(&self, collection: &str) -> Result<Vec<(String, ChunkMetadata)>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|entries| {
                entries
                    .iter()
                    .map(|c| (c.id.clone(), c.metadata.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
