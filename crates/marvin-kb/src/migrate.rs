//! Background job that mirrors newly persisted channel messages into the
//! vector index so the chat-history tool can search them semantically.
//!
//! Idempotent by construction: each pass embeds only rows with an id above
//! the highest id already indexed, so restarts and overlapping runs never
//! duplicate vectors. The initial delay lets the HTTP boundary come up
//! before the first (potentially large) batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use marvin_store::messages::MessageStore;

use crate::embed::Embedder;
use crate::error::Result;
use crate::index::{ChunkMetadata, IndexedChunk, VectorIndex};

const INITIAL_DELAY: Duration = Duration::from_secs(30);
const RUN_INTERVAL: Duration = Duration::from_secs(15 * 60);
const BATCH_LIMIT: usize = 500;

pub struct HistoryMigrator {
    messages: Arc<MessageStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    collection: String,
}

impl HistoryMigrator {
    pub fn new(
        messages: Arc<MessageStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        collection: String,
    ) -> Self {
        Self {
            messages,
            index,
            embedder,
            collection,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(INITIAL_DELAY) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
        }

        let mut interval = tokio::time::interval(RUN_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(n) => info!(embedded = n, "history migration pass complete"),
                        Err(e) => error!("history migration failed: {e}"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("history migrator shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One migration pass. Returns the number of messages embedded.
    pub async fn run_once(&self) -> Result<usize> {
        let high_water = self.max_indexed_id().await?;
        let rows = self.messages.after_id(high_water, BATCH_LIMIT)?;

        // IRC events (kicks, joins, mode changes) carry no searchable prose.
        let rows: Vec<_> = rows
            .into_iter()
            .filter(|m| m.event_type.is_none() && !m.content.trim().is_empty())
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = rows
            .iter()
            .map(|m| format!("{}: {}", m.nick, m.content))
            .collect();
        let embeddings = self.embedder.embed(&texts).await?;

        let chunks: Vec<IndexedChunk> = rows
            .iter()
            .zip(texts.into_iter().zip(embeddings))
            .map(|(m, (text, embedding))| IndexedChunk {
                id: format!("msg_{}", m.id),
                text,
                embedding,
                // The chunk metadata shape is reused for history rows:
                // source_url holds the channel, title the nick.
                metadata: ChunkMetadata {
                    source_url: m.channel.clone(),
                    title: m.nick.clone(),
                    chunk_index: 0,
                    total_chunks: 1,
                    ingested_at: m.timestamp.clone(),
                },
            })
            .collect();

        let count = chunks.len();
        self.index.upsert(&self.collection, chunks).await?;
        Ok(count)
    }

    async fn max_indexed_id(&self) -> Result<i64> {
        let entries = self.index.list(&self.collection).await?;
        Ok(entries
            .iter()
            .filter_map(|(id, _)| id.strip_prefix("msg_")?.parse::<i64>().ok())
            .max()
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CountingEmbedder {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            *self.calls.lock().unwrap() += 1;
            Ok(texts.iter().map(|t| vec![t.len() as f32]).collect())
        }
    }

    fn message_store() -> Arc<MessageStore> {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        marvin_store::db::init_db(&conn).unwrap();
        Arc::new(MessageStore::new(Arc::new(std::sync::Mutex::new(conn))))
    }

    #[tokio::test]
    async fn second_pass_embeds_nothing_new() {
        let messages = message_store();
        messages.append("#x", "alice", "hello", false, None).unwrap();
        messages.append("#x", "bob", "world", false, None).unwrap();

        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(CountingEmbedder {
            calls: Mutex::new(0),
        });
        let migrator = HistoryMigrator::new(
            messages.clone(),
            index.clone(),
            embedder.clone(),
            "history".to_string(),
        );

        assert_eq!(migrator.run_once().await.unwrap(), 2);
        assert_eq!(migrator.run_once().await.unwrap(), 0);
        assert_eq!(index.list("history").await.unwrap().len(), 2);

        // New rows after the high-water mark are picked up.
        messages.append("#x", "carol", "late", false, None).unwrap();
        assert_eq!(migrator.run_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn events_and_empty_rows_are_skipped() {
        let messages = message_store();
        messages
            .append("#x", "server", "alice kicked", false, Some("KICK"))
            .unwrap();
        messages.append("#x", "alice", "   ", false, None).unwrap();

        let migrator = HistoryMigrator::new(
            messages,
            Arc::new(MemoryIndex::new()),
            Arc::new(CountingEmbedder {
                calls: Mutex::new(0),
            }),
            "history".to_string(),
        );
        assert_eq!(migrator.run_once().await.unwrap(), 0);
    }
}
