use thiserror::Error;

#[derive(Debug, Error)]
pub enum KbError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("vector index error: {0}")]
    Index(String),

    #[error("URL already ingested; forget it first to re-learn")]
    AlreadyIngested,

    #[error("URL not found in knowledge base")]
    UnknownUrl,

    #[error("no content to ingest after extraction")]
    EmptyContent,

    #[error("store error: {0}")]
    Store(#[from] marvin_store::StoreError),
}

pub type Result<T> = std::result::Result<T, KbError>;
