use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{kind} #{id} not found")]
    NotFound { kind: &'static str, id: i64 },
}

pub type Result<T> = std::result::Result<T, StoreError>;
