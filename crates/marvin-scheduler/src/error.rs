use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("reminder #{id} not found")]
    NotFound { id: i64 },

    #[error("invalid reminder: {0}")]
    Invalid(String),

    #[error("you have too many pending reminders (max {max})")]
    TooManyPending { max: usize },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
