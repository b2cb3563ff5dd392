//! Status store error types.

use clipzip_models::{ModelError, VideoStatus};
use thiserror::Error;

/// Result type for status store operations.
pub type DbResult<T> = Result<T, DbError>;

/// Errors that can occur talking to the status store.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Illegal status transition: {from} -> {to}")]
    InvalidTransition { from: VideoStatus, to: VideoStatus },

    #[error("Corrupt row: {0}")]
    CorruptRow(#[from] ModelError),
}

impl DbError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the same statement may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        match self {
            DbError::Sqlx(err) => match err {
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
                    true
                }
                sqlx::Error::Database(db_err) => db_err
                    .code()
                    .map(|code| is_retryable_sqlstate(&code))
                    .unwrap_or(false),
                _ => false,
            },
            _ => false,
        }
    }
}

/// Connection exceptions (class 08), serialization failures, deadlocks and
/// operator intervention (class 57).
fn is_retryable_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code.starts_with("57") || code == "40001" || code == "40P01"
}
