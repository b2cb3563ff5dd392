//! Worker error types.

use std::fmt;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How a failure is handled by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Malformed input; acknowledged and dropped
    Validation,
    /// Unknown video/user or video not admissible; acknowledged and dropped
    NotFound,
    /// Network or service flakiness; retried locally
    TransientIo,
    /// Unreadable or empty video; terminal error
    Decode,
    /// Status store write failed; message left for redelivery
    Persistence,
    /// Notification could not be delivered; logged and swallowed
    Publish,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::NotFound => "not_found",
            ErrorClass::TransientIo => "transient_io",
            ErrorClass::Decode => "decode",
            ErrorClass::Persistence => "persistence",
            ErrorClass::Publish => "publish",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid message: {0}")]
    Validation(#[from] clipzip_models::ModelError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Storage error: {0}")]
    Storage(#[from] clipzip_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] clipzip_media::MediaError),

    #[error("Database error: {0}")]
    Db(#[from] clipzip_db::DbError),

    #[error("Queue error: {0}")]
    Queue(#[from] clipzip_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Map onto the pipeline's error taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            WorkerError::Validation(_) | WorkerError::ConfigError(_) => ErrorClass::Validation,
            WorkerError::NotFound(_) => ErrorClass::NotFound,
            WorkerError::Storage(e) if e.is_permanent() => ErrorClass::NotFound,
            WorkerError::Storage(_) => ErrorClass::TransientIo,
            WorkerError::Media(clipzip_media::MediaError::Io(_)) => ErrorClass::TransientIo,
            WorkerError::Media(_) => ErrorClass::Decode,
            WorkerError::Db(_) => ErrorClass::Persistence,
            WorkerError::Queue(_) => ErrorClass::Publish,
            WorkerError::PoolClosed | WorkerError::Io(_) => ErrorClass::TransientIo,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Storage(e) => e.is_transient(),
            WorkerError::Db(e) => e.is_retryable(),
            WorkerError::Queue(_) | WorkerError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clipzip_media::MediaError;
    use clipzip_models::ModelError;
    use clipzip_storage::StorageError;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            WorkerError::from(ModelError::MissingField("path")).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            WorkerError::from(StorageError::not_found("video/a.mp4")).class(),
            ErrorClass::NotFound
        );
        assert_eq!(
            WorkerError::from(StorageError::download_failed("reset")).class(),
            ErrorClass::TransientIo
        );
        assert_eq!(
            WorkerError::from(MediaError::EmptyVideo(0)).class(),
            ErrorClass::Decode
        );
        assert_eq!(
            WorkerError::from(clipzip_db::DbError::config("x")).class(),
            ErrorClass::Persistence
        );
        assert_eq!(
            WorkerError::from(clipzip_queue::QueueError::publish_failed("down")).class(),
            ErrorClass::Publish
        );
    }

    #[test]
    fn test_retryable() {
        assert!(WorkerError::from(StorageError::download_failed("reset")).is_retryable());
        assert!(!WorkerError::from(StorageError::not_found("k")).is_retryable());
        assert!(!WorkerError::from(MediaError::EmptyVideo(0)).is_retryable());
        assert!(!WorkerError::PoolClosed.is_retryable());
    }
}
