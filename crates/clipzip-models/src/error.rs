//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unknown status code: {0}")]
    UnknownStatus(i16),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedMessage(msg.into())
    }
}
