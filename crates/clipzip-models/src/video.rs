//! Video records and their processing status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, ModelResult};

/// Opaque identifier of an uploaded video.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoId(pub String);

impl VideoId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Video processing status.
///
/// Persisted as a small integer: 1=waiting, 2=processing, 3=done, 4=error.
/// The only legal moves are `Waiting -> Processing` and
/// `Processing -> {Done, Error}`; `Done` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoStatus {
    /// Uploaded, waiting for a worker
    #[default]
    Waiting,
    /// Admitted by a worker
    Processing,
    /// Archive uploaded
    Done,
    /// Processing failed
    Error,
}

impl VideoStatus {
    /// Integer code stored in the `status` column.
    pub fn code(&self) -> i16 {
        match self {
            VideoStatus::Waiting => 1,
            VideoStatus::Processing => 2,
            VideoStatus::Done => 3,
            VideoStatus::Error => 4,
        }
    }

    /// Parse a stored status code.
    pub fn from_code(code: i16) -> ModelResult<Self> {
        match code {
            1 => Ok(VideoStatus::Waiting),
            2 => Ok(VideoStatus::Processing),
            3 => Ok(VideoStatus::Done),
            4 => Ok(VideoStatus::Error),
            other => Err(ModelError::UnknownStatus(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Waiting => "waiting",
            VideoStatus::Processing => "processing",
            VideoStatus::Done => "done",
            VideoStatus::Error => "error",
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VideoStatus::Done | VideoStatus::Error)
    }

    /// Whether `self -> next` is an edge of the status graph.
    pub fn can_transition_to(&self, next: VideoStatus) -> bool {
        matches!(
            (self, next),
            (VideoStatus::Waiting, VideoStatus::Processing)
                | (VideoStatus::Processing, VideoStatus::Done)
                | (VideoStatus::Processing, VideoStatus::Error)
        )
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for VideoStatus {
    type Error = ModelError;

    fn try_from(code: i16) -> ModelResult<Self> {
        Self::from_code(code)
    }
}

/// Video record owned by the upstream upload service.
///
/// The worker only reads it and moves its status forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    /// Unique video ID
    pub video_id: VideoId,

    /// Owner (user ID)
    pub owner_id: String,

    /// Upload timestamp
    pub uploaded_at: DateTime<Utc>,

    /// Processing status
    pub status: VideoStatus,

    /// Object-store key of the uploaded source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,

    /// Archive key, set only once the video is done
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Free-form metadata supplied at upload time
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Video {
    /// Create a freshly uploaded video in the waiting state.
    pub fn new(video_id: impl Into<VideoId>, owner_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            owner_id: owner_id.into(),
            uploaded_at: Utc::now(),
            status: VideoStatus::Waiting,
            source_path: None,
            archive_name: None,
            title: None,
            description: None,
            metadata: serde_json::Value::Null,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the source path.
    pub fn with_source_path(mut self, path: impl Into<String>) -> Self {
        self.source_path = Some(path.into());
        self
    }

    /// Set the status.
    pub fn with_status(mut self, status: VideoStatus) -> Self {
        self.status = status;
        self
    }

    /// Title shown to the owner: the title, else the file name, else the id.
    pub fn display_title(&self) -> String {
        [self.title.as_deref(), self.source_path.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.video_id.to_string())
    }
}
