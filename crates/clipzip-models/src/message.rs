//! Inbound task messages.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};
use crate::video::VideoId;

/// "A video is ready" event consumed from the input stream.
///
/// Wire shape: `{"video_id": <id>, "path": <string>}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskMessage {
    pub video_id: VideoId,
    /// Object-store key of the uploaded video
    pub path: String,
}

/// Upstream producers emit the id either as a string or as a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
struct RawTaskMessage {
    video_id: Option<RawId>,
    path: Option<String>,
}

impl TaskMessage {
    pub fn new(video_id: impl Into<VideoId>, path: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            path: path.into(),
        }
    }

    /// Parse and validate a raw message body.
    ///
    /// Blank ids and paths are rejected the same way as missing ones.
    pub fn parse(body: &[u8]) -> ModelResult<Self> {
        let raw: RawTaskMessage = serde_json::from_slice(body)
            .map_err(|e| ModelError::malformed(format!("invalid JSON: {}", e)))?;

        let video_id = match raw.video_id {
            Some(RawId::Text(s)) => s.trim().to_string(),
            Some(RawId::Number(n)) => n.to_string(),
            None => String::new(),
        };
        if video_id.is_empty() {
            return Err(ModelError::MissingField("video_id"));
        }

        let path = raw.path.map(|p| p.trim().to_string()).unwrap_or_default();
        if path.is_empty() {
            return Err(ModelError::MissingField("path"));
        }

        Ok(Self {
            video_id: VideoId(video_id),
            path,
        })
    }

    /// Serialize to the wire shape.
    pub fn to_json(&self) -> ModelResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
