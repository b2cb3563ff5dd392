//! Per-video log context.
//!
//! Every line a job writes carries `video_id` and `operation`, so the
//! lifecycle of one video can be filtered out of interleaved worker output.

use std::time::Duration;

use tracing::{error, info, warn, Span};

use clipzip_models::{VideoId, VideoStatus};

#[derive(Debug, Clone)]
pub struct JobLogger {
    video_id: String,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(video_id: &VideoId, operation: &'static str) -> Self {
        Self {
            video_id: video_id.to_string(),
            operation,
        }
    }

    pub fn video_id(&self) -> &str {
        &self.video_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span wrapping the whole job, so lines logged by the collaborators
    /// it calls inherit the video id too.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("video", video_id = %self.video_id, operation = self.operation)
    }

    pub fn log_start(&self, source_path: &str) {
        info!(
            video_id = %self.video_id,
            operation = self.operation,
            source = %source_path,
            "Processing started"
        );
    }

    /// One completed step of the pipeline.
    pub fn log_step(&self, step: &str, detail: &str) {
        info!(
            video_id = %self.video_id,
            operation = self.operation,
            step,
            "{}", detail
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(video_id = %self.video_id, operation = self.operation, "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(video_id = %self.video_id, operation = self.operation, "{}", message);
    }

    /// Terminal status reached and committed.
    pub fn log_finished(&self, status: VideoStatus, elapsed: Duration) {
        info!(
            video_id = %self.video_id,
            operation = self.operation,
            status = %status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Processing finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_keeps_context() {
        let logger = JobLogger::new(&VideoId::from("v1"), "frame_archive");

        assert_eq!(logger.video_id(), "v1");
        assert_eq!(logger.operation(), "frame_archive");
        // logging without a subscriber is a no-op
        logger.log_finished(VideoStatus::Done, Duration::from_millis(5));
    }
}
