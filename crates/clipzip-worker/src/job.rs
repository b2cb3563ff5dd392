//! Processing job: one admitted video from PROCESSING to a terminal state.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use clipzip_db::{DbError, StatusStore};
use clipzip_media::{build_archive, frame_entries, FrameExtractor};
use clipzip_models::{OutcomeNotification, User, Video, VideoId, VideoStatus};
use clipzip_queue::NotificationPublisher;
use clipzip_storage::{ObjectStore, StorageError};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::logging::JobLogger;
use crate::metrics;
use crate::retry::{retry_async, retry_async_if, RetryConfig, RetryResult};

/// Key prefix archives are written under.
pub const ARCHIVE_PREFIX: &str = "zip";

pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Object key for the archive of `source_path`.
///
/// Uses the file stem of the source key; falls back to the video id when
/// the key has no usable stem.
pub fn archive_key(source_path: &str, video_id: &VideoId) -> String {
    let stem = Path::new(source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| video_id.to_string());
    format!("{}/{}.zip", ARCHIVE_PREFIX, stem)
}

/// Retry policies for each external call a job makes.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub fetch: RetryConfig,
    pub upload: RetryConfig,
    pub commit: RetryConfig,
    pub publish: RetryConfig,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self::from_config(&WorkerConfig::default())
    }
}

impl JobSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        let policy = |name: &str, retries: u32| {
            RetryConfig::new(name)
                .with_max_retries(retries)
                .with_base_delay(config.retry_base_delay)
        };
        Self {
            fetch: policy("fetch_video", config.fetch_max_retries),
            upload: policy("upload_archive", config.fetch_max_retries),
            commit: policy("commit_status", config.commit_max_retries),
            publish: policy("publish_notification", config.publish_max_retries),
        }
    }
}

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobContext {
    pub objects: Arc<dyn ObjectStore>,
    pub status: Arc<dyn StatusStore>,
    pub notifier: Arc<dyn NotificationPublisher>,
    pub extractor: FrameExtractor,
    pub settings: JobSettings,
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Archive uploaded and the video committed as DONE
    Done { archive_key: String },
    /// Video committed as ERROR
    Failed { reason: String },
    /// The video had already left PROCESSING; nothing was committed or published
    Superseded,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Done { .. } => "done",
            JobOutcome::Failed { .. } => "error",
            JobOutcome::Superseded => "superseded",
        }
    }
}

/// Work for one admitted video.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    video: Video,
    owner: User,
    source_path: String,
}

impl ProcessingJob {
    pub fn new(video: Video, owner: User, source_path: impl Into<String>) -> Self {
        Self {
            video,
            owner,
            source_path: source_path.into(),
        }
    }

    pub fn video_id(&self) -> &VideoId {
        &self.video.video_id
    }

    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Produce the archive, commit the terminal status and notify the owner.
    ///
    /// Returns an error only when the terminal status could not be written;
    /// every other failure is committed as ERROR and reported in the outcome.
    pub async fn run(self, ctx: &JobContext) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(&self.video.video_id, "frame_archive");
        let started = Instant::now();
        logger.log_start(&self.source_path);

        let (target, notification, outcome) = match self.produce_archive(ctx, &logger).await {
            Ok(key) => (
                VideoStatus::Done,
                OutcomeNotification::success(&self.video, &self.owner),
                JobOutcome::Done { archive_key: key },
            ),
            Err(e) => {
                logger.log_error(&format!("{} [{}]", e, e.class()));
                let reason = e.to_string();
                (
                    VideoStatus::Error,
                    OutcomeNotification::failure(&self.video, &self.owner, &reason),
                    JobOutcome::Failed { reason },
                )
            }
        };

        let archive_name = match &outcome {
            JobOutcome::Done { archive_key } => Some(archive_key.as_str()),
            _ => None,
        };

        let committed = match self.commit(ctx, target, archive_name).await {
            Ok(committed) => committed,
            Err(e) => {
                logger.log_error(&format!("Could not commit {} status: {}", target, e));
                return Err(e.into());
            }
        };

        if !committed {
            logger.log_warning(&format!(
                "Video is no longer processing; {} outcome discarded",
                target
            ));
            metrics::record_job_completed(
                JobOutcome::Superseded.as_str(),
                started.elapsed().as_secs_f64(),
            );
            return Ok(JobOutcome::Superseded);
        }

        self.publish(ctx, &notification, &logger).await;

        metrics::record_job_completed(outcome.as_str(), started.elapsed().as_secs_f64());
        logger.log_finished(target, started.elapsed());
        Ok(outcome)
    }

    /// Fetch, sample, pack and upload. Returns the archive key.
    async fn produce_archive(&self, ctx: &JobContext, logger: &JobLogger) -> WorkerResult<String> {
        let bytes = retry_async_if(
            &ctx.settings.fetch,
            || ctx.objects.get(&self.source_path),
            StorageError::is_transient,
        )
        .await
        .into_result()?;
        logger.log_step("fetch", &format!("{} bytes", bytes.len()));

        let frames = ctx.extractor.extract(&bytes).await?;
        drop(bytes);
        let stream = frames.stream();
        logger.log_step(
            "extract",
            &format!(
                "frames {:?} of {} at {:.2} fps",
                frames.ordinals(),
                stream.frame_count,
                stream.fps
            ),
        );

        let archive = build_archive(&frame_entries(frames))?;
        let key = archive_key(&self.source_path, &self.video.video_id);

        retry_async_if(
            &ctx.settings.upload,
            || ctx.objects.put(&key, archive.clone(), ARCHIVE_CONTENT_TYPE),
            StorageError::is_transient,
        )
        .await
        .into_result()?;
        logger.log_step("upload", &format!("{} ({} bytes)", key, archive.len()));

        Ok(key)
    }

    /// Conditional PROCESSING -> `target`. `Ok(false)` when the video had
    /// already moved on.
    async fn commit(
        &self,
        ctx: &JobContext,
        target: VideoStatus,
        archive_name: Option<&str>,
    ) -> Result<bool, DbError> {
        retry_async_if(
            &ctx.settings.commit,
            || {
                ctx.status.transition(
                    &self.video.video_id,
                    VideoStatus::Processing,
                    target,
                    archive_name,
                )
            },
            DbError::is_retryable,
        )
        .await
        .into_result()
    }

    /// Deliver the notification. Exhausted retries are logged, never raised.
    async fn publish(
        &self,
        ctx: &JobContext,
        notification: &OutcomeNotification,
        logger: &JobLogger,
    ) {
        match retry_async(&ctx.settings.publish, || ctx.notifier.publish(notification)).await {
            RetryResult::Success(()) => {
                metrics::record_notification_published(notification.status().as_str());
            }
            RetryResult::Failed { error, attempts } => {
                metrics::record_notification_failed();
                logger.log_warning(&format!(
                    "Notification for {} dropped after {} attempts: {}",
                    self.owner.email, attempts, error
                ));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_archive_key_uses_source_stem() {
        let id = VideoId::from("v1");
        assert_eq!(archive_key("video/test.mp4", &id), "zip/test.zip");
        assert_eq!(archive_key("uploads/2024/clip.final.mov", &id), "zip/clip.final.zip");
        assert_eq!(archive_key("noext", &id), "zip/noext.zip");
    }

    #[test]
    fn test_archive_key_falls_back_to_video_id() {
        let id = VideoId::from("v42");
        assert_eq!(archive_key("", &id), "zip/v42.zip");
        assert_eq!(archive_key("video/", &id), "zip/video.zip");
        assert_eq!(archive_key("/", &id), "zip/v42.zip");
    }

    #[test]
    fn test_settings_from_config() {
        let config = WorkerConfig {
            fetch_max_retries: 5,
            commit_max_retries: 2,
            publish_max_retries: 1,
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let settings = JobSettings::from_config(&config);
        assert_eq!(settings.fetch.max_retries, 5);
        assert_eq!(settings.upload.max_retries, 5);
        assert_eq!(settings.commit.max_retries, 2);
        assert_eq!(settings.publish.max_retries, 1);
        assert_eq!(settings.publish.base_delay, Duration::from_millis(10));
    }
}
