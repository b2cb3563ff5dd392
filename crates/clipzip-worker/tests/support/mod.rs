//! In-memory collaborators for driving the dispatcher end to end.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;

use clipzip_db::{DbError, DbResult, StatusStore};
use clipzip_media::{FrameExtractor, MediaError, MediaResult, StreamInfo, VideoDecoder};
use clipzip_models::{OutcomeNotification, TaskMessage, User, Video, VideoId, VideoStatus};
use clipzip_queue::{Delivery, NotificationPublisher, QueueError, QueueResult, TaskQueue};
use clipzip_storage::{ObjectStore, StorageError, StorageResult};
use clipzip_worker::{
    Dispatcher, DispatcherConfig, DrainReport, JobContext, JobSettings, RetryConfig, WorkerPool,
};

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    puts: Mutex<Vec<String>>,
    transient_get_failures: AtomicU32,
    gets: AtomicU32,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn insert(&self, key: &str, data: impl Into<Vec<u8>>) {
        self.objects.lock().unwrap().insert(key.to_string(), data.into());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Keys written, in write order.
    pub fn puts(&self) -> Vec<String> {
        self.puts.lock().unwrap().clone()
    }

    /// Fail the next `n` reads with a transient error.
    pub fn fail_next_gets(&self, n: u32) {
        self.transient_get_failures.store(n, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> u32 {
        self.gets.load(Ordering::SeqCst)
    }

    /// Fail every write with a transient error.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self
            .transient_get_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::download_failed("connection reset by peer"));
        }
        self.object(key)
            .ok_or_else(|| StorageError::not_found(key))
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StorageError::upload_failed("service unavailable"));
        }
        self.puts.lock().unwrap().push(key.to_string());
        self.objects.lock().unwrap().insert(key.to_string(), data);
        Ok(())
    }
}

// ============================================================================
// Status store
// ============================================================================

#[derive(Default)]
pub struct MemoryStatusStore {
    videos: Mutex<HashMap<String, Video>>,
    users: Mutex<HashMap<String, User>>,
    history: Mutex<Vec<(String, VideoStatus, VideoStatus)>>,
    fail_terminal_writes: AtomicBool,
    fail_lookups: AtomicBool,
}

impl MemoryStatusStore {
    pub fn insert(&self, video: Video, owner: User) {
        self.users.lock().unwrap().insert(owner.user_id.clone(), owner);
        self.videos
            .lock()
            .unwrap()
            .insert(video.video_id.to_string(), video);
    }

    pub fn status(&self, video_id: &str) -> Option<VideoStatus> {
        self.videos.lock().unwrap().get(video_id).map(|v| v.status)
    }

    pub fn archive_name(&self, video_id: &str) -> Option<String> {
        self.videos
            .lock()
            .unwrap()
            .get(video_id)
            .and_then(|v| v.archive_name.clone())
    }

    /// Transitions applied to `video_id`, oldest first.
    pub fn history(&self, video_id: &str) -> Vec<(VideoStatus, VideoStatus)> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == video_id)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    pub fn fail_terminal_writes(&self, fail: bool) {
        self.fail_terminal_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn find_video_with_user(&self, video_id: &VideoId) -> DbResult<Option<(Video, User)>> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(DbError::config("database unavailable"));
        }
        let video = self.videos.lock().unwrap().get(video_id.as_str()).cloned();
        Ok(video.and_then(|video| {
            let owner = self.users.lock().unwrap().get(&video.owner_id).cloned();
            owner.map(|owner| (video, owner))
        }))
    }

    async fn transition(
        &self,
        video_id: &VideoId,
        from: VideoStatus,
        to: VideoStatus,
        archive_name: Option<&str>,
    ) -> DbResult<bool> {
        if !from.can_transition_to(to) {
            return Err(DbError::InvalidTransition { from, to });
        }
        if to.is_terminal() && self.fail_terminal_writes.load(Ordering::SeqCst) {
            return Err(DbError::config("database unavailable"));
        }

        let mut videos = self.videos.lock().unwrap();
        let Some(video) = videos.get_mut(video_id.as_str()) else {
            return Ok(false);
        };
        if video.status != from {
            return Ok(false);
        }

        video.status = to;
        if let Some(name) = archive_name {
            video.archive_name = Some(name.to_string());
        }
        self.history
            .lock()
            .unwrap()
            .push((video_id.to_string(), from, to));
        Ok(true)
    }
}

// ============================================================================
// Input queue
// ============================================================================

/// FIFO queue; a delivery is handed out once and only acked deliveries are
/// recorded.
#[derive(Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<Delivery>>,
    acked: Mutex<Vec<String>>,
    next_id: AtomicU64,
    arrived: Notify,
}

impl MemoryQueue {
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) -> String {
        let receipt = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.pending
            .lock()
            .unwrap()
            .push_back(Delivery::new(receipt.clone(), body));
        self.arrived.notify_one();
        receipt
    }

    pub fn push(&self, message: &TaskMessage) -> String {
        self.push_raw(message.to_json().unwrap())
    }

    /// Hand out an unacknowledged delivery again under the same receipt,
    /// the way a reclaimed stream entry comes back.
    pub fn redeliver(&self, receipt: &str, message: &TaskMessage) {
        self.pending
            .lock()
            .unwrap()
            .push_back(Delivery::new(receipt.to_string(), message.to_json().unwrap()));
        self.arrived.notify_one();
    }

    pub fn is_acked(&self, receipt: &str) -> bool {
        self.acked.lock().unwrap().iter().any(|r| r == receipt)
    }

    pub fn acked(&self) -> Vec<String> {
        self.acked.lock().unwrap().clone()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    fn take(&self, max: usize) -> Vec<Delivery> {
        let mut pending = self.pending.lock().unwrap();
        let n = max.min(pending.len());
        pending.drain(..n).collect()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn receive(&self, max: usize) -> QueueResult<Vec<Delivery>> {
        let batch = self.take(max);
        if !batch.is_empty() {
            return Ok(batch);
        }
        let _ = tokio::time::timeout(Duration::from_millis(20), self.arrived.notified()).await;
        Ok(self.take(max))
    }

    async fn ack(&self, receipt: &str) -> QueueResult<()> {
        self.acked.lock().unwrap().push(receipt.to_string());
        Ok(())
    }
}

// ============================================================================
// Notifications
// ============================================================================

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<OutcomeNotification>>,
    attempts: AtomicU32,
    always_fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<OutcomeNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn always_fail(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationPublisher for RecordingNotifier {
    async fn publish(&self, notification: &OutcomeNotification) -> QueueResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(QueueError::publish_failed("stream unavailable"));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

// ============================================================================
// Decoder
// ============================================================================

/// Treats the staged file as a script: `frames:N` reports N frames, and
/// each decoded frame is `<file content>#<ordinal>`.
#[derive(Default)]
pub struct FakeDecoder {
    gate: Mutex<Option<Arc<Semaphore>>>,
    entered: AtomicU32,
}

impl FakeDecoder {
    /// Hold every stream lookup until the returned semaphore gets permits.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Jobs that reached the decoder, including those held at the gate.
    pub fn entered(&self) -> u32 {
        self.entered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VideoDecoder for FakeDecoder {
    async fn stream_info(&self, source: &Path) -> MediaResult<StreamInfo> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _permit = gate.acquire().await;
        }

        let content = tokio::fs::read_to_string(source).await?;
        let frame_count = content
            .trim()
            .strip_prefix("frames:")
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(|| MediaError::invalid_video("not a video"))?;

        Ok(StreamInfo {
            frame_count,
            fps: 30.0,
        })
    }

    async fn decode_frame(
        &self,
        source: &Path,
        _stream: &StreamInfo,
        ordinal: u64,
    ) -> MediaResult<Vec<u8>> {
        let content = tokio::fs::read_to_string(source).await?;
        Ok(format!("{}#{}", content.trim(), ordinal).into_bytes())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub objects: Arc<MemoryObjectStore>,
    pub status: Arc<MemoryStatusStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub queue: Arc<MemoryQueue>,
    pub decoder: Arc<FakeDecoder>,
    work_dir: tempfile::TempDir,
}

/// A dispatcher running in the background.
pub struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<DrainReport>,
}

impl Running {
    pub async fn stop(self) -> DrainReport {
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap()
    }
}

fn fast_retry(name: &str, retries: u32) -> RetryConfig {
    RetryConfig::new(name)
        .with_max_retries(retries)
        .with_base_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

impl Harness {
    pub fn new() -> Self {
        Self {
            objects: Arc::default(),
            status: Arc::default(),
            notifier: Arc::default(),
            queue: Arc::default(),
            decoder: Arc::default(),
            work_dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn settings() -> JobSettings {
        JobSettings {
            fetch: fast_retry("fetch_video", 3),
            upload: fast_retry("upload_archive", 3),
            commit: fast_retry("commit_status", 2),
            publish: fast_retry("publish_notification", 2),
        }
    }

    pub fn context(&self) -> Arc<JobContext> {
        Arc::new(JobContext {
            objects: self.objects.clone(),
            status: self.status.clone(),
            notifier: self.notifier.clone(),
            extractor: FrameExtractor::new(self.decoder.clone(), self.work_dir.path()),
            settings: Self::settings(),
        })
    }

    /// Register a WAITING video whose source object holds `content`.
    pub fn seed(&self, video_id: &str, path: &str, content: &str) -> TaskMessage {
        let owner = User::new(
            format!("u-{}", video_id),
            "Maria",
            format!("{}@example.com", video_id),
        );
        let video = Video::new(video_id, owner.user_id.clone())
            .with_title(format!("Aula {}", video_id))
            .with_source_path(path);
        self.status.insert(video, owner);
        self.objects.insert(path, content.as_bytes().to_vec());
        TaskMessage::new(video_id, path)
    }

    pub fn start(&self, width: usize, capacity: usize) -> Running {
        self.start_with_timeout(width, capacity, Duration::from_secs(5))
    }

    pub fn start_with_timeout(
        &self,
        width: usize,
        capacity: usize,
        shutdown_timeout: Duration,
    ) -> Running {
        let dispatcher = Dispatcher::new(
            self.queue.clone(),
            self.context(),
            Arc::new(WorkerPool::new(width, capacity)),
            DispatcherConfig {
                batch_size: 1,
                receive_backoff: fast_retry("receive_messages", u32::MAX),
                shutdown_timeout,
            },
        );

        let (shutdown, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { dispatcher.run(rx).await });
        Running { shutdown, handle }
    }
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
