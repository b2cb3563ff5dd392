//! Queue dispatcher.
//!
//! Polls the input channel, validates and admits each message, and hands
//! admitted videos to the worker pool. A message is acknowledged when it is
//! dropped as invalid or inadmissible, or when its job reports completion.
//! Anything else stays pending and is redelivered.
//!
//! Pool capacity is reserved before a video is claimed, so a claimed video
//! always has a place to run and shutdown is never stuck behind a full pool.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, Stream, StreamExt};
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

use clipzip_db::StatusStore;
use clipzip_models::{TaskMessage, VideoId, VideoStatus};
use clipzip_queue::{Delivery, TaskQueue};

use crate::config::WorkerConfig;
use crate::error::{ErrorClass, WorkerError, WorkerResult};
use crate::job::{JobContext, ProcessingJob};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pool::{DrainReport, WorkerPool};
use crate::retry::{FailureTracker, RetryConfig};

/// Dispatcher tuning.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Messages requested per receive
    pub batch_size: usize,
    /// Backoff applied while the input channel keeps failing
    pub receive_backoff: RetryConfig,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_timeout: Duration,
}

impl DispatcherConfig {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            batch_size: config.max_workers.max(1),
            receive_backoff: RetryConfig::new("receive_messages")
                .with_max_retries(u32::MAX)
                .with_base_delay(config.retry_base_delay)
                .with_max_delay(config.receive_backoff_max),
            shutdown_timeout: config.shutdown_timeout,
        }
    }
}

/// Sent by a job when it is done with its message.
#[derive(Debug)]
struct Completion {
    receipt: String,
    video_id: VideoId,
    acknowledge: bool,
}

/// Lazy, endless stream of deliveries from `queue`.
///
/// Receive failures are logged and retried with exponential backoff; the
/// backoff resets after the next successful receive. The stream never ends.
pub fn poll_deliveries(
    queue: Arc<dyn TaskQueue>,
    batch_size: usize,
    backoff: RetryConfig,
) -> impl Stream<Item = Delivery> + Send + 'static {
    let state = (queue, FailureTracker::new(3));

    stream::unfold(state, move |(queue, mut failures)| {
        let backoff = backoff.clone();
        async move {
            let mut attempt = 0u32;
            loop {
                match queue.receive(batch_size).await {
                    Ok(batch) => {
                        failures.record_success();
                        return Some((stream::iter(batch), (queue, failures)));
                    }
                    Err(e) => {
                        metrics::record_receive_error();
                        let delay = backoff.delay_for_attempt(attempt);
                        if failures.record_failure() {
                            warn!("Failed to receive messages, retrying in {:?}: {}", delay, e);
                        }
                        attempt = attempt.saturating_add(1);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    })
    .flatten()
}

/// Receipts of messages whose job has been submitted but not completed.
type InFlight = Arc<Mutex<HashSet<String>>>;

/// Feeds admitted videos from the input channel into the worker pool.
pub struct Dispatcher {
    queue: Arc<dyn TaskQueue>,
    ctx: Arc<JobContext>,
    pool: Arc<WorkerPool>,
    config: DispatcherConfig,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        ctx: Arc<JobContext>,
        pool: Arc<WorkerPool>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            queue,
            ctx,
            pool,
            config,
            in_flight: InFlight::default(),
        }
    }

    /// Stream of raw deliveries from the input channel.
    pub fn poll(&self) -> impl Stream<Item = Delivery> + Send + 'static {
        poll_deliveries(
            Arc::clone(&self.queue),
            self.config.batch_size,
            self.config.receive_backoff.clone(),
        )
    }

    /// Dispatch until `shutdown` turns true (or its sender goes away), then
    /// drain the pool and acknowledge whatever finished.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> DrainReport {
        info!(
            "Dispatcher started with {} workers, batch size {}",
            self.pool.width(),
            self.config.batch_size
        );

        let (completions, completed) = mpsc::unbounded_channel();
        let acknowledger = tokio::spawn(acknowledge(
            Arc::clone(&self.queue),
            completed,
            Arc::clone(&self.in_flight),
        ));

        let deliveries = self.poll();
        let mut halt = shutdown.clone();
        tokio::pin!(deliveries);

        loop {
            let stopping = *shutdown.borrow();
            if stopping {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                next = deliveries.next() => match next {
                    Some(delivery) => self.handle(delivery, &completions, &mut halt).await,
                    None => break,
                },
            }
        }

        info!("Dispatcher stopping, draining worker pool");
        let report = self.pool.shutdown(self.config.shutdown_timeout).await;

        drop(completions);
        if let Err(e) = acknowledger.await {
            error!("Acknowledger task failed: {}", e);
        }

        info!(
            "Dispatcher stopped (drained: {}, abandoned: {})",
            report.drained, report.abandoned
        );
        report
    }

    /// Validate, admit and submit one delivery.
    ///
    /// Waits for a pool slot before admission. If `halt` turns true while
    /// waiting, the message is left unacknowledged and the video untouched.
    async fn handle(
        &self,
        delivery: Delivery,
        completions: &mpsc::UnboundedSender<Completion>,
        halt: &mut watch::Receiver<bool>,
    ) {
        metrics::record_message_received();
        let Delivery { receipt, body } = delivery;

        if self.is_in_flight(&receipt) {
            // reclaimed while its job is still running here
            debug!(receipt = %receipt, "Message already in flight, ignoring redelivery");
            return;
        }

        let message = match TaskMessage::parse(&body) {
            Ok(message) => message,
            Err(e) => {
                self.drop_message(&receipt, &WorkerError::from(e)).await;
                return;
            }
        };

        let slot = tokio::select! {
            slot = self.pool.reserve() => slot,
            _ = halt.wait_for(|stopping| *stopping).map(|_| ()) => {
                info!(
                    video_id = %message.video_id,
                    "Shutting down before a worker was free, message left for redelivery"
                );
                return;
            }
        };
        let slot = match slot {
            Ok(slot) => slot,
            Err(e) => {
                error!(
                    video_id = %message.video_id,
                    "Could not reserve a worker, message left for redelivery: {}", e
                );
                return;
            }
        };

        let job = match self.admit(&message).await {
            Ok(job) => job,
            Err(e) if e.class() == ErrorClass::NotFound => {
                self.drop_message(&receipt, &e).await;
                return;
            }
            Err(e) => {
                error!(
                    video_id = %message.video_id,
                    class = %e.class(),
                    "Admission failed, message left for redelivery: {}", e
                );
                return;
            }
        };

        metrics::record_job_admitted();
        let video_id = job.video_id().clone();
        let span = JobLogger::new(&video_id, "frame_archive").create_span();
        let ctx = Arc::clone(&self.ctx);
        let completions = completions.clone();
        let task_video_id = video_id.clone();
        let task_receipt = receipt.clone();

        let task = async move {
            let acknowledge = match AssertUnwindSafe(job.run(&ctx)).catch_unwind().await {
                Ok(Ok(outcome)) => {
                    debug!("Job finished: {}", outcome.as_str());
                    true
                }
                Ok(Err(e)) => {
                    metrics::record_job_failed(e.class().as_str());
                    error!(
                        class = %e.class(),
                        "Job ended without a terminal status, message left for redelivery: {}", e
                    );
                    false
                }
                Err(_) => {
                    metrics::record_job_failed("panic");
                    error!("Job panicked, message left for redelivery");
                    false
                }
            };
            let completion = Completion {
                receipt: task_receipt,
                video_id: task_video_id,
                acknowledge,
            };
            if let Err(unsent) = completions.send(completion) {
                debug!(
                    "Acknowledger gone, message {} left for redelivery",
                    unsent.0.receipt
                );
            }
        }
        .instrument(span);

        self.mark_in_flight(receipt);
        slot.submit(format!("video {}", video_id), task);
    }

    fn is_in_flight(&self, receipt: &str) -> bool {
        self.in_flight
            .lock()
            .map(|receipts| receipts.contains(receipt))
            .unwrap_or(false)
    }

    fn mark_in_flight(&self, receipt: String) {
        if let Ok(mut receipts) = self.in_flight.lock() {
            receipts.insert(receipt);
        }
    }

    /// Look up the video and its owner, then claim it with WAITING -> PROCESSING.
    async fn admit(&self, message: &TaskMessage) -> WorkerResult<ProcessingJob> {
        let status: &dyn StatusStore = self.ctx.status.as_ref();

        let (mut video, owner) = status
            .find_video_with_user(&message.video_id)
            .await?
            .ok_or_else(|| {
                WorkerError::not_found(format!("video {} or its owner", message.video_id))
            })?;

        let admitted = status
            .transition(
                &message.video_id,
                VideoStatus::Waiting,
                VideoStatus::Processing,
                None,
            )
            .await?;
        if !admitted {
            return Err(WorkerError::not_found(format!(
                "video {} is {}, not waiting",
                message.video_id, video.status
            )));
        }

        video.status = VideoStatus::Processing;
        info!(video_id = %message.video_id, "Video admitted for processing");
        Ok(ProcessingJob::new(video, owner, message.path.clone()))
    }

    async fn drop_message(&self, receipt: &str, reason: &WorkerError) {
        warn!(
            receipt = %receipt,
            class = %reason.class(),
            "Dropping message: {}", reason
        );
        metrics::record_message_dropped(reason.class().as_str());
        ack(self.queue.as_ref(), receipt).await;
    }
}

async fn ack(queue: &dyn TaskQueue, receipt: &str) {
    match queue.ack(receipt).await {
        Ok(()) => metrics::record_message_acked(),
        Err(e) => warn!(
            receipt = %receipt,
            "Failed to acknowledge message, it will be redelivered: {}", e
        ),
    }
}

/// Acknowledge messages as their jobs complete. Ends once every sender,
/// including those held by queued jobs, is gone.
async fn acknowledge(
    queue: Arc<dyn TaskQueue>,
    mut completed: mpsc::UnboundedReceiver<Completion>,
    in_flight: InFlight,
) {
    while let Some(completion) = completed.recv().await {
        if completion.acknowledge {
            ack(queue.as_ref(), &completion.receipt).await;
        } else {
            debug!(
                video_id = %completion.video_id,
                "Leaving message {} unacknowledged", completion.receipt
            );
        }
        if let Ok(mut receipts) = in_flight.lock() {
            receipts.remove(&completion.receipt);
        }
    }
}
