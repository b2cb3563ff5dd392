//! Frame-archive worker.
//!
//! This crate provides:
//! - Queue dispatcher with admission and acknowledgement
//! - Bounded worker pool with graceful drain
//! - The processing job: fetch, sample, pack, upload, commit, notify
//! - Health and Prometheus metrics endpoints

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod retry;

pub use config::{AppConfig, HealthConfig, WorkerConfig};
pub use dispatcher::{poll_deliveries, Dispatcher, DispatcherConfig};
pub use error::{ErrorClass, WorkerError, WorkerResult};
pub use job::{archive_key, JobContext, JobOutcome, JobSettings, ProcessingJob};
pub use logging::JobLogger;
pub use pool::{DrainReport, PoolSlot, WorkerPool};
pub use retry::{retry_async, retry_async_if, FailureTracker, RetryConfig, RetryResult};
