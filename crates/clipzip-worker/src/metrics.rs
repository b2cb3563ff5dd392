//! Prometheus metrics for the worker.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{WorkerError, WorkerResult};

/// Install the Prometheus recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> WorkerResult<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().map_err(|e| {
        WorkerError::config_error(format!("Failed to install Prometheus recorder: {}", e))
    })
}

/// Metric names as constants for consistency.
pub mod names {
    // Input channel
    pub const MESSAGES_RECEIVED_TOTAL: &str = "clipzip_messages_received_total";
    pub const MESSAGES_DROPPED_TOTAL: &str = "clipzip_messages_dropped_total";
    pub const MESSAGES_ACKED_TOTAL: &str = "clipzip_messages_acked_total";
    pub const RECEIVE_ERRORS_TOTAL: &str = "clipzip_receive_errors_total";

    // Jobs
    pub const JOBS_ADMITTED_TOTAL: &str = "clipzip_jobs_admitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "clipzip_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "clipzip_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "clipzip_job_duration_seconds";

    // Pool
    pub const POOL_IN_FLIGHT: &str = "clipzip_pool_in_flight";
    pub const POOL_PANICS_TOTAL: &str = "clipzip_pool_panics_total";

    // Notifications
    pub const NOTIFICATIONS_PUBLISHED_TOTAL: &str = "clipzip_notifications_published_total";
    pub const NOTIFICATIONS_FAILED_TOTAL: &str = "clipzip_notifications_failed_total";
}

pub fn record_message_received() {
    counter!(names::MESSAGES_RECEIVED_TOTAL).increment(1);
}

/// Record a message acknowledged without processing.
pub fn record_message_dropped(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::MESSAGES_DROPPED_TOTAL, &labels).increment(1);
}

pub fn record_message_acked() {
    counter!(names::MESSAGES_ACKED_TOTAL).increment(1);
}

pub fn record_receive_error() {
    counter!(names::RECEIVE_ERRORS_TOTAL).increment(1);
}

pub fn record_job_admitted() {
    counter!(names::JOBS_ADMITTED_TOTAL).increment(1);
}

/// Record a job that reached a terminal state (or found one already there).
pub fn record_job_completed(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a job that ended without committing a terminal state.
pub fn record_job_failed(class: &str) {
    let labels = [("class", class.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

pub fn set_pool_in_flight(count: usize) {
    gauge!(names::POOL_IN_FLIGHT).set(count as f64);
}

pub fn record_pool_panic() {
    counter!(names::POOL_PANICS_TOTAL).increment(1);
}

pub fn record_notification_published(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::NOTIFICATIONS_PUBLISHED_TOTAL, &labels).increment(1);
}

pub fn record_notification_failed() {
    counter!(names::NOTIFICATIONS_FAILED_TOTAL).increment(1);
}
