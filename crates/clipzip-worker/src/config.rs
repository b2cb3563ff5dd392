//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use clipzip_db::DatabaseConfig;
use clipzip_queue::QueueConfig;
use clipzip_storage::StorageConfig;

use crate::error::{WorkerError, WorkerResult};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent processing jobs
    pub max_workers: usize,
    /// Jobs that may wait for a free worker before submission blocks
    pub queue_capacity: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for temporary files
    pub work_dir: PathBuf,
    /// Retries for object store reads and writes
    pub fetch_max_retries: u32,
    /// Retries for the terminal status write
    pub commit_max_retries: u32,
    /// Retries for the outcome notification
    pub publish_max_retries: u32,
    /// Base delay for every retry backoff
    pub retry_base_delay: Duration,
    /// Cap on the dispatcher's receive backoff
    pub receive_backoff_max: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            queue_capacity: 3,
            shutdown_timeout: Duration::from_secs(60),
            work_dir: std::env::temp_dir().join("clipzip"),
            fetch_max_retries: 3,
            commit_max_retries: 3,
            publish_max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
            receive_backoff_max: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_workers = env_parse("MAX_WORKERS").unwrap_or(defaults.max_workers);

        Self {
            max_workers,
            queue_capacity: env_parse("WORKER_QUEUE_CAPACITY").unwrap_or(max_workers),
            shutdown_timeout: env_parse("WORKER_SHUTDOWN_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.shutdown_timeout),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            fetch_max_retries: env_parse("FETCH_MAX_RETRIES").unwrap_or(defaults.fetch_max_retries),
            commit_max_retries: env_parse("COMMIT_MAX_RETRIES")
                .unwrap_or(defaults.commit_max_retries),
            publish_max_retries: env_parse("PUBLISH_MAX_RETRIES")
                .unwrap_or(defaults.publish_max_retries),
            retry_base_delay: env_parse("RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            receive_backoff_max: env_parse("RECEIVE_BACKOFF_MAX_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.receive_backoff_max),
        }
    }

    /// Reject values the pool cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.max_workers == 0 {
            return Err(WorkerError::config_error("MAX_WORKERS must be at least 1"));
        }
        if self.queue_capacity == 0 {
            return Err(WorkerError::config_error(
                "WORKER_QUEUE_CAPACITY must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Health/metrics HTTP surface configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Route prefix; the health check is served at `/{app_name}/health`
    pub app_name: String,
    pub host: String,
    pub port: u16,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            app_name: "video-processor".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            metrics_enabled: true,
        }
    }
}

impl HealthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            app_name: std::env::var("APP_NAME")
                .ok()
                .map(|s| s.trim_matches('/').to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.app_name),
            host: std::env::var("HEALTH_HOST").unwrap_or(defaults.host),
            port: env_parse("HEALTH_PORT").unwrap_or(defaults.port),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    pub fn health_path(&self) -> String {
        format!("/{}/health", self.app_name)
    }
}

/// Everything the binary needs, built once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub health: HealthConfig,
    /// Apply bundled migrations before starting
    pub run_migrations: bool,
}

impl AppConfig {
    /// Load and validate configuration from the environment.
    ///
    /// Every problem is reported in one error rather than stopping at the
    /// first missing key.
    pub fn from_env() -> WorkerResult<Self> {
        let mut problems = Vec::new();

        let worker = WorkerConfig::from_env();
        if let Err(e) = worker.validate() {
            problems.push(e.to_string());
        }

        let storage = StorageConfig::from_env().map_err(|e| problems.push(e.to_string()));
        let database = DatabaseConfig::from_env().map_err(|e| problems.push(e.to_string()));

        match (storage, database) {
            (Ok(storage), Ok(database)) if problems.is_empty() => Ok(Self {
                worker,
                queue: QueueConfig::from_env(),
                storage,
                database,
                health: HealthConfig::from_env(),
                run_migrations: std::env::var("DB_RUN_MIGRATIONS")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false),
            }),
            _ => Err(WorkerError::config_error(format!(
                "invalid configuration: {}",
                problems.join("; ")
            ))),
        }
    }
}
