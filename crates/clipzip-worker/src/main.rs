//! Frame-archive worker binary.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipzip_db::{run_migrations, PgStatusStore};
use clipzip_media::{check_ffmpeg, check_ffprobe, FrameExtractor};
use clipzip_queue::{RedisNotifier, RedisTaskQueue};
use clipzip_storage::S3Client;
use clipzip_worker::metrics::init_metrics;
use clipzip_worker::{
    health, AppConfig, Dispatcher, DispatcherConfig, JobContext, JobSettings, WorkerPool,
};

fn init_tracing() -> anyhow::Result<()> {
    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let level = std::env::var("LOG_LEVEL")
        .map(|v| v.to_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    let env_filter =
        EnvFilter::from_default_env().add_directive(format!("clipzip={}", level).parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Flip `shutdown` on Ctrl+C or SIGTERM.
async fn watch_signals(shutdown: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received shutdown signal");
    let _ = shutdown.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    init_tracing()?;

    info!("Starting clipzip-worker");

    let config = AppConfig::from_env()?;
    info!("Worker config: {:?}", config.worker);

    let metrics_handle = if config.health.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(init_metrics()?)
    } else {
        None
    };

    // External tools must be present before any message is taken
    let ffmpeg = check_ffmpeg().context("ffmpeg not available")?;
    let ffprobe = check_ffprobe().context("ffprobe not available")?;
    info!("Using {} and {}", ffmpeg.display(), ffprobe.display());

    tokio::fs::create_dir_all(&config.worker.work_dir)
        .await
        .with_context(|| format!("cannot create {}", config.worker.work_dir.display()))?;

    let storage = S3Client::new(config.storage.clone()).await?;
    if let Err(e) = storage.check_connectivity().await {
        warn!("Object store check failed, continuing: {}", e);
    }

    let status = PgStatusStore::connect(&config.database).await?;
    if config.run_migrations {
        run_migrations(status.pool()).await?;
    }

    let queue = RedisTaskQueue::new(config.queue.clone())?;
    queue.init().await?;
    let notifier = RedisNotifier::new(&config.queue)?;
    info!(
        "Consuming {} as {}/{}, notifying on {}",
        config.queue.events_stream,
        config.queue.consumer_group,
        config.queue.consumer_name,
        notifier.stream()
    );

    let ctx = Arc::new(JobContext {
        objects: Arc::new(storage),
        status: Arc::new(status),
        notifier: Arc::new(notifier),
        extractor: FrameExtractor::ffmpeg(&config.worker.work_dir),
        settings: JobSettings::from_config(&config.worker),
    });

    let pool = Arc::new(WorkerPool::new(
        config.worker.max_workers,
        config.worker.queue_capacity,
    ));
    let dispatcher = Dispatcher::new(
        Arc::new(queue),
        ctx,
        pool,
        DispatcherConfig::from_config(&config.worker),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_server = tokio::spawn(health::serve(
        config.health.clone(),
        metrics_handle,
        shutdown_rx.clone(),
    ));
    tokio::spawn(watch_signals(shutdown_tx));

    let report = dispatcher.run(shutdown_rx).await;
    if report.drained {
        info!("All in-flight jobs finished");
    } else {
        warn!(
            "{} jobs abandoned at shutdown; their messages will be redelivered",
            report.abandoned
        );
    }

    match health_server.await {
        Ok(Err(e)) => error!("Health server error: {}", e),
        Err(e) => error!("Health server task failed: {}", e),
        Ok(Ok(())) => {}
    }

    info!("Worker shutdown complete");
    Ok(())
}
