//! Liveness and metrics HTTP surface.

use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use crate::config::HealthConfig;
use crate::error::{WorkerError, WorkerResult};

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
}

/// Liveness check. Answers as long as the process is up.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "video-processor".to_string(),
    })
}

/// Health route under the configured prefix, plus `/metrics` when a
/// Prometheus handle is given.
pub fn router(config: &HealthConfig, metrics_handle: Option<PrometheusHandle>) -> Router {
    let health_routes = Router::new().route(&config.health_path(), get(health));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new().merge(health_routes).merge(metrics_routes)
}

/// Serve until `shutdown` turns true.
pub async fn serve(
    config: HealthConfig,
    metrics_handle: Option<PrometheusHandle>,
    mut shutdown: watch::Receiver<bool>,
) -> WorkerResult<()> {
    let app = router(&config, metrics_handle);
    let addr = format!("{}:{}", config.host, config.port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Health endpoint listening on {}{}", addr, config.health_path());

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stopping| *stopping).await;
        })
        .await
        .map_err(WorkerError::from)
}
