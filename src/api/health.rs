/// Health check and metrics endpoints
///
/// - `/health`: liveness with version and uptime
/// - `/health/ready`: readiness, checks the database
/// - `/metrics`: Prometheus text exposition

use crate::{context::AppContext, error::ModResult, metrics};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Health status response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Overall status: "ok" or "unavailable"
    pub status: String,
    pub version: String,
    pub uptime_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_ms: Option<u64>,
}

/// Build health check routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/health", get(health_basic))
        .route("/health/ready", get(readiness_probe))
        .route("/metrics", get(metrics_handler))
}

/// Liveness: responds whenever the process is serving
pub async fn health_basic(State(ctx): State<AppContext>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: ctx.started_at.elapsed().as_secs_f64(),
        database_ms: None,
    })
}

/// Readiness: 503 when the database does not answer
pub async fn readiness_probe(
    State(ctx): State<AppContext>,
) -> Result<Json<HealthStatus>, StatusCode> {
    let start = Instant::now();
    if let Err(e) = crate::db::test_connection(ctx.db.pool()).await {
        tracing::warn!(error = %e, "readiness probe failed: database check failed");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: ctx.started_at.elapsed().as_secs_f64(),
        database_ms: Some(start.elapsed().as_millis() as u64),
    }))
}

async fn metrics_handler() -> ModResult<impl IntoResponse> {
    let body = metrics::render_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
