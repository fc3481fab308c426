//! Health, readiness and pool statistics endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::connection::{HealthStatus, PoolMetrics};
use crate::context::Context;
use crate::error::DbError;
use crate::metrics;
use crate::postgres::PoolProvider;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub database: HealthStatus,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ReadinessError>,
}

#[derive(Debug, Serialize)]
pub struct ReadinessError {
    pub kind: &'static str,
    pub message: String,
}

impl From<&DbError> for ReadinessError {
    fn from(error: &DbError) -> Self {
        Self {
            kind: error.kind().as_str(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connected: bool,
    pub pool: PoolMetrics,
    pub average_acquire_time_ms: f64,
}

/// GET /health - probe the database and report pool utilization
pub async fn health<P: PoolProvider>(
    State(state): State<AppState<P>>,
) -> (StatusCode, Json<HealthResponse>) {
    let report = state.manager.detailed_health(&Context::background()).await;
    metrics::record_health(&report);

    let (code, status) = if report.healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
            database: report,
        }),
    )
}

/// GET /health/ready - capacity thresholds, then a live probe
pub async fn ready<P: PoolProvider>(
    State(state): State<AppState<P>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let result = match state.manager.check_connections() {
        Ok(()) => state.manager.health(&Context::background()).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                error: None,
            }),
        ),
        Err(error) => {
            tracing::warn!(kind = error.kind().as_str(), error = %error, "readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    error: Some(ReadinessError::from(&error)),
                }),
            )
        }
    }
}

/// GET /stats - pool counters
///
/// Acquire counts only include acquires made through the manager; raw
/// queries on the sqlx pool do not show up here.
pub async fn stats<P: PoolProvider>(State(state): State<AppState<P>>) -> Json<StatsResponse> {
    let pool = state.manager.metrics();
    metrics::record_pool_metrics(&pool);

    Json(StatsResponse {
        connected: state.manager.is_connected(),
        average_acquire_time_ms: pool.average_acquire_time().as_micros() as f64 / 1000.0,
        pool,
    })
}
