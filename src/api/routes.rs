use axum::{routing::get, Router};

use crate::postgres::PoolProvider;
use crate::server::AppState;

use super::health::{health, ready, stats};
use super::metrics::prometheus_metrics;

pub fn api_routes<P: PoolProvider>() -> Router<AppState<P>> {
    Router::new()
        // Health & Stats
        .route("/health", get(health::<P>))
        .route("/health/ready", get(ready::<P>))
        .route("/stats", get(stats::<P>))
        // Prometheus
        .route("/metrics", get(prometheus_metrics::<P>))
}
