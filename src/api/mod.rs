//! API layer - HTTP probe endpoints over the connection manager.

mod health;
mod metrics;
mod routes;

pub use health::{
    health, ready, stats, HealthResponse, ReadinessError, ReadinessResponse, StatsResponse,
};
pub use metrics::prometheus_metrics;
pub use routes::api_routes;
