//! PostgreSQL connection lifecycle
//!
//! Turns a static [`DatabaseConfig`](crate::config::DatabaseConfig) into a
//! live pool and keeps watch over it.
//!
//! # Modules
//!
//! - `Manager`: bounded-retry connect, close, reset and transaction begin
//! - `LinearBackoff`: delays between connect attempts
//! - health: liveness probe, readiness wait and capacity thresholds
//! - telemetry: `HealthStatus` and `PoolMetrics` snapshots

mod backoff;
mod health;
mod manager;
mod telemetry;

pub use backoff::{BackoffConfig, LinearBackoff};
pub use health::{MAX_IDLE_RATIO, READY_POLL_INTERVAL};
pub use manager::{
    ConnectionOptions, Manager, ManagerBuilder, DEFAULT_HEALTH_TIMEOUT, DEFAULT_RETRY_TIMEOUT,
};
pub use telemetry::{HealthStatus, PoolMetrics};
