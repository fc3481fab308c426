//! Health and pool metric snapshots derived from the live pool.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::context::Context;
use crate::metrics::HealthMetrics;
use crate::postgres::{PoolProvider, PoolStat};

use super::Manager;

fn duration_ms<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Result of [`Manager::detailed_health`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub message: String,
    #[serde(rename = "latency_ms", serialize_with = "duration_ms")]
    pub latency: Duration,
    /// Connections currently in use
    pub connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
    pub last_checked: DateTime<Utc>,
}

/// Pool counters; all zero while Unconnected.
///
/// The acquire counters cover acquires made through the manager
/// (`acquire`, `with_connection`, transactions and health checks). Queries
/// run straight on `PgHandle::pool()` are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub total_connections: u32,
    pub acquired_connections: u32,
    pub idle_connections: u32,
    pub max_connections: u32,
    #[serde(rename = "total_acquire_count")]
    pub acquire_count: u64,
    #[serde(rename = "total_acquire_time_ms", serialize_with = "duration_ms")]
    pub acquire_duration: Duration,
    pub empty_acquire_count: u64,
    pub canceled_acquire_count: u64,
}

impl From<PoolStat> for PoolMetrics {
    fn from(stat: PoolStat) -> Self {
        Self {
            total_connections: stat.total_conns,
            acquired_connections: stat.acquired_conns,
            idle_connections: stat.idle_conns,
            max_connections: stat.max_conns,
            acquire_count: stat.acquire_count,
            acquire_duration: stat.acquire_duration,
            empty_acquire_count: stat.empty_acquire_count,
            canceled_acquire_count: stat.canceled_acquire_count,
        }
    }
}

impl PoolMetrics {
    /// Mean wait per successful acquire, zero before the first one.
    pub fn average_acquire_time(&self) -> Duration {
        if self.acquire_count == 0 {
            return Duration::ZERO;
        }
        let nanos = self.acquire_duration.as_nanos() / u128::from(self.acquire_count);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}

impl<P: PoolProvider> Manager<P> {
    pub fn metrics(&self) -> PoolMetrics {
        self.stats().map(PoolMetrics::from).unwrap_or_default()
    }

    pub fn average_acquire_time(&self) -> Duration {
        self.metrics().average_acquire_time()
    }

    /// Probe the database and report the outcome with pool utilization.
    /// Never fails; problems are reported through `healthy` and `message`.
    pub async fn detailed_health(&self, ctx: &Context) -> HealthStatus {
        let last_checked = Utc::now();

        let Some(stat) = self.stats() else {
            return HealthStatus {
                healthy: false,
                message: "database pool not initialized".to_string(),
                latency: Duration::ZERO,
                connections: 0,
                idle_connections: 0,
                max_connections: 0,
                last_checked,
            };
        };

        let started = Instant::now();
        let result = self.health(ctx).await;
        let latency = started.elapsed();

        let (healthy, message) = match result {
            Ok(()) => (true, "database is healthy".to_string()),
            Err(error) => (false, format!("health check failed: {}", error)),
        };
        HealthMetrics::record_probe(healthy, latency.as_secs_f64());

        HealthStatus {
            healthy,
            message,
            latency,
            connections: stat.acquired_conns,
            idle_connections: stat.idle_conns,
            max_connections: stat.max_conns,
            last_checked,
        }
    }
}
