//! Metrics helper functions for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use crate::connection::{HealthStatus, PoolMetrics};

use super::{
    CONNECT_ATTEMPTS_TOTAL, HEALTH_CHECKS_TOTAL, HEALTH_LATENCY_SECONDS, HEALTH_PROBE_LATENCY,
    HEALTH_STATUS, POOL_ACQUIRED_CONNECTIONS, POOL_ACQUIRE_COUNT, POOL_ACQUIRE_DURATION_SECONDS,
    POOL_CANCELED_ACQUIRE_COUNT, POOL_EMPTY_ACQUIRE_COUNT, POOL_IDLE_CONNECTIONS,
    POOL_MAX_CONNECTIONS, POOL_TOTAL_CONNECTIONS, ROLLBACK_FAILURES_TOTAL, TRANSACTIONS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Refresh the pool gauges from a snapshot
pub fn record_pool_metrics(metrics: &PoolMetrics) {
    POOL_TOTAL_CONNECTIONS.set(i64::from(metrics.total_connections));
    POOL_ACQUIRED_CONNECTIONS.set(i64::from(metrics.acquired_connections));
    POOL_IDLE_CONNECTIONS.set(i64::from(metrics.idle_connections));
    POOL_MAX_CONNECTIONS.set(i64::from(metrics.max_connections));
    POOL_ACQUIRE_COUNT.set(saturating_i64(metrics.acquire_count));
    POOL_ACQUIRE_DURATION_SECONDS.set(metrics.acquire_duration.as_secs_f64());
    POOL_EMPTY_ACQUIRE_COUNT.set(saturating_i64(metrics.empty_acquire_count));
    POOL_CANCELED_ACQUIRE_COUNT.set(saturating_i64(metrics.canceled_acquire_count));
}

/// Refresh the health gauges from a detailed health report
pub fn record_health(status: &HealthStatus) {
    HEALTH_STATUS.set(i64::from(status.healthy));
    HEALTH_LATENCY_SECONDS.set(status.latency.as_secs_f64());
}

/// Helper struct for recording connection attempts
pub struct ConnectMetrics;

impl ConnectMetrics {
    /// Record an attempt that produced a live pool
    pub fn record_success() {
        CONNECT_ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
    }

    /// Record a failed create or ping
    pub fn record_failure() {
        CONNECT_ATTEMPTS_TOTAL.with_label_values(&["failure"]).inc();
    }
}

/// Helper struct for recording health probes
pub struct HealthMetrics;

impl HealthMetrics {
    pub fn record_probe(healthy: bool, latency_secs: f64) {
        let result = if healthy { "healthy" } else { "unhealthy" };
        HEALTH_CHECKS_TOTAL.with_label_values(&[result]).inc();
        HEALTH_PROBE_LATENCY.observe(latency_secs);
    }
}

/// Helper struct for recording transaction outcomes
pub struct TransactionMetrics;

impl TransactionMetrics {
    pub fn record_committed() {
        TRANSACTIONS_TOTAL.with_label_values(&["committed"]).inc();
    }

    pub fn record_rolled_back() {
        TRANSACTIONS_TOTAL.with_label_values(&["rolled_back"]).inc();
    }

    pub fn record_begin_failed() {
        TRANSACTIONS_TOTAL.with_label_values(&["begin_failed"]).inc();
    }

    pub fn record_commit_failed() {
        TRANSACTIONS_TOTAL.with_label_values(&["commit_failed"]).inc();
    }

    /// Record a rollback failure that was expected (closed tx, busy conn, cancellation)
    pub fn record_rollback_expected() {
        ROLLBACK_FAILURES_TOTAL.with_label_values(&["expected"]).inc();
    }

    pub fn record_rollback_unexpected() {
        ROLLBACK_FAILURES_TOTAL.with_label_values(&["unexpected"]).inc();
    }
}
