//! Prometheus metrics for the connection resilience layer.
//!
//! This module exports:
//! - Pool gauges refreshed from `PoolMetrics` snapshots
//! - Health probe status and latency
//! - Connection attempt, transaction and rollback counters

mod helpers;

pub use helpers::{
    encode_metrics, record_health, record_pool_metrics, ConnectMetrics, HealthMetrics,
    TransactionMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter_vec, register_int_gauge, Gauge,
    Histogram, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "pgres";

lazy_static! {
    // ============================================================================
    // Pool Metrics
    // ============================================================================

    /// Connections currently open in the pool
    pub static ref POOL_TOTAL_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_total_connections", METRIC_PREFIX),
        "Connections currently open in the pool"
    ).unwrap();

    /// Connections currently checked out of the pool
    pub static ref POOL_ACQUIRED_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_acquired_connections", METRIC_PREFIX),
        "Connections currently in use"
    ).unwrap();

    /// Connections idle in the pool
    pub static ref POOL_IDLE_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_idle_connections", METRIC_PREFIX),
        "Connections idle in the pool"
    ).unwrap();

    /// Configured pool capacity
    pub static ref POOL_MAX_CONNECTIONS: IntGauge = register_int_gauge!(
        format!("{}_pool_max_connections", METRIC_PREFIX),
        "Maximum connections the pool may open"
    ).unwrap();

    /// Successful acquires since the pool was created
    pub static ref POOL_ACQUIRE_COUNT: IntGauge = register_int_gauge!(
        format!("{}_pool_acquire_count", METRIC_PREFIX),
        "Successful connection acquires since the pool was created"
    ).unwrap();

    /// Cumulative time spent waiting for connections
    pub static ref POOL_ACQUIRE_DURATION_SECONDS: Gauge = register_gauge!(
        format!("{}_pool_acquire_duration_seconds", METRIC_PREFIX),
        "Cumulative time spent acquiring connections in seconds"
    ).unwrap();

    /// Acquires that had to wait for a new connection
    pub static ref POOL_EMPTY_ACQUIRE_COUNT: IntGauge = register_int_gauge!(
        format!("{}_pool_empty_acquire_count", METRIC_PREFIX),
        "Acquires that found no idle connection"
    ).unwrap();

    /// Acquires abandoned or timed out
    pub static ref POOL_CANCELED_ACQUIRE_COUNT: IntGauge = register_int_gauge!(
        format!("{}_pool_canceled_acquire_count", METRIC_PREFIX),
        "Acquires canceled by the caller or timed out"
    ).unwrap();

    // ============================================================================
    // Health Metrics
    // ============================================================================

    /// Health probe status (1 = healthy, 0 = unhealthy)
    pub static ref HEALTH_STATUS: IntGauge = register_int_gauge!(
        format!("{}_health_status", METRIC_PREFIX),
        "Database health status (1=healthy, 0=unhealthy)"
    ).unwrap();

    /// Latency of the most recent health probe
    pub static ref HEALTH_LATENCY_SECONDS: Gauge = register_gauge!(
        format!("{}_health_latency_seconds", METRIC_PREFIX),
        "Latency of the most recent health probe in seconds"
    ).unwrap();

    /// Health probe latency distribution
    pub static ref HEALTH_PROBE_LATENCY: Histogram = register_histogram!(
        format!("{}_health_probe_latency_seconds", METRIC_PREFIX),
        "Health probe latency in seconds",
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
    ).unwrap();

    /// Health probes by result
    pub static ref HEALTH_CHECKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_health_checks_total", METRIC_PREFIX),
        "Total health probes",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Lifecycle Metrics
    // ============================================================================

    /// Connection attempts by outcome
    pub static ref CONNECT_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connect_attempts_total", METRIC_PREFIX),
        "Total connection attempts",
        &["outcome"]
    ).unwrap();

    /// Managed transactions by terminal outcome
    pub static ref TRANSACTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transactions_total", METRIC_PREFIX),
        "Total managed transactions",
        &["outcome"]
    ).unwrap();

    /// Rollback failures by classification
    pub static ref ROLLBACK_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_rollback_failures_total", METRIC_PREFIX),
        "Total rollback failures",
        &["class"]
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static registers on first access
        POOL_MAX_CONNECTIONS.set(10);

        let result = encode_metrics();
        assert!(result.is_ok());
        let output = result.unwrap();
        assert!(output.contains("pgres_pool_max_connections"));
    }

    #[test]
    fn test_lifecycle_metrics() {
        CONNECT_ATTEMPTS_TOTAL.with_label_values(&["success"]).inc();
        TRANSACTIONS_TOTAL.with_label_values(&["committed"]).inc();
        ROLLBACK_FAILURES_TOTAL.with_label_values(&["expected"]).inc();
        HEALTH_PROBE_LATENCY.observe(0.002);
        // Just verify no panics
    }
}
