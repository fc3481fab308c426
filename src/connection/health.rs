//! Liveness probing and pool capacity checks

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::context::Context;
use crate::error::{DbError, DriverError, Result};
use crate::postgres::PoolProvider;

use super::Manager;

/// Interval between readiness polls.
pub const READY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Idle share of the pool above which capacity counts as degraded.
pub const MAX_IDLE_RATIO: f64 = 0.9;

impl<P: PoolProvider> Manager<P> {
    /// Run the liveness query under `min(health_timeout, ctx remaining)`.
    pub async fn health(&self, ctx: &Context) -> Result<()> {
        let handle = self.handle()?;
        let probe_ctx = ctx.with_timeout(self.options().health_timeout);

        match probe_ctx.run(self.provider().probe(&handle)).await {
            Ok(Ok(1)) => Ok(()),
            Ok(Ok(_)) => Err(DbError::unavailable("unexpected health check result", None)),
            Ok(Err(error)) => Err(probe_failed(error)),
            Err(DriverError::Canceled) => Err(DbError::interrupted(
                DriverError::Canceled,
                "health check canceled",
            )),
            Err(reason) => Err(probe_failed(reason)),
        }
    }

    pub async fn is_healthy(&self, ctx: &Context) -> bool {
        self.health(ctx).await.is_ok()
    }

    /// Poll [`Manager::health`] once per second until it succeeds or
    /// `timeout` passes. The first poll happens one interval after the call.
    pub async fn wait_for_ready(&self, ctx: &Context, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        let deadline = started + timeout;
        let mut ticker = tokio::time::interval_at(started + READY_POLL_INTERVAL, READY_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut polls = 0u32;
        let mut last_error = None;

        loop {
            if let Err(reason) = ctx.run(ticker.tick()).await {
                return Err(DbError::interrupted(
                    reason,
                    "interrupted while waiting for database to be ready",
                ));
            }

            if Instant::now() >= deadline {
                return Err(DbError::Timeout {
                    message: "timeout waiting for database to be ready".to_string(),
                    attempts: polls,
                    elapsed: started.elapsed(),
                    source: last_error.map(Box::new),
                });
            }

            polls += 1;
            match self.health(ctx).await {
                Ok(()) => {
                    tracing::debug!(polls, "database ready");
                    return Ok(());
                }
                Err(error) if error.is_canceled() && ctx.err().is_some() => return Err(error),
                Err(error) => {
                    tracing::debug!(polls, error = %error, "database not ready yet");
                    last_error = Some(error);
                }
            }
        }
    }

    /// Verify the pool is within healthy utilization thresholds.
    pub fn check_connections(&self) -> Result<()> {
        let stat = self.stats().ok_or(DbError::NotConnected)?;

        if stat.acquired_conns >= stat.max_conns {
            return Err(DbError::ResourceExhausted {
                acquired: stat.acquired_conns,
                max: stat.max_conns,
            });
        }

        let idle_ratio = f64::from(stat.idle_conns) / f64::from(stat.max_conns);
        if idle_ratio > MAX_IDLE_RATIO {
            return Err(DbError::DegradedCapacity { idle_ratio });
        }

        Ok(())
    }
}

fn probe_failed(error: DriverError) -> DbError {
    DbError::unavailable(
        format!("health check failed: {}", error),
        Some(DbError::Driver(error)),
    )
}
