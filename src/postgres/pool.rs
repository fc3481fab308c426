//! sqlx-backed pool provider.
//!
//! sqlx does not track acquire statistics, so every acquire made through a
//! [`PgHandle`] is timed and counted here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool, PgPoolOptions, PgSslMode};
use sqlx::{Connection, Postgres};
use tokio::time::Instant;

use crate::error::DriverError;

use super::provider::{PoolProvider, PoolStat, Transaction, TransactionRollback, TxOptions};
use super::{ConnectTarget, SslMode};

/// Cumulative acquire counters shared by every clone of a handle.
#[derive(Debug, Default)]
struct AcquireStats {
    count: AtomicU64,
    duration_nanos: AtomicU64,
    empty: AtomicU64,
    canceled: AtomicU64,
}

/// An acquire in flight. Dropping it unsettled counts as a cancellation.
struct PendingAcquire<'a> {
    stats: &'a AcquireStats,
    started: Instant,
    empty: bool,
    settled: bool,
}

impl<'a> PendingAcquire<'a> {
    fn start(stats: &'a AcquireStats, empty: bool) -> Self {
        Self {
            stats,
            started: Instant::now(),
            empty,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        let waited = self.started.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
        self.stats.count.fetch_add(1, Ordering::Relaxed);
        self.stats.duration_nanos.fetch_add(waited, Ordering::Relaxed);
        if self.empty {
            self.stats.empty.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn failed(mut self, error: &sqlx::Error) {
        self.settled = true;
        if matches!(error, sqlx::Error::PoolTimedOut) {
            self.stats.canceled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.stats.canceled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A live sqlx pool plus its acquire statistics.
#[derive(Debug, Clone)]
pub struct PgHandle {
    pool: PgPool,
    max_conns: u32,
    stats: Arc<AcquireStats>,
}

impl PgHandle {
    /// The underlying sqlx pool for queries, COPY and batches.
    ///
    /// Acquires made directly on the pool bypass the acquire statistics;
    /// prefer [`PgHandle::acquire`] when those matter.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Acquire a connection, recording wait time and outcome.
    pub async fn acquire(&self) -> Result<PoolConnection<Postgres>, DriverError> {
        let pending = PendingAcquire::start(&self.stats, self.pool.num_idle() == 0);
        match self.pool.acquire().await {
            Ok(conn) => {
                pending.succeeded();
                Ok(conn)
            }
            Err(e) => {
                pending.failed(&e);
                Err(DriverError::Sqlx(e))
            }
        }
    }

    pub fn stat(&self) -> PoolStat {
        let total_conns = self.pool.size();
        let idle_conns = u32::try_from(self.pool.num_idle()).unwrap_or(u32::MAX);
        PoolStat {
            total_conns,
            acquired_conns: total_conns.saturating_sub(idle_conns),
            idle_conns,
            max_conns: self.max_conns,
            acquire_count: self.stats.count.load(Ordering::Relaxed),
            acquire_duration: Duration::from_nanos(self.stats.duration_nanos.load(Ordering::Relaxed)),
            empty_acquire_count: self.stats.empty.load(Ordering::Relaxed),
            canceled_acquire_count: self.stats.canceled.load(Ordering::Relaxed),
        }
    }
}

/// An open sqlx transaction. Dropping it while open rolls it back.
pub struct PgTx {
    inner: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PgTx {
    /// Connection to run statements on, or `TxClosed` once terminated.
    pub fn connection(&mut self) -> Result<&mut PgConnection, DriverError> {
        self.inner.as_deref_mut().ok_or(DriverError::TxClosed)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

impl std::fmt::Debug for PgTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTx").field("open", &self.is_open()).finish()
    }
}

#[async_trait]
impl TransactionRollback for PgTx {
    async fn rollback(&mut self) -> Result<(), DriverError> {
        let tx = self.inner.take().ok_or(DriverError::TxClosed)?;
        tx.rollback().await.map_err(DriverError::from)
    }
}

#[async_trait]
impl Transaction for PgTx {
    async fn commit(&mut self) -> Result<(), DriverError> {
        let tx = self.inner.take().ok_or(DriverError::TxClosed)?;
        tx.commit().await.map_err(DriverError::from)
    }
}

fn pg_ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Provider backed by `sqlx::PgPool`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgProvider;

#[async_trait]
impl PoolProvider for PgProvider {
    type Handle = PgHandle;
    type Tx = PgTx;

    async fn create(&self, target: &ConnectTarget) -> Result<PgHandle, DriverError> {
        let connect_options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .username(&target.user)
            .password(&target.password)
            .database(&target.database)
            .ssl_mode(pg_ssl_mode(target.ssl_mode));

        // Stale connections are caught by test_before_acquire instead of a
        // periodic background health check.
        let pool = PgPoolOptions::new()
            .max_connections(target.max_conns)
            .min_connections(target.min_conns)
            .max_lifetime(target.max_lifetime)
            .idle_timeout(target.idle_timeout)
            .acquire_timeout(target.connect_timeout)
            .test_before_acquire(true)
            .connect_with(connect_options)
            .await?;

        tracing::debug!(
            max_conns = target.max_conns,
            min_conns = target.min_conns,
            "PostgreSQL connection pool created"
        );

        Ok(PgHandle {
            pool,
            max_conns: target.max_conns,
            stats: Arc::new(AcquireStats::default()),
        })
    }

    async fn ping(&self, handle: &PgHandle) -> Result<(), DriverError> {
        let mut conn = handle.acquire().await?;
        conn.ping().await?;
        Ok(())
    }

    async fn probe(&self, handle: &PgHandle) -> Result<i32, DriverError> {
        let mut conn = handle.acquire().await?;
        let value: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&mut *conn)
            .await?;
        Ok(value)
    }

    async fn close(&self, handle: PgHandle) {
        handle.pool.close().await;
    }

    fn stat(&self, handle: &PgHandle) -> PoolStat {
        handle.stat()
    }

    async fn begin_tx(&self, handle: &PgHandle, options: TxOptions) -> Result<PgTx, DriverError> {
        let pending = PendingAcquire::start(&handle.stats, handle.pool.num_idle() == 0);
        let mut tx = match handle.pool.begin().await {
            Ok(tx) => {
                pending.succeeded();
                tx
            }
            Err(e) => {
                pending.failed(&e);
                return Err(DriverError::Sqlx(e));
            }
        };

        if let Some(sql) = options.set_transaction_sql() {
            // On failure the dropped transaction is rolled back by sqlx.
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        Ok(PgTx { inner: Some(tx) })
    }
}
