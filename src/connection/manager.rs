use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgConnection;
use sqlx::Postgres;
use tokio::time::Instant;

use crate::config::{DatabaseConfig, Settings};
use crate::context::Context;
use crate::error::{DbError, DriverError, Result};
use crate::metrics::ConnectMetrics;
use crate::observer::{Observer, TracingObserver};
use crate::postgres::{ConnectTarget, PgProvider, PoolProvider, PoolStat, TxOptions};

use super::backoff::LinearBackoff;

/// Default timeout applied to a single health probe.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Default overall budget for the connect retry loop.
pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables fixed at construction time.
#[derive(Clone)]
pub struct ConnectionOptions {
    pub health_timeout: Duration,
    pub retry_timeout: Duration,
    pub observer: Arc<dyn Observer>,
}

impl ConnectionOptions {
    /// Health timeout from `connection`, retry budget from `database`.
    /// Zero values keep the defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut options = Self::default();
        let health_timeout = settings.connection.health_timeout();
        if !health_timeout.is_zero() {
            options.health_timeout = health_timeout;
        }
        let retry_timeout = settings.database.retry_timeout();
        if !retry_timeout.is_zero() {
            options.retry_timeout = retry_timeout;
        }
        options
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            retry_timeout: DEFAULT_RETRY_TIMEOUT,
            observer: Arc::new(TracingObserver),
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("health_timeout", &self.health_timeout)
            .field("retry_timeout", &self.retry_timeout)
            .finish_non_exhaustive()
    }
}

enum ConnectionState<H> {
    Unconnected,
    Connected(H),
}

impl<H> ConnectionState<H> {
    fn take(&mut self) -> Option<H> {
        match std::mem::replace(self, ConnectionState::Unconnected) {
            ConnectionState::Connected(handle) => Some(handle),
            ConnectionState::Unconnected => None,
        }
    }
}

/// Outcome of a single create-and-ping cycle.
enum AttemptError {
    Failed(DriverError),
    Interrupted(DriverError),
}

/// Owns the pool handle and the lifecycle around it.
///
/// A `Manager` starts Unconnected. [`Manager::connect`] runs the bounded
/// retry loop and only stores a handle that answered a ping. The handle is
/// held behind a lock that is never kept across an await point; callers
/// receive clones of it.
pub struct Manager<P: PoolProvider = PgProvider> {
    provider: P,
    config: DatabaseConfig,
    options: ConnectionOptions,
    state: RwLock<ConnectionState<P::Handle>>,
}

impl Manager<PgProvider> {
    /// Builder for a manager backed by sqlx.
    pub fn builder() -> ManagerBuilder<PgProvider> {
        ManagerBuilder::new(PgProvider)
    }

    /// Manager configured from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::builder().settings(settings).build()
    }

    /// Acquire a pooled connection, giving up once `ctx` is done.
    pub async fn acquire(&self, ctx: &Context) -> Result<PoolConnection<Postgres>> {
        let handle = self.handle()?;
        match ctx.run(handle.acquire()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(error)) => Err(DbError::unavailable(
                format!("failed to acquire connection: {}", error),
                Some(DbError::Driver(error)),
            )),
            Err(reason) => Err(DbError::interrupted(reason, "failed to acquire connection")),
        }
    }

    /// Run `work` on a dedicated connection that returns to the pool
    /// afterwards, whatever the outcome.
    pub async fn with_connection<T, F>(&self, ctx: &Context, work: F) -> Result<T>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
    {
        let mut conn = self.acquire(ctx).await?;
        match ctx.run(work(&mut conn)).await {
            Ok(result) => result,
            Err(reason) => Err(DbError::interrupted(reason, "connection work interrupted")),
        }
    }
}

impl<P: PoolProvider> Manager<P> {
    /// Builder for a manager backed by a custom provider.
    pub fn with_provider(provider: P) -> ManagerBuilder<P> {
        ManagerBuilder::new(provider)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn observer(&self) -> &dyn Observer {
        self.options.observer.as_ref()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.read(), ConnectionState::Connected(_))
    }

    /// The live pool handle for raw queries.
    pub fn handle(&self) -> Result<P::Handle> {
        match &*self.state.read() {
            ConnectionState::Connected(handle) => Ok(handle.clone()),
            ConnectionState::Unconnected => Err(DbError::NotConnected),
        }
    }

    /// Provider statistics, `None` while Unconnected.
    pub fn stats(&self) -> Option<PoolStat> {
        let handle = self.handle().ok()?;
        Some(self.provider.stat(&handle))
    }

    /// Establish the pool, retrying with linear backoff until the retry
    /// budget runs out.
    ///
    /// Configuration errors are reported before any network action. A
    /// manager that is already connected swaps in the new pool and closes
    /// the old one.
    #[tracing::instrument(
        name = "db_connect",
        skip(self, ctx),
        fields(host = %self.config.host, port = self.config.port, database = %self.config.database)
    )]
    pub async fn connect(&self, ctx: &Context) -> Result<()> {
        let target = ConnectTarget::from_config(&self.config)?;
        let retry_timeout = self.options.retry_timeout;

        let started = Instant::now();
        let deadline = started + retry_timeout;
        let mut backoff = LinearBackoff::new();
        let mut attempts = 0u32;
        let mut last_error = None;

        while Instant::now() < deadline {
            attempts += 1;

            let error = match self.attempt(ctx, &target).await {
                Ok(handle) => {
                    ConnectMetrics::record_success();
                    self.install(handle).await;
                    self.observer().info(
                        "database connection established",
                        &[
                            ("host", &target.host),
                            ("port", &target.port),
                            ("database", &target.database),
                            ("attempts", &attempts),
                        ],
                    );
                    return Ok(());
                }
                Err(AttemptError::Interrupted(reason)) => {
                    return Err(DbError::interrupted(
                        reason,
                        format!("database connect interrupted after {} attempts", attempts),
                    ));
                }
                Err(AttemptError::Failed(error)) => error,
            };

            ConnectMetrics::record_failure();
            self.observer().warn(
                "connection attempt failed",
                &[("attempt", &attempts), ("error", &error)],
            );
            last_error = Some(error);

            let delay = backoff.next_delay();
            if Instant::now() + delay > deadline {
                break;
            }
            if let Err(reason) = ctx.run(tokio::time::sleep(delay)).await {
                return Err(DbError::interrupted(
                    reason,
                    format!("database connect interrupted after {} attempts", attempts),
                ));
            }
        }

        Err(DbError::Timeout {
            message: format!("failed to connect after {} attempts", attempts),
            attempts,
            elapsed: started.elapsed(),
            source: last_error.map(|e| Box::new(DbError::Driver(e))),
        })
    }

    /// One create-and-ping cycle. A pool that fails its ping, or whose ping
    /// is interrupted, is closed before returning.
    async fn attempt(
        &self,
        ctx: &Context,
        target: &ConnectTarget,
    ) -> std::result::Result<P::Handle, AttemptError> {
        let handle = match ctx.run(self.provider.create(target)).await {
            Ok(Ok(handle)) => handle,
            Ok(Err(error)) => return Err(AttemptError::Failed(error)),
            Err(reason) => return Err(AttemptError::Interrupted(reason)),
        };

        match ctx.run(self.provider.ping(&handle)).await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(error)) => {
                self.provider.close(handle).await;
                Err(AttemptError::Failed(error))
            }
            Err(reason) => {
                self.provider.close(handle).await;
                Err(AttemptError::Interrupted(reason))
            }
        }
    }

    async fn install(&self, handle: P::Handle) {
        let previous = std::mem::replace(
            &mut *self.state.write(),
            ConnectionState::Connected(handle),
        )
        .take();

        if let Some(previous) = previous {
            self.provider.close(previous).await;
            tracing::debug!("replaced existing database pool");
        }
    }

    /// Release the pool if one is held. Safe to call repeatedly.
    pub async fn close(&self) {
        let handle = self.state.write().take();
        if let Some(handle) = handle {
            self.provider.close(handle).await;
            self.observer().info("database connection closed", &[]);
        }
    }

    /// Close the current pool, then connect again.
    pub async fn reset_pool(&self, ctx: &Context) -> Result<()> {
        self.close().await;
        self.connect(ctx).await
    }

    /// Begin a transaction on the live pool.
    pub async fn begin(&self, ctx: &Context, options: TxOptions) -> Result<P::Tx> {
        let handle = self.handle()?;
        match ctx.run(self.provider.begin_tx(&handle, options)).await {
            Ok(Ok(tx)) => Ok(tx),
            Ok(Err(error)) => Err(DbError::transaction_failed(
                "failed to begin transaction",
                error,
            )),
            Err(reason) => Err(DbError::interrupted(reason, "failed to begin transaction")),
        }
    }
}

impl<P: PoolProvider> fmt::Debug for Manager<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("database", &self.config.database)
            .field("options", &self.options)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Builder for [`Manager`]. Performs no network action.
pub struct ManagerBuilder<P: PoolProvider> {
    provider: P,
    config: Option<DatabaseConfig>,
    options: Option<ConnectionOptions>,
    observer: Option<Arc<dyn Observer>>,
    health_timeout: Option<Duration>,
    retry_timeout: Option<Duration>,
}

impl<P: PoolProvider> ManagerBuilder<P> {
    fn new(provider: P) -> Self {
        Self {
            provider,
            config: None,
            options: None,
            observer: None,
            health_timeout: None,
            retry_timeout: None,
        }
    }

    pub fn config(mut self, config: DatabaseConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Database config and options taken from one [`Settings`] value.
    pub fn settings(self, settings: &Settings) -> Self {
        self.config(settings.database.clone())
            .options(ConnectionOptions::from_settings(settings))
    }

    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = Some(timeout);
        self
    }

    pub fn retry_timeout(mut self, timeout: Duration) -> Self {
        self.retry_timeout = Some(timeout);
        self
    }

    /// Without explicit options, a non-zero `retry_timeout_seconds` from the
    /// database config seeds the retry budget. Per-field overrides win.
    pub fn build(self) -> Result<Manager<P>> {
        let config = self
            .config
            .ok_or_else(|| DbError::invalid_config("config", "database config cannot be empty"))?;

        let mut options = match self.options {
            Some(options) => options,
            None => {
                let mut options = ConnectionOptions::default();
                if !config.retry_timeout().is_zero() {
                    options.retry_timeout = config.retry_timeout();
                }
                options
            }
        };
        if let Some(observer) = self.observer {
            options.observer = observer;
        }
        if let Some(timeout) = self.health_timeout {
            options.health_timeout = timeout;
        }
        if let Some(timeout) = self.retry_timeout {
            options.retry_timeout = timeout;
        }

        Ok(Manager {
            provider: self.provider,
            config,
            options,
            state: RwLock::new(ConnectionState::Unconnected),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::observer::{Level, MemoryObserver};
    use crate::postgres::MemoryProvider;

    fn config() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            database: "testdb".to_string(),
            user: "testuser".to_string(),
            password: "testpass".to_string(),
            ssl_mode: "disable".to_string(),
            ..DatabaseConfig::default()
        }
    }

    fn manager(provider: &MemoryProvider, observer: &Arc<MemoryObserver>) -> Manager<MemoryProvider> {
        Manager::with_provider(provider.clone())
            .config(config())
            .observer(observer.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_config() {
        let err = Manager::with_provider(MemoryProvider::new()).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_build_defaults_and_overrides() {
        let manager = Manager::with_provider(MemoryProvider::new())
            .config(config())
            .build()
            .unwrap();
        assert_eq!(manager.options().health_timeout, Duration::from_secs(5));
        assert_eq!(manager.options().retry_timeout, Duration::from_secs(30));
        assert!(!manager.is_connected());

        let manager = Manager::with_provider(MemoryProvider::new())
            .config(config())
            .health_timeout(Duration::from_secs(10))
            .retry_timeout(Duration::from_secs(45))
            .build()
            .unwrap();
        assert_eq!(manager.options().health_timeout, Duration::from_secs(10));
        assert_eq!(manager.options().retry_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_options_from_settings() {
        let mut settings = Settings::default();
        settings.connection.health_timeout_seconds = 2;
        settings.database.retry_timeout_seconds = 60;
        let options = ConnectionOptions::from_settings(&settings);
        assert_eq!(options.health_timeout, Duration::from_secs(2));
        assert_eq!(options.retry_timeout, Duration::from_secs(60));

        settings.connection.health_timeout_seconds = 0;
        settings.database.retry_timeout_seconds = 0;
        let options = ConnectionOptions::from_settings(&settings);
        assert_eq!(options.health_timeout, DEFAULT_HEALTH_TIMEOUT);
        assert_eq!(options.retry_timeout, DEFAULT_RETRY_TIMEOUT);
    }

    #[test]
    fn test_from_settings_uses_configured_retry_budget() {
        let settings: Settings = ::config::Config::builder()
            .set_override("database.host", "db.internal")
            .unwrap()
            .set_override("database.retry_timeout_seconds", 12)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        let manager = Manager::from_settings(&settings).unwrap();
        assert_eq!(manager.options().retry_timeout, Duration::from_secs(12));
        assert_eq!(manager.options().health_timeout, DEFAULT_HEALTH_TIMEOUT);
        assert_eq!(manager.config().host, "db.internal");
    }

    #[tokio::test]
    async fn test_connect_success_logs_attempts() {
        let provider = MemoryProvider::new();
        let observer = Arc::new(MemoryObserver::new());
        let manager = manager(&provider, &observer);

        manager.connect(&Context::background()).await.unwrap();

        assert!(manager.is_connected());
        assert!(manager.handle().is_ok());
        let events = observer.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, Level::Info);
        assert_eq!(events[0].message, "database connection established");
        assert_eq!(events[0].field("host"), Some("db.internal"));
        assert_eq!(events[0].field("attempts"), Some("1"));
    }

    #[tokio::test]
    async fn test_invalid_pool_size_rejected_before_network() {
        let provider = MemoryProvider::new();
        let observer = Arc::new(MemoryObserver::new());
        for max_conns in [-1, i64::from(i32::MAX) + 1] {
            let manager = Manager::with_provider(provider.clone())
                .config(DatabaseConfig {
                    max_conns,
                    ..config()
                })
                .observer(observer.clone())
                .build()
                .unwrap();

            let err = manager.connect(&Context::background()).await.unwrap_err();
            assert!(matches!(err, DbError::InvalidConfig { field: "max_conns", .. }));
        }
        assert_eq!(provider.creates(), 0);
        assert!(observer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_ping_closes_pool_before_retry() {
        let provider = MemoryProvider::new();
        provider.fail_pings(2);
        let observer = Arc::new(MemoryObserver::new());
        let manager = manager(&provider, &observer);

        let started = Instant::now();
        manager.connect(&Context::background()).await.unwrap();

        // 1s then 2s of backoff
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(provider.creates(), 3);
        assert_eq!(provider.closes(), 2);
        assert_eq!(provider.open_handles(), 1);
        assert_eq!(observer.count(Level::Warn), 2);
        assert_eq!(observer.events()[2].field("attempts"), Some("3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_target_times_out() {
        let provider = MemoryProvider::new();
        provider.always_fail_creates();
        let observer = Arc::new(MemoryObserver::new());
        let manager = manager(&provider, &observer);

        let started = Instant::now();
        let err = manager.connect(&Context::background()).await.unwrap_err();
        let elapsed = started.elapsed();

        // Sleeps of 1..=7s fit in 30s; the 8th would overshoot.
        match &err {
            DbError::Timeout {
                message, attempts, ..
            } => {
                assert_eq!(*attempts, 8);
                assert_eq!(message, "failed to connect after 8 attempts");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(err.cause().is_some());
        assert_eq!(elapsed, Duration::from_secs(28));
        assert!(!manager.is_connected());
        assert_eq!(provider.open_handles(), 0);
        assert_eq!(observer.count(Level::Warn), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_retry_budget_stops_without_sleeping() {
        let provider = MemoryProvider::new();
        provider.always_fail_creates();
        let manager = Manager::with_provider(provider.clone())
            .config(config())
            .observer(Arc::new(MemoryObserver::new()))
            .retry_timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        let started = Instant::now();
        let err = manager.connect(&Context::background()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(provider.creates(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_backoff() {
        let provider = MemoryProvider::new();
        provider.always_fail_creates();
        let manager = manager(&provider, &Arc::new(MemoryObserver::new()));

        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = manager.connect(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Canceled);
        assert!(err.is_canceled());
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        assert_eq!(provider.creates(), 2);
        assert!(!manager.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_deadline_yields_timeout() {
        let provider = MemoryProvider::new();
        provider.always_fail_creates();
        let manager = manager(&provider, &Arc::new(MemoryObserver::new()));

        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        let err = manager.connect(&ctx).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.is_deadline_exceeded());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let provider = MemoryProvider::new();
        let observer = Arc::new(MemoryObserver::new());
        let manager = manager(&provider, &observer);

        manager.close().await;
        manager.connect(&Context::background()).await.unwrap();
        manager.close().await;
        manager.close().await;

        assert!(matches!(manager.handle(), Err(DbError::NotConnected)));
        assert!(manager.stats().is_none());
        assert_eq!(provider.closes(), 1);
        let closed = observer
            .events()
            .iter()
            .filter(|e| e.message == "database connection closed")
            .count();
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_closes_old_pool() {
        let provider = MemoryProvider::new();
        let manager = manager(&provider, &Arc::new(MemoryObserver::new()));
        let ctx = Context::background();

        manager.connect(&ctx).await.unwrap();
        let first = manager.handle().unwrap();
        manager.connect(&ctx).await.unwrap();
        let second = manager.handle().unwrap();

        assert_ne!(first, second);
        assert_eq!(provider.closes(), 1);
        assert_eq!(provider.open_handles(), 1);

        manager.reset_pool(&ctx).await.unwrap();
        assert_ne!(manager.handle().unwrap(), second);
        assert_eq!(provider.open_handles(), 1);
    }

    #[tokio::test]
    async fn test_begin_requires_connection() {
        let provider = MemoryProvider::new();
        let manager = manager(&provider, &Arc::new(MemoryObserver::new()));
        let ctx = Context::background();

        let err = manager.begin(&ctx, TxOptions::default()).await.unwrap_err();
        assert!(matches!(err, DbError::NotConnected));

        manager.connect(&ctx).await.unwrap();
        provider.fail_begin(crate::postgres::ScriptedFailure::message("too many clients"));
        let err = manager.begin(&ctx, TxOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransactionFailed);
        assert_eq!(err.to_string(), "failed to begin transaction");
    }
}
