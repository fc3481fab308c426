//! Contract between the connection manager and the pooled-connection
//! provider that owns the actual database connections.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DriverError;

use super::ConnectTarget;

/// Live pool statistics reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStat {
    pub total_conns: u32,
    pub acquired_conns: u32,
    pub idle_conns: u32,
    pub max_conns: u32,
    /// Successful acquires since the pool was created
    pub acquire_count: u64,
    /// Cumulative time spent waiting in successful acquires
    pub acquire_duration: Duration,
    /// Successful acquires that found no idle connection
    pub empty_acquire_count: u64,
    /// Acquires abandoned by the caller or timed out
    pub canceled_acquire_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    ReadOnly,
}

impl AccessMode {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AccessMode::ReadWrite => "READ WRITE",
            AccessMode::ReadOnly => "READ ONLY",
        }
    }
}

/// Options applied when a transaction begins. The default leaves the
/// server defaults untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: Option<IsolationLevel>,
    pub access_mode: Option<AccessMode>,
}

impl TxOptions {
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = Some(AccessMode::ReadOnly);
        self
    }

    /// `SET TRANSACTION` statement for these options, if any apply.
    pub fn set_transaction_sql(&self) -> Option<String> {
        let mut modes = Vec::with_capacity(2);
        if let Some(level) = self.isolation {
            modes.push(format!("ISOLATION LEVEL {}", level.as_sql()));
        }
        if let Some(mode) = self.access_mode {
            modes.push(mode.as_sql().to_string());
        }
        (!modes.is_empty()).then(|| format!("SET TRANSACTION {}", modes.join(" ")))
    }
}

impl fmt::Display for TxOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.set_transaction_sql() {
            Some(sql) => f.write_str(&sql),
            None => f.write_str("default"),
        }
    }
}

/// The minimal surface needed to roll a transaction back.
#[async_trait]
pub trait TransactionRollback: Send {
    async fn rollback(&mut self) -> Result<(), DriverError>;
}

/// An open transaction. After the first successful or failed terminal call,
/// further calls report [`DriverError::TxClosed`].
#[async_trait]
pub trait Transaction: TransactionRollback {
    async fn commit(&mut self) -> Result<(), DriverError>;
}

/// A pooled-connection provider.
#[async_trait]
pub trait PoolProvider: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;
    type Tx: Transaction + 'static;

    /// Create a pool for `target`.
    async fn create(&self, target: &ConnectTarget) -> Result<Self::Handle, DriverError>;

    /// Verify a freshly created pool can reach the server.
    async fn ping(&self, handle: &Self::Handle) -> Result<(), DriverError>;

    /// Run the `SELECT 1` liveness query and return its value.
    async fn probe(&self, handle: &Self::Handle) -> Result<i32, DriverError>;

    async fn close(&self, handle: Self::Handle);

    fn stat(&self, handle: &Self::Handle) -> PoolStat;

    async fn begin_tx(
        &self,
        handle: &Self::Handle,
        options: TxOptions,
    ) -> Result<Self::Tx, DriverError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_issue_no_statement() {
        assert_eq!(TxOptions::default().set_transaction_sql(), None);
        assert_eq!(TxOptions::default().to_string(), "default");
    }

    #[test]
    fn test_set_transaction_sql() {
        let options = TxOptions::default()
            .isolation(IsolationLevel::Serializable)
            .read_only();
        assert_eq!(
            options.set_transaction_sql().as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE READ ONLY")
        );

        let options = TxOptions::default().isolation(IsolationLevel::RepeatableRead);
        assert_eq!(
            options.set_transaction_sql().as_deref(),
            Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
        );
    }
}
