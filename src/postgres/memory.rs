//! In-memory provider for exercising the connection manager and the
//! transaction helpers without a database.
//!
//! Failures are scripted up front (e.g. "fail the next two pings") and every
//! lifecycle call is counted so callers can assert on handle hygiene and
//! terminal transaction actions.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::DriverError;

use super::provider::{PoolProvider, PoolStat, Transaction, TransactionRollback, TxOptions};
use super::ConnectTarget;

/// A failure the memory provider can be told to produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFailure {
    TxClosed,
    ConnBusy,
    Canceled,
    DeadlineExceeded,
    Message(String),
}

impl ScriptedFailure {
    pub fn message(message: impl Into<String>) -> Self {
        ScriptedFailure::Message(message.into())
    }

    fn to_error(&self) -> DriverError {
        match self {
            ScriptedFailure::TxClosed => DriverError::TxClosed,
            ScriptedFailure::ConnBusy => DriverError::ConnBusy,
            ScriptedFailure::Canceled => DriverError::Canceled,
            ScriptedFailure::DeadlineExceeded => DriverError::DeadlineExceeded,
            ScriptedFailure::Message(message) => DriverError::Other(message.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    create_failures: u32,
    ping_failures: u32,
    probe_failures: u32,
    probe_value: Option<i32>,
    probe_delay: Duration,
    stat: PoolStat,
    begin_failure: Option<ScriptedFailure>,
    commit_failure: Option<ScriptedFailure>,
    rollback_failure: Option<ScriptedFailure>,
    rollback_stalls: bool,
    last_target: Option<ConnectTarget>,
    last_tx_options: Option<TxOptions>,
}

/// Consume one scripted failure. `u32::MAX` means "always fail".
fn take_failure(remaining: &mut u32) -> bool {
    match *remaining {
        0 => false,
        u32::MAX => true,
        _ => {
            *remaining -= 1;
            true
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU32,
    pings: AtomicU32,
    probes: AtomicU32,
    closes: AtomicU32,
    begins: AtomicU32,
    commits: AtomicU32,
    rollbacks: AtomicU32,
    abandoned: AtomicU32,
}

#[derive(Debug, Default)]
struct Shared {
    script: Mutex<Script>,
    counters: Counters,
    committed: Mutex<Vec<String>>,
    next_handle: AtomicU32,
}

/// Scriptable in-memory [`PoolProvider`]. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvider {
    shared: Arc<Shared>,
}

/// Handle returned by [`MemoryProvider::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryHandle {
    pub id: u32,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` pool creations.
    pub fn fail_creates(&self, count: u32) -> &Self {
        self.shared.script.lock().create_failures = count;
        self
    }

    /// Every pool creation fails, as for an unreachable server.
    pub fn always_fail_creates(&self) -> &Self {
        self.fail_creates(u32::MAX)
    }

    pub fn fail_pings(&self, count: u32) -> &Self {
        self.shared.script.lock().ping_failures = count;
        self
    }

    pub fn fail_probes(&self, count: u32) -> &Self {
        self.shared.script.lock().probe_failures = count;
        self
    }

    pub fn always_fail_probes(&self) -> &Self {
        self.fail_probes(u32::MAX)
    }

    /// Value returned by the liveness query (1 unless overridden).
    pub fn set_probe_value(&self, value: i32) -> &Self {
        self.shared.script.lock().probe_value = Some(value);
        self
    }

    /// Make every liveness query take `delay`.
    pub fn set_probe_delay(&self, delay: Duration) -> &Self {
        self.shared.script.lock().probe_delay = delay;
        self
    }

    pub fn set_stat(&self, stat: PoolStat) -> &Self {
        self.shared.script.lock().stat = stat;
        self
    }

    pub fn fail_begin(&self, failure: ScriptedFailure) -> &Self {
        self.shared.script.lock().begin_failure = Some(failure);
        self
    }

    pub fn fail_commit(&self, failure: ScriptedFailure) -> &Self {
        self.shared.script.lock().commit_failure = Some(failure);
        self
    }

    pub fn fail_rollback(&self, failure: ScriptedFailure) -> &Self {
        self.shared.script.lock().rollback_failure = Some(failure);
        self
    }

    /// Make every rollback hang until its caller gives up.
    pub fn stall_rollback(&self) -> &Self {
        self.shared.script.lock().rollback_stalls = true;
        self
    }

    pub fn creates(&self) -> u32 {
        self.shared.counters.creates.load(Ordering::SeqCst)
    }

    pub fn pings(&self) -> u32 {
        self.shared.counters.pings.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> u32 {
        self.shared.counters.probes.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.shared.counters.closes.load(Ordering::SeqCst)
    }

    /// Handles created and not yet closed.
    pub fn open_handles(&self) -> u32 {
        self.shared
            .next_handle
            .load(Ordering::SeqCst)
            .saturating_sub(self.closes())
    }

    pub fn begins(&self) -> u32 {
        self.shared.counters.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.shared.counters.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.shared.counters.rollbacks.load(Ordering::SeqCst)
    }

    /// Transactions dropped without a commit or rollback call.
    pub fn abandoned(&self) -> u32 {
        self.shared.counters.abandoned.load(Ordering::SeqCst)
    }

    /// Statements made durable by committed transactions, in commit order.
    pub fn committed_statements(&self) -> Vec<String> {
        self.shared.committed.lock().clone()
    }

    pub fn last_target(&self) -> Option<ConnectTarget> {
        self.shared.script.lock().last_target.clone()
    }

    pub fn last_tx_options(&self) -> Option<TxOptions> {
        self.shared.script.lock().last_tx_options
    }
}

#[async_trait]
impl PoolProvider for MemoryProvider {
    type Handle = MemoryHandle;
    type Tx = MemoryTx;

    async fn create(&self, target: &ConnectTarget) -> Result<MemoryHandle, DriverError> {
        self.shared.counters.creates.fetch_add(1, Ordering::SeqCst);
        let mut script = self.shared.script.lock();
        script.last_target = Some(target.clone());
        if take_failure(&mut script.create_failures) {
            return Err(DriverError::Other(format!(
                "dial tcp {}:{}: connect: connection refused",
                target.host, target.port
            )));
        }
        let id = self.shared.next_handle.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MemoryHandle { id })
    }

    async fn ping(&self, _handle: &MemoryHandle) -> Result<(), DriverError> {
        self.shared.counters.pings.fetch_add(1, Ordering::SeqCst);
        if take_failure(&mut self.shared.script.lock().ping_failures) {
            return Err(DriverError::Other("ping failed: server closed the connection".to_string()));
        }
        Ok(())
    }

    async fn probe(&self, _handle: &MemoryHandle) -> Result<i32, DriverError> {
        self.shared.counters.probes.fetch_add(1, Ordering::SeqCst);
        let (delay, failed, value) = {
            let mut script = self.shared.script.lock();
            let failed = take_failure(&mut script.probe_failures);
            (script.probe_delay, failed, script.probe_value.unwrap_or(1))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failed {
            return Err(DriverError::Other("connection reset by peer".to_string()));
        }
        Ok(value)
    }

    async fn close(&self, _handle: MemoryHandle) {
        self.shared.counters.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn stat(&self, _handle: &MemoryHandle) -> PoolStat {
        self.shared.script.lock().stat
    }

    async fn begin_tx(
        &self,
        _handle: &MemoryHandle,
        options: TxOptions,
    ) -> Result<MemoryTx, DriverError> {
        let mut script = self.shared.script.lock();
        if let Some(failure) = &script.begin_failure {
            return Err(failure.to_error());
        }
        script.last_tx_options = Some(options);
        self.shared.counters.begins.fetch_add(1, Ordering::SeqCst);
        Ok(MemoryTx {
            shared: self.shared.clone(),
            statements: Vec::new(),
            state: TxState::Active,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

/// Transaction produced by [`MemoryProvider`]. Statements become visible
/// through [`MemoryProvider::committed_statements`] only on commit.
#[derive(Debug)]
pub struct MemoryTx {
    shared: Arc<Shared>,
    statements: Vec<String>,
    state: TxState,
}

impl MemoryTx {
    /// Record a statement as part of this transaction.
    pub fn execute(&mut self, statement: impl Into<String>) -> Result<(), DriverError> {
        if self.state != TxState::Active {
            return Err(DriverError::TxClosed);
        }
        self.statements.push(statement.into());
        Ok(())
    }

    pub fn state(&self) -> TxState {
        self.state
    }
}

#[async_trait]
impl TransactionRollback for MemoryTx {
    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.shared.counters.rollbacks.fetch_add(1, Ordering::SeqCst);
        if self.state != TxState::Active {
            return Err(DriverError::TxClosed);
        }
        let stalls = self.shared.script.lock().rollback_stalls;
        if stalls {
            std::future::pending::<()>().await;
        }
        self.state = TxState::RolledBack;
        self.statements.clear();
        if let Some(failure) = &self.shared.script.lock().rollback_failure {
            return Err(failure.to_error());
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for MemoryTx {
    async fn commit(&mut self) -> Result<(), DriverError> {
        self.shared.counters.commits.fetch_add(1, Ordering::SeqCst);
        if self.state != TxState::Active {
            return Err(DriverError::TxClosed);
        }
        if let Some(failure) = &self.shared.script.lock().commit_failure {
            // A failed commit leaves nothing durable.
            self.state = TxState::RolledBack;
            self.statements.clear();
            return Err(failure.to_error());
        }
        self.state = TxState::Committed;
        self.shared
            .committed
            .lock()
            .extend(self.statements.drain(..));
        Ok(())
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.state == TxState::Active {
            self.shared.counters.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    fn target() -> ConnectTarget {
        ConnectTarget::from_config(&DatabaseConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_create_failures() {
        let provider = MemoryProvider::new();
        provider.fail_creates(2);

        assert!(provider.create(&target()).await.is_err());
        assert!(provider.create(&target()).await.is_err());
        let handle = provider.create(&target()).await.unwrap();

        assert_eq!(handle.id, 1);
        assert_eq!(provider.creates(), 3);
        assert_eq!(provider.open_handles(), 1);

        provider.close(handle).await;
        assert_eq!(provider.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_commit_makes_statements_durable() {
        let provider = MemoryProvider::new();
        let handle = provider.create(&target()).await.unwrap();

        let mut tx = provider.begin_tx(&handle, TxOptions::default()).await.unwrap();
        tx.execute("INSERT INTO users (name) VALUES ('Alice')").unwrap();
        tx.commit().await.unwrap();

        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(provider.committed_statements().len(), 1);
        assert!(matches!(tx.rollback().await, Err(DriverError::TxClosed)));
        assert!(matches!(tx.execute("SELECT 1"), Err(DriverError::TxClosed)));
    }

    #[tokio::test]
    async fn test_rollback_discards_statements() {
        let provider = MemoryProvider::new();
        let handle = provider.create(&target()).await.unwrap();

        let mut tx = provider.begin_tx(&handle, TxOptions::default()).await.unwrap();
        tx.execute("INSERT INTO users (name) VALUES ('Bob')").unwrap();
        tx.rollback().await.unwrap();

        assert!(provider.committed_statements().is_empty());
        assert_eq!(provider.abandoned(), 0);
    }

    #[tokio::test]
    async fn test_dropped_active_transaction_is_abandoned() {
        let provider = MemoryProvider::new();
        let handle = provider.create(&target()).await.unwrap();

        let tx = provider.begin_tx(&handle, TxOptions::default()).await.unwrap();
        drop(tx);

        assert_eq!(provider.abandoned(), 1);
    }
}
