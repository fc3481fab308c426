//! Pooled-connection providers.
//!
//! [`PoolProvider`] is the seam between the connection manager and whatever
//! owns the actual connections. [`PgProvider`] wraps `sqlx::PgPool`;
//! [`MemoryProvider`] is a scriptable stand-in without a server.

mod memory;
mod pool;
mod provider;
mod target;

pub use memory::{MemoryHandle, MemoryProvider, MemoryTx, ScriptedFailure, TxState};
pub use pool::{PgHandle, PgProvider, PgTx};
pub use provider::{
    AccessMode, IsolationLevel, PoolProvider, PoolStat, Transaction, TransactionRollback,
    TxOptions,
};
pub use target::{ConnectTarget, SslMode, DEFAULT_MAX_CONNS};
