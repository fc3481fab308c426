// Foundation
pub mod config;
pub mod context;
pub mod error;
pub mod observer;

// Pool providers and the resilience layer over them
pub mod connection;
pub mod postgres;
pub mod transaction;

// Supporting modules
pub mod metrics;
pub mod migrations;
pub mod telemetry;

// Application layer
pub mod api;
pub mod server;

pub use connection::{ConnectionOptions, HealthStatus, Manager, ManagerBuilder, PoolMetrics};
pub use context::Context;
pub use error::{DbError, DriverError, ErrorKind, Result};
pub use postgres::{PgProvider, PoolProvider, TxOptions};
pub use transaction::{run_in_transaction, run_in_transaction_with};
