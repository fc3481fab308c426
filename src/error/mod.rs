//! Error types for pool lifecycle, health probing and transactions.
//!
//! Two layers:
//! - [`DriverError`]: failures reported by the pooled-connection provider
//! - [`DbError`]: the failures this crate surfaces to callers, each mapping to
//!   an [`ErrorKind`]

use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`DbError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or out-of-range configuration, never retried
    InvalidConfig,
    /// Operation attempted before a successful connect
    NotConnected,
    /// Retry, health or caller deadline exceeded
    Timeout,
    /// External cancellation observed
    Canceled,
    /// Live probe failed against a connected pool
    Unavailable,
    /// Every pooled connection is in use
    ResourceExhausted,
    /// Pool reports excessive idle capacity
    DegradedCapacity,
    /// Begin, commit or rollback-adjacent failure
    TransactionFailed,
    /// Schema migration failure
    Migration,
    /// Unwrapped provider failure
    Driver,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::NotConnected => "not_connected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Canceled => "canceled",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::DegradedCapacity => "degraded_capacity",
            ErrorKind::TransactionFailed => "transaction_failed",
            ErrorKind::Migration => "migration",
            ErrorKind::Driver => "driver",
        }
    }
}

/// Failures reported by the pooled-connection provider.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("sqlx error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("tx is closed")]
    TxClosed,

    #[error("conn busy")]
    ConnBusy,

    #[error("context canceled")]
    Canceled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Other(String),
}

/// Message fragments that identify an expected rollback failure when the
/// provider only reports it as text. Matching on driver messages is fragile
/// across driver versions; typed variants are checked first.
const EXPECTED_ROLLBACK_MESSAGES: &[&str] = &[
    "tx is closed",
    "transaction is closed",
    "conn busy",
    "context canceled",
];

impl DriverError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, DriverError::Canceled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(
            self,
            DriverError::DeadlineExceeded | DriverError::Sqlx(sqlx::Error::PoolTimedOut)
        )
    }

    /// Whether a rollback that failed with this error is an expected
    /// condition (transaction already finished, connection busy, or the
    /// caller gave up) rather than a fault worth an error-level report.
    pub fn is_expected_rollback_failure(&self) -> bool {
        match self {
            DriverError::TxClosed | DriverError::ConnBusy | DriverError::Canceled => true,
            DriverError::DeadlineExceeded => false,
            DriverError::Sqlx(_) | DriverError::Other(_) => {
                let message = self.to_string();
                EXPECTED_ROLLBACK_MESSAGES
                    .iter()
                    .any(|fragment| message.contains(fragment))
            }
        }
    }
}

/// Errors surfaced by the connection manager, transaction helpers and
/// migration runner.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid configuration for {field}: {message}")]
    InvalidConfig { field: &'static str, message: String },

    #[error("database pool not initialized")]
    NotConnected,

    #[error("{message}")]
    Timeout {
        message: String,
        attempts: u32,
        elapsed: Duration,
        #[source]
        source: Option<Box<DbError>>,
    },

    #[error("{message}")]
    Canceled {
        message: String,
        #[source]
        source: Option<Box<DbError>>,
    },

    #[error("{message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<DbError>>,
    },

    #[error("connection pool exhausted: {acquired}/{max} connections in use")]
    ResourceExhausted { acquired: u32, max: u32 },

    #[error("high idle connection ratio: {:.2}% idle", .idle_ratio * 100.0)]
    DegradedCapacity { idle_ratio: f64 },

    #[error("{message}")]
    TransactionFailed {
        message: String,
        #[source]
        source: Option<Box<DbError>>,
    },

    #[error("failed to rollback transaction: {rollback} (original error: {source})")]
    RollbackFailed {
        rollback: DriverError,
        #[source]
        source: Box<DbError>,
    },

    #[error("{message}")]
    Migration {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl DbError {
    pub fn invalid_config(field: &'static str, message: impl Into<String>) -> Self {
        DbError::InvalidConfig {
            field,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>, cause: Option<DbError>) -> Self {
        DbError::Unavailable {
            message: message.into(),
            source: cause.map(Box::new),
        }
    }

    pub fn transaction_failed(message: impl Into<String>, cause: impl Into<DbError>) -> Self {
        DbError::TransactionFailed {
            message: message.into(),
            source: Some(Box::new(cause.into())),
        }
    }

    pub fn migration<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DbError::Migration {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Translate a context interruption into `Canceled` or `Timeout`.
    pub fn interrupted(reason: DriverError, message: impl Into<String>) -> Self {
        let message = message.into();
        if reason.is_deadline_exceeded() {
            DbError::Timeout {
                message,
                attempts: 0,
                elapsed: Duration::ZERO,
                source: Some(Box::new(DbError::Driver(reason))),
            }
        } else {
            DbError::Canceled {
                message,
                source: Some(Box::new(DbError::Driver(reason))),
            }
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            DbError::NotConnected => ErrorKind::NotConnected,
            DbError::Timeout { .. } => ErrorKind::Timeout,
            DbError::Canceled { .. } => ErrorKind::Canceled,
            DbError::Unavailable { .. } => ErrorKind::Unavailable,
            DbError::ResourceExhausted { .. } => ErrorKind::ResourceExhausted,
            DbError::DegradedCapacity { .. } => ErrorKind::DegradedCapacity,
            DbError::TransactionFailed { .. } | DbError::RollbackFailed { .. } => {
                ErrorKind::TransactionFailed
            }
            DbError::Migration { .. } => ErrorKind::Migration,
            DbError::Driver(_) => ErrorKind::Driver,
        }
    }

    /// The wrapped cause, if this error annotates another `DbError`.
    pub fn cause(&self) -> Option<&DbError> {
        match self {
            DbError::Timeout { source, .. }
            | DbError::Canceled { source, .. }
            | DbError::Unavailable { source, .. }
            | DbError::TransactionFailed { source, .. } => source.as_deref(),
            DbError::RollbackFailed { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True when this error, or any cause it wraps, reports cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            DbError::Canceled { .. } => true,
            DbError::Driver(driver) => driver.is_canceled(),
            other => other.cause().is_some_and(DbError::is_canceled),
        }
    }

    /// True when this error, or any cause it wraps, reports an exceeded
    /// deadline.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            DbError::Timeout { .. } => true,
            DbError::Driver(driver) => driver.is_deadline_exceeded(),
            other => other.cause().is_some_and(DbError::is_deadline_exceeded),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
