//! Transaction safety helpers.
//!
//! [`run_in_transaction`] begins a transaction, runs caller work and applies
//! exactly one terminal action: commit when the work succeeds, rollback on
//! error, panic or context interruption. Rollback failures are classified so
//! that benign ones (transaction already finished, busy connection, caller
//! gave up) never mask the error that caused the rollback.

use std::panic::AssertUnwindSafe;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::connection::Manager;
use crate::context::Context;
use crate::error::{DbError, DriverError, Result};
use crate::metrics::TransactionMetrics;
use crate::observer::Observer;
use crate::postgres::{PoolProvider, Transaction, TransactionRollback, TxOptions};

/// How a best-effort rollback ended.
enum RollbackOutcome {
    RolledBack,
    Expected,
    Unexpected(DriverError),
}

/// Run `work` inside a transaction with default options.
///
/// ```ignore
/// let user_id = run_in_transaction(&ctx, &manager, |tx| {
///     Box::pin(async move {
///         let conn = tx.connection()?;
///         let id: i64 = sqlx::query_scalar("INSERT INTO users (name) VALUES ($1) RETURNING id")
///             .bind("Alice")
///             .fetch_one(&mut *conn)
///             .await
///             .map_err(DriverError::from)?;
///         Ok(id)
///     })
/// })
/// .await?;
/// ```
pub async fn run_in_transaction<P, T, F>(ctx: &Context, manager: &Manager<P>, work: F) -> Result<T>
where
    P: PoolProvider,
    F: for<'t> FnOnce(&'t mut P::Tx) -> BoxFuture<'t, Result<T>>,
{
    run_in_transaction_with(ctx, manager, TxOptions::default(), work).await
}

/// Run `work` inside a transaction started with `options`.
///
/// - work succeeds: commit; a failed commit is `TransactionFailed`
/// - work fails: rollback, then the work error is returned as is unless the
///   rollback itself failed unexpectedly (`RollbackFailed` carries both)
/// - work panics: rollback, then the panic resumes
/// - `ctx` finishes first: the work future is dropped, the transaction is
///   rolled back and `Canceled` or `Timeout` is returned
///
/// Rollbacks after a panic or an interrupted context run under a fresh
/// context bounded by the manager's health timeout.
#[tracing::instrument(name = "db_transaction", skip_all, fields(options = %options))]
pub async fn run_in_transaction_with<P, T, F>(
    ctx: &Context,
    manager: &Manager<P>,
    options: TxOptions,
    work: F,
) -> Result<T>
where
    P: PoolProvider,
    F: for<'t> FnOnce(&'t mut P::Tx) -> BoxFuture<'t, Result<T>>,
{
    let mut tx = match manager.begin(ctx, options).await {
        Ok(tx) => tx,
        Err(error) => {
            TransactionMetrics::record_begin_failed();
            return Err(error);
        }
    };
    let observer = manager.observer();

    let outcome = {
        let tx_ref = &mut tx;
        let guarded = AssertUnwindSafe(async move { work(tx_ref).await }).catch_unwind();
        ctx.run(guarded).await
    };

    match outcome {
        Ok(Ok(Ok(value))) => match tx.commit().await {
            Ok(()) => {
                TransactionMetrics::record_committed();
                Ok(value)
            }
            Err(error) => {
                TransactionMetrics::record_commit_failed();
                Err(DbError::transaction_failed(
                    "failed to commit transaction",
                    error,
                ))
            }
        },
        Ok(Ok(Err(work_error))) => match rollback_classified(ctx, &mut tx, observer).await {
            RollbackOutcome::Unexpected(rollback) => Err(DbError::RollbackFailed {
                rollback,
                source: Box::new(work_error),
            }),
            RollbackOutcome::RolledBack | RollbackOutcome::Expected => Err(work_error),
        },
        Ok(Err(panic)) => {
            tracing::warn!("transaction work panicked, rolling back");
            rollback_classified(&cleanup_context(manager), &mut tx, observer).await;
            std::panic::resume_unwind(panic)
        }
        Err(reason) => {
            // The caller's context is already done, so roll back without it.
            rollback_classified(&cleanup_context(manager), &mut tx, observer).await;
            Err(DbError::interrupted(reason, "transaction interrupted"))
        }
    }
}

fn cleanup_context<P: PoolProvider>(manager: &Manager<P>) -> Context {
    Context::background().with_timeout(manager.options().health_timeout)
}

/// Roll `tx` back, logging failures by class. Never fails.
///
/// Expected failures are reported at warn level, anything else as exactly
/// one error event. An absent transaction is a no-op.
pub async fn classify_and_log_rollback<R>(
    ctx: &Context,
    tx: Option<&mut R>,
    observer: &dyn Observer,
) where
    R: TransactionRollback + ?Sized,
{
    if let Some(tx) = tx {
        rollback_classified(ctx, tx, observer).await;
    }
}

/// [`classify_and_log_rollback`], then annotate `original` with how the
/// transaction ended. Returns `Ok(())` when there is no original error.
pub async fn rollback_with_context<R>(
    ctx: &Context,
    tx: Option<&mut R>,
    observer: &dyn Observer,
    original: Option<DbError>,
) -> Result<()>
where
    R: TransactionRollback + ?Sized,
{
    classify_and_log_rollback(ctx, tx, observer).await;

    let Some(original) = original else {
        return Ok(());
    };

    if original.is_canceled() {
        return Err(DbError::Canceled {
            message: "transaction failed due to context cancellation".to_string(),
            source: Some(Box::new(original)),
        });
    }
    if original.is_deadline_exceeded() {
        return Err(DbError::Timeout {
            message: "transaction failed due to context deadline".to_string(),
            attempts: 0,
            elapsed: std::time::Duration::ZERO,
            source: Some(Box::new(original)),
        });
    }
    Err(DbError::transaction_failed("transaction failed", original))
}

async fn rollback_classified<R>(
    ctx: &Context,
    tx: &mut R,
    observer: &dyn Observer,
) -> RollbackOutcome
where
    R: TransactionRollback + ?Sized,
{
    // The rollback is always polled at least once, even on a finished ctx.
    let result = tokio::select! {
        biased;
        result = tx.rollback() => result,
        reason = ctx.done() => Err(reason),
    };

    match result {
        Ok(()) => {
            TransactionMetrics::record_rolled_back();
            RollbackOutcome::RolledBack
        }
        Err(error) if error.is_expected_rollback_failure() => {
            TransactionMetrics::record_rollback_expected();
            observer.warn(
                "transaction rollback skipped (expected condition)",
                &[("error", &error)],
            );
            RollbackOutcome::Expected
        }
        Err(error) => {
            TransactionMetrics::record_rollback_unexpected();
            observer.error("failed to rollback transaction", &[("error", &error)]);
            RollbackOutcome::Unexpected(error)
        }
    }
}
