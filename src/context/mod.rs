//! Caller context: cancellation plus an optional deadline.
//!
//! Every long-running operation in this crate takes a [`Context`] and stops
//! promptly once it is canceled or its deadline passes, even when an internal
//! timer has not elapsed yet.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::DriverError;

/// Cancellation token and optional deadline shared by an operation tree.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never canceled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wrap an existing token, e.g. one driven by a shutdown signal.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Child context that can be canceled without affecting this one.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child context whose deadline is the earlier of this context's
    /// deadline and `now + timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        };
        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<DriverError> {
        if self.token.is_cancelled() {
            return Some(DriverError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(DriverError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is canceled or its deadline passes.
    pub async fn done(&self) -> DriverError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => DriverError::Canceled,
                _ = tokio::time::sleep_until(deadline) => DriverError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DriverError::Canceled
            }
        }
    }

    /// Run `fut` unless the context finishes first.
    ///
    /// A context that is already done never polls `fut`. When the context
    /// finishes mid-flight `fut` is dropped.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, DriverError>
    where
        F: Future,
    {
        if let Some(reason) = self.err() {
            return Err(reason);
        }
        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_runs_to_completion() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.remaining().is_none());

        let value = ctx.run(async { 7 }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_canceled_context_skips_future() {
        let ctx = Context::background();
        ctx.cancel();

        let mut polled = false;
        let result = ctx
            .run(async {
                polled = true;
            })
            .await;

        assert!(matches!(result, Err(DriverError::Canceled)));
        assert!(!polled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_future() {
        let ctx = Context::background().with_timeout(Duration::from_secs(2));
        let started = Instant::now();

        let result = ctx
            .run(tokio::time::sleep(Duration::from_secs(10)))
            .await;

        assert!(matches!(result, Err(DriverError::DeadlineExceeded)));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_takes_earlier_deadline() {
        let parent = Context::background().with_timeout(Duration::from_secs(1));
        let child = parent.with_timeout(Duration::from_secs(5));
        assert_eq!(child.deadline(), parent.deadline());

        let child = parent.with_cancel();
        child.cancel();
        assert!(child.err().is_some());
        assert!(parent.err().is_none());
    }

    #[tokio::test]
    async fn test_parent_cancel_reaches_child() {
        let parent = Context::background();
        let child = parent.with_timeout(Duration::from_secs(60));

        parent.cancel();
        assert!(matches!(child.err(), Some(DriverError::Canceled)));
        assert!(matches!(child.done().await, DriverError::Canceled));
    }
}
