//! Per-batch cancellation and deadline handling.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{QueryError, QueryResult};

/// Cancellation scope shared by every store call in one batch.
#[derive(Debug, Clone)]
pub struct QueryContext {
    token: CancellationToken,
    deadline: Option<(Instant, u64)>,
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().and_timeout(timeout)
    }

    pub fn and_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some((Instant::now() + timeout, timeout.as_millis() as u64));
        self
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Check for cancellation without awaiting anything
    pub fn check(&self) -> QueryResult<()> {
        if self.token.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        if let Some((deadline, timeout_ms)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(QueryError::DeadlineExceeded { timeout_ms });
            }
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Pin one of these to race many store calls against a single timer.
    pub async fn interrupted(&self) -> QueryError {
        let expiry = async {
            match self.deadline {
                Some((deadline, timeout_ms)) => {
                    tokio::time::sleep_until(deadline).await;
                    QueryError::DeadlineExceeded { timeout_ms }
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => QueryError::Cancelled,
            err = expiry => err,
        }
    }

    /// Drive `fut` to completion unless the context is cancelled or expires first.
    pub async fn run<F, T>(&self, fut: F) -> QueryResult<T>
    where
        F: Future<Output = QueryResult<T>>,
    {
        self.check()?;

        tokio::select! {
            biased;
            err = self.interrupted() => Err(err),
            result = fut => result,
        }
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_results_through() {
        let ctx = QueryContext::background();
        assert_eq!(ctx.run(async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let ctx = QueryContext::background();
        ctx.cancel();
        let result: QueryResult<()> = ctx.run(std::future::pending()).await;
        assert_eq!(result, Err(QueryError::Cancelled));
    }

    #[tokio::test]
    async fn deadline_interrupts_slow_calls() {
        let ctx = QueryContext::with_timeout(Duration::from_millis(10));
        let result: QueryResult<()> = ctx.run(std::future::pending()).await;
        assert_eq!(result, Err(QueryError::DeadlineExceeded { timeout_ms: 10 }));
    }

    #[tokio::test]
    async fn interrupted_reports_cancellation() {
        let ctx = QueryContext::with_timeout(Duration::from_secs(60));
        let waiter = ctx.clone();
        let pending = tokio::spawn(async move { waiter.interrupted().await });

        ctx.cancel();
        assert_eq!(pending.await.unwrap(), QueryError::Cancelled);
    }
}
