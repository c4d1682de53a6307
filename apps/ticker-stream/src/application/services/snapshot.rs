//! Snapshot Retry
//!
//! The summary table is fetched once at start-up; failures are retried a
//! bounded number of times with a fixed pause in between.

use std::time::Duration;

use crate::application::ports::{SnapshotError, SnapshotPort};
use crate::domain::market::SymbolSummary;

/// Fetch summaries, retrying up to `attempts` times in total.
///
/// An `attempts` of zero is treated as one.
///
/// # Errors
///
/// Returns the error of the last attempt when every attempt fails.
pub async fn fetch_with_retry(
    port: &dyn SnapshotPort,
    attempts: u32,
    delay: Duration,
) -> Result<Vec<SymbolSummary>, SnapshotError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match port.fetch_summaries().await {
            Ok(summaries) => {
                tracing::info!(count = summaries.len(), attempt, "Fetched symbol summaries");
                return Ok(summaries);
            }
            Err(e) if attempt < attempts => {
                tracing::warn!(error = %e, attempt, attempts, "Summary fetch failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::error!(error = %e, attempts, "Summary fetch failed");
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Fails `failures` times, then returns an empty table.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SnapshotPort for Flaky {
        async fn fetch_summaries(&self) -> Result<Vec<SymbolSummary>, SnapshotError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(SnapshotError::Status { status: 503 })
            } else {
                Ok(Vec::new())
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let port = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let result = fetch_with_retry(&port, 3, Duration::from_secs(1)).await;
        tokio_test::assert_ok!(result);
        assert_eq!(port.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let port = Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        };
        let result = fetch_with_retry(&port, 3, Duration::from_secs(1)).await;
        assert_eq!(result, Err(SnapshotError::Status { status: 503 }));
        assert_eq!(port.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn zero_attempts_still_tries_once() {
        let port = Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        };
        assert!(fetch_with_retry(&port, 0, Duration::ZERO).await.is_ok());
        assert_eq!(port.calls.load(Ordering::SeqCst), 1);
    }
}
