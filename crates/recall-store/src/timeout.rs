//! Racing store calls against a timer.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::errors::{Result, StoreError};

/// Await `future`, or fail with [`StoreError::OutcomeUnknown`] once
/// `duration` has elapsed.
///
/// Expiry does not cancel the underlying engine work: a write that times
/// out may still commit, so callers must not assume it did not happen.
pub async fn with_timeout<T, F>(duration: Duration, operation: &'static str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => {
            let timeout_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
            warn!(operation, timeout_ms, "operation timed out, outcome unknown");
            Err(StoreError::OutcomeUnknown {
                operation,
                timeout_ms,
            })
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn completes_before_deadline() {
        let value = with_timeout(Duration::from_secs(1), "fast", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn inner_error_passes_through() {
        let result: Result<()> = with_timeout(Duration::from_secs(1), "failing", async {
            Err(StoreError::BackendClosed { operation: "failing" })
        })
        .await;
        assert_matches!(result, Err(StoreError::BackendClosed { operation: "failing" }));
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_is_outcome_unknown() {
        let result: Result<()> = with_timeout(Duration::from_millis(250), "slow", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_matches!(
            result,
            Err(StoreError::OutcomeUnknown { operation: "slow", timeout_ms: 250 })
        );
    }
}
