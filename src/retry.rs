//! Bounded retries and call timeouts for external sources
//!
//! Every console and array call goes through [`RetryPolicy::call`]. A call
//! that does not answer within the timeout becomes [`Error::Timeout`]; only
//! transient errors are retried, and never more than `max_attempts` times in
//! total, so a genuinely divergent state cannot hide behind retries.

use crate::error::{Error, Result};
use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry and timeout policy for external calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_backoff_ms: u64,
    /// Upper bound of the delay between retries
    pub max_backoff_ms: u64,
    /// Timeout of a single attempt
    pub call_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            call_timeout_secs: 30,
        }
    }
}

impl RetryPolicy {
    /// Policy without delays, for tests and rehearsals
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
            call_timeout_secs: 5,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_max_elapsed_time(None)
            .build()
    }

    /// Run `f` with a per-attempt timeout, retrying transient failures
    pub async fn call<T, F, Fut>(&self, source_name: &str, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.backoff();
        let mut attempt = 1;

        loop {
            let outcome = match tokio::time::timeout(self.call_timeout(), f()).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout {
                    source_name: source_name.to_string(),
                    operation: operation.to_string(),
                    timeout: self.call_timeout(),
                }),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(source_name, operation, attempt, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(Duration::from_millis(self.max_backoff_ms));
                    warn!(
                        source_name,
                        operation,
                        attempt,
                        max_attempts,
                        "Transient failure, retrying in {:?}: {}",
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::immediate(3);
        let calls = AtomicU32::new(0);

        let value = policy
            .call("hmc", "discover", || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::SourceUnavailable {
                        source_name: "hmc".into(),
                        reason: "connection reset".into(),
                    })
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_bound() {
        let policy = RetryPolicy::immediate(2);
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .call("pure-pra", "list_hosts", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::SourceUnavailable {
                    source_name: "pure-pra".into(),
                    reason: "503".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let policy = RetryPolicy::immediate(5);
        let calls = AtomicU32::new(0);

        let result: Result<()> = policy
            .call("pure-nominal", "bind_wwpn", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::DivergentState {
                    host: "h1".into(),
                    detail: "wwpn owned by h2".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_slow_call_becomes_timeout() {
        let policy = RetryPolicy {
            call_timeout_secs: 1,
            ..RetryPolicy::immediate(1)
        };

        let result: Result<()> = policy
            .call("hmc", "discover", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Timeout { .. })));
    }
}
