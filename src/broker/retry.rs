// =============================================================================
// Retry policy — bounded exponential backoff for transient broker faults
// =============================================================================
//
// Two independent limits apply to every retried operation:
//   1. MAX_RETRIES attempts after the first failure.
//   2. RETRY_TIMEOUT: an absolute wall-clock cap. Even when attempts remain,
//      the policy gives up rather than sleep past the cap.
//
// Permanent errors (rejections, 4xx, parse failures) are returned on the
// first occurrence and never retried.
// =============================================================================

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::broker::types::BrokerError;

/// Default number of re-attempts after the initial failure.
pub const MAX_RETRIES: u32 = 3;
/// Default absolute cap on one retried operation, seconds.
pub const RETRY_TIMEOUT_SECONDS: u64 = 30;
/// First backoff delay; doubles per attempt.
const BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    retry_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            retry_timeout: Duration::from_secs(RETRY_TIMEOUT_SECONDS),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, retry_timeout: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            retry_timeout,
        }
    }

    /// Run `attempt` until it succeeds, fails permanently, exhausts retries,
    /// or would exceed the absolute timeout.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, BrokerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let started = Instant::now();
        let mut delay = self.base_delay;
        let mut tries: u32 = 0;

        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && tries < self.max_retries => {
                    // The absolute timeout is a hard cap: never sleep past it
                    // even when retry attempts remain.
                    if started.elapsed() + delay > self.retry_timeout {
                        warn!(
                            operation,
                            tries,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "retry timeout reached, giving up"
                        );
                        return Err(err);
                    }

                    tries += 1;
                    debug!(
                        operation,
                        attempt = tries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient broker error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result = fast_policy()
            .run("get_account", move || {
                let c = c.clone();
                async move {
                    if c.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(BrokerError::transient("get_account", "connection reset"))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_never_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<u32, _> = fast_policy()
            .run("submit_order", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BrokerError::permanent("submit_order", 422, "unknown symbol"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let result: Result<u32, _> = fast_policy()
            .run("get_clock", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BrokerError::transient("get_clock", "timeout"))
                }
            })
            .await;

        assert!(result.is_err());
        // 1 initial attempt + 3 retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn absolute_timeout_caps_retries_even_with_attempts_left() {
        // Generous retry count, but a timeout shorter than the first backoff:
        // the policy must give up before sleeping.
        let policy = RetryPolicy::new(100, Duration::from_secs(10), Duration::from_millis(20));
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let started = Instant::now();
        let result: Result<u32, _> = policy
            .run("get_bars", move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err(BrokerError::transient("get_bars", "timeout"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
