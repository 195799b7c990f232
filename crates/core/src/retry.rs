//! Bounded exponential backoff for provider calls.
//!
//! Only rate-limit and quota signals are retried. Anything else, and the last
//! error once attempts run out, is returned unchanged.

use std::{future::Future, time::Duration};

use crate::error::ProviderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry that follows failed attempt `attempt_index` (0-based).
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.initial_delay
            .saturating_mul(2u32.saturating_pow(attempt_index))
    }
}

/// Errors that know whether they are worth another attempt.
pub trait Retryable {
    fn is_rate_limited(&self) -> bool;
}

impl Retryable for ProviderError {
    fn is_rate_limited(&self) -> bool {
        ProviderError::is_rate_limited(self)
    }
}

/// Run `operation` under `policy`.
///
/// Counters live on this call's stack, so concurrent runs never share attempts.
/// Dropping the returned future cancels any pending backoff sleep.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt_index = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt_index > 0 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt = attempt_index + 1,
                        "Succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_rate_limited() {
                    return Err(err);
                }

                if attempt_index + 1 >= max_attempts {
                    tracing::error!(
                        operation = operation_name,
                        attempts = max_attempts,
                        error = %err,
                        "Rate limited, attempts exhausted"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for(attempt_index);
                tracing::warn!(
                    operation = operation_name,
                    attempt = attempt_index + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt_index += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use tokio::time::Instant;

    use super::*;

    fn assert_close(actual: Duration, expected: Duration) {
        let slack = Duration::from_millis(50);
        assert!(
            actual >= expected && actual <= expected + slack,
            "expected ~{expected:?}, got {actual:?}"
        );
    }

    fn rate_limited() -> ProviderError {
        ProviderError::Api {
            status: 429,
            message: "Resource has been exhausted".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_rate_limits_then_success_doubles_delay() {
        let calls: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));

        let result = retry("test_op", RetryPolicy::default(), || {
            let calls = Arc::clone(&calls);
            async move {
                let mut calls = calls.lock().unwrap();
                calls.push(Instant::now());
                if calls.len() <= 2 {
                    Err(rate_limited())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert_close(first_gap, Duration::from_millis(1000));
        assert_close(second_gap, Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_rate_limit_error_is_not_retried() {
        let attempts = AtomicU32::new(0);

        let result: Result<(), ProviderError> = retry("test_op", RetryPolicy::default(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Api {
                    status: 400,
                    message: "bad request".into(),
                })
            }
        })
        .await;

        assert!(matches!(result, Err(ProviderError::Api { status: 400, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result: Result<(), ProviderError> = retry("test_op", RetryPolicy::default(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                Err(ProviderError::Api {
                    status: 429,
                    message: format!("quota #{n}"),
                })
            }
        })
        .await;

        match result {
            Err(ProviderError::Api { message, .. }) => assert_eq!(message, "quota #3"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        // 1s + 2s + 4s of backoff between four attempts
        assert_close(start.elapsed(), Duration::from_millis(7000));
    }

    #[test]
    fn test_delay_for() {
        let policy = RetryPolicy {
            max_attempts: 4,
            initial_delay: Duration::from_millis(250),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }
}
