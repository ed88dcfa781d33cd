//! Retry Engine: exponential backoff with jitter and error classification.
//!
//! Generalizes the `2_u64.pow(attempt).min(300)` backoff formula used
//! throughout the job executor into a configurable policy with jitter, and
//! adds the retryable/non-retryable classification the generic job system
//! never needed.

use crate::error::{Error, ErrorCode};
use crate::jobs::circuit_breaker::CircuitBreaker;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter as a fraction of the computed delay, e.g. 0.25 for ±25%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Backoff for the transport-facing manager, tighter jitter per §4.3.
    pub fn transport() -> Self {
        Self {
            jitter: 0.10,
            ..Self::default()
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let base_ms = (self.initial_delay.as_millis() as f64 * exp)
            .min(self.max_delay.as_millis() as f64);

        let mut rng = rand::thread_rng();
        let jitter_fraction: f64 = rng.gen_range(-self.jitter..=self.jitter);
        let jittered_ms = (base_ms * (1.0 + jitter_fraction)).max(0.0);

        Duration::from_millis(jittered_ms.min(self.max_delay.as_millis() as f64) as u64)
    }
}

/// Network/transport error substrings treated as retryable, mirroring
/// common POSIX errno names surfaced through I/O error messages.
const RETRYABLE_PATTERNS: &[&str] = &[
    "econnreset",
    "etimedout",
    "enotfound",
    "econnrefused",
    "ehostunreach",
    "epipe",
];

/// Classify an error as retryable per §4.3. HTTP-flavored errors are
/// recognized through the error's code mapping (5xx/429/408).
///
/// `IntegrityFailure` and `CircuitOpen` are excluded ahead of the generic
/// 5xx check below: both map to a 5xx-flavored `http_status`, but neither
/// is fixed by trying again -- a tampered hash stays tampered, and an open
/// breaker needs to recover on its own schedule, not be hammered.
pub fn is_retryable(error: &Error) -> bool {
    if matches!(error.code, ErrorCode::IntegrityFailure | ErrorCode::CircuitOpen) {
        return false;
    }
    if error.is_retryable() {
        return true;
    }
    let status = error.http_status();
    if status == 429 || status == 408 || (500..600).contains(&status) {
        return true;
    }
    let lower = error.message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Run `op`, retrying on retryable failures per `policy`, consulting and
/// updating `breaker` around every attempt.
pub async fn execute_with_retry<F, Fut, T>(
    op: F,
    policy: &RetryPolicy,
    breaker: &CircuitBreaker,
) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        if !breaker.can_execute().await {
            return Err(Error::circuit_open("circuit breaker is open"));
        }

        match op().await {
            Ok(value) => {
                breaker.on_success().await;
                return Ok(value);
            }
            Err(error) => {
                breaker.on_failure().await;

                if attempt >= policy.max_attempts || !is_retryable(&error) {
                    if attempt >= policy.max_attempts {
                        return Err(Error::retry_exhausted(format!(
                            "exhausted {} attempts: {}",
                            attempt, error
                        )));
                    }
                    return Err(error);
                }

                tokio::time::sleep(policy.delay_for_attempt(attempt)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::circuit_breaker::CircuitBreakerConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn delay_grows_and_caps() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        };
        let d1 = policy.delay_for_attempt(1);
        let d2 = policy.delay_for_attempt(2);
        let d10 = policy.delay_for_attempt(10);
        assert!(d2 >= d1);
        assert!(d10 <= policy.max_delay);
    }

    #[test]
    fn classifies_5xx_and_429_as_retryable() {
        let err = Error::new(ErrorCode::ServiceUnavailable, "down");
        assert!(is_retryable(&err));
        let err = Error::new(ErrorCode::RateLimitExceeded, "slow down");
        assert!(is_retryable(&err));
    }

    #[test]
    fn classifies_validation_as_non_retryable() {
        let err = Error::new(ErrorCode::ValidationFailed, "bad input");
        assert!(!is_retryable(&err));
    }

    #[test]
    fn classifies_integrity_failure_as_non_retryable_despite_5xx_mapping() {
        let err = Error::integrity_failure("recomputed hash mismatch");
        assert_eq!(err.http_status(), 500);
        assert!(!is_retryable(&err));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };

        let result = execute_with_retry(
            || {
                let calls = calls.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::new(ErrorCode::ServiceUnavailable, "flaky"))
                    } else {
                        Ok(42)
                    }
                }
            },
            &policy,
            &breaker,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_on_non_retryable_error() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let policy = RetryPolicy::default();

        let result: Result<(), Error> = execute_with_retry(
            || async { Err(Error::new(ErrorCode::ValidationFailed, "bad")) },
            &policy,
            &breaker,
        )
        .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, ErrorCode::ValidationFailed);
    }
}
