//! Retry with exponential backoff and jitter.
//!
//! The policy is a plain value injected into adapters and the batch merger;
//! sleeping goes through [`Clock`] so tests can observe the backoff curve.

use crate::clock::Clock;
use crate::error::{SourceError, StoreError};
use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that know whether another attempt is worthwhile
pub trait Retriable {
    fn is_retriable(&self) -> bool;

    /// Minimum wait requested by the remote side
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retriable for SourceError {
    fn is_retriable(&self) -> bool {
        SourceError::is_retriable(self)
    }

    fn retry_after(&self) -> Option<Duration> {
        SourceError::retry_after(self)
    }
}

impl Retriable for StoreError {
    fn is_retriable(&self) -> bool {
        // a malformed staging name will fail the same way every time
        !matches!(self, StoreError::InvalidStagingName(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// Fraction of the delay randomized in both directions, 0.0..=1.0
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// One extra attempt at batch granularity, used for store writes
    pub fn once(backoff: Duration) -> Self {
        Self {
            max_attempts: 2,
            base_backoff: backoff,
            max_backoff: backoff,
            jitter: 0.0,
        }
    }

    /// Deterministic part of the delay after `attempt` failed attempts
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let factor = 2_u32.saturating_pow(exp);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Delay with jitter applied, never above `max_backoff`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        base.mul_f64(factor).min(self.max_backoff)
    }
}

/// Run `f` until it succeeds, fails with a non-retriable error, or the
/// policy's attempts are exhausted. Returns the last error on failure.
pub async fn execute_with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    label: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_attempts && e.is_retriable() => {
                let mut backoff = policy.delay_for(attempt);
                if let Some(hint) = e.retry_after() {
                    backoff = backoff.max(hint);
                }
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {}ms",
                    label,
                    attempt,
                    max_attempts,
                    e,
                    backoff.as_millis()
                );
                clock.sleep(backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_curve_is_capped() {
        let p = policy();
        assert_eq!(p.base_delay(1), Duration::from_millis(100));
        assert_eq!(p.base_delay(2), Duration::from_millis(200));
        assert_eq!(p.base_delay(3), Duration::from_millis(350));
        assert_eq!(p.base_delay(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = RetryPolicy {
            jitter: 0.5,
            max_backoff: Duration::from_secs(60),
            ..policy()
        };
        for _ in 0..100 {
            let d = p.delay_for(2);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(300));
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let clock = ManualClock::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u32, SourceError> = execute_with_retry(&policy(), &clock, "fetch", || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(SourceError::Transient("connection reset".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let clock = ManualClock::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), SourceError> = execute_with_retry(&policy(), &clock, "fetch", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Transient("timeout".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(clock.sleeps().len(), 3);
    }

    #[tokio::test]
    async fn test_no_retry_on_auth_error() {
        let clock = ManualClock::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), SourceError> = execute_with_retry(&policy(), &clock, "fetch", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(SourceError::Auth("401".into()))
            }
        })
        .await;

        assert!(matches!(result, Err(SourceError::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_hint_extends_backoff() {
        let clock = ManualClock::default();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let _: Result<(), SourceError> = execute_with_retry(&policy(), &clock, "fetch", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(SourceError::RateLimited {
                        retry_after: Some(Duration::from_secs(2)),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await;

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }
}
