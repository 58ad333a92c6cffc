//! Per-source request pacing.
//!
//! Each marketplace declares a [`RateLimitPolicy`]; the adapter harness owns
//! one [`RateLimiter`] per source and awaits it before every fetch.

use crate::clock::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitPolicy {
    Unlimited,
    /// Minimum spacing between consecutive requests
    FixedDelay(Duration),
    /// Burst of `capacity` requests refilled at `refill_per_sec`
    TokenBucket { capacity: u32, refill_per_sec: f64 },
}

impl RateLimitPolicy {
    pub fn per_second(requests: u32) -> Self {
        RateLimitPolicy::TokenBucket {
            capacity: requests.max(1),
            refill_per_sec: requests.max(1) as f64,
        }
    }
}

#[derive(Debug)]
enum LimiterState {
    Unlimited,
    Fixed {
        delay: Duration,
        last: Option<DateTime<Utc>>,
    },
    Bucket {
        capacity: f64,
        refill_per_sec: f64,
        tokens: f64,
        last_refill: Option<DateTime<Utc>>,
    },
}

pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    pub fn new(policy: &RateLimitPolicy) -> Self {
        let state = match policy {
            RateLimitPolicy::Unlimited => LimiterState::Unlimited,
            RateLimitPolicy::FixedDelay(delay) => LimiterState::Fixed {
                delay: *delay,
                last: None,
            },
            RateLimitPolicy::TokenBucket {
                capacity,
                refill_per_sec,
            } => LimiterState::Bucket {
                capacity: (*capacity).max(1) as f64,
                refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
                tokens: (*capacity).max(1) as f64,
                last_refill: None,
            },
        };
        Self {
            state: Mutex::new(state),
        }
    }

    /// Reserve one request slot, returning how long the caller must wait
    /// before using it. The slot is consumed immediately.
    pub fn reserve(&self, now: DateTime<Utc>) -> Duration {
        let mut state = self.state.lock();
        match &mut *state {
            LimiterState::Unlimited => Duration::ZERO,
            LimiterState::Fixed { delay, last } => {
                let wait = match last {
                    Some(prev) => {
                        let since = (now - *prev).to_std().unwrap_or(Duration::ZERO);
                        delay.saturating_sub(since)
                    }
                    None => Duration::ZERO,
                };
                *last = Some(now + chrono::Duration::from_std(wait).unwrap_or_else(|_| chrono::Duration::zero()));
                wait
            }
            LimiterState::Bucket {
                capacity,
                refill_per_sec,
                tokens,
                last_refill,
            } => {
                if let Some(prev) = last_refill {
                    let elapsed = (now - *prev).to_std().unwrap_or(Duration::ZERO);
                    *tokens = (*tokens + elapsed.as_secs_f64() * *refill_per_sec).min(*capacity);
                }
                *last_refill = Some(now);
                *tokens -= 1.0;
                if *tokens >= 0.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64(-*tokens / *refill_per_sec)
                }
            }
        }
    }

    /// Wait until the next request may be sent
    pub async fn acquire(&self, clock: &dyn Clock) {
        let wait = self.reserve(clock.now());
        if !wait.is_zero() {
            clock.sleep(wait).await;
        }
    }
}
