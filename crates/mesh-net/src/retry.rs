//! Generic exponential-backoff-with-jitter retry wrapper
//!
//! Defaults match spec §7: 3 attempts, 0.5s initial delay, 2x factor, 10s
//! cap, 25% jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff schedule parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt.
    pub factor: f64,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Fraction of the computed delay randomized, in both directions.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: 0.25,
        }
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping an exponentially
/// growing, jittered delay between attempts. Returns the first `Ok`, or the
/// last `Err` if every attempt failed.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: RetryPolicy, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut delay = policy.initial_delay;
    let mut last_err = None;

    for attempt in 0..policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                last_err = Some(e);
                if attempt + 1 == policy.max_attempts {
                    break;
                }
                tokio::time::sleep(jittered(delay, policy.jitter)).await;
                delay = delay.mul_f64(policy.factor).min(policy.max_delay);
            }
        }
    }

    Err(last_err.expect("at least one attempt always runs"))
}

fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let spread = delay.as_secs_f64() * jitter;
    let offset = rand::thread_rng().gen_range(-spread..=spread);
    Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_succeeds() {
        let attempts = Arc::new(AtomicU32::new(0));
        let result: Result<u32, &str> = retry_with_backoff(RetryPolicy::default(), || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_up_to_max_attempts_then_fails() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            factor: 2.0,
            max_delay: Duration::from_millis(5),
            jitter: 0.0,
        };
        let result: Result<u32, &str> = retry_with_backoff(policy, || {
            let attempts = attempts.clone();
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("nope")
            }
        })
        .await;
        assert_eq!(result, Err("nope"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        };
        let result: Result<u32, &str> = retry_with_backoff(policy, || {
            let attempts = attempts.clone();
            async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err("nope")
                } else {
                    Ok(7)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(7));
    }

    #[test]
    fn jitter_zero_returns_exact_delay() {
        let delay = Duration::from_millis(500);
        assert_eq!(jittered(delay, 0.0), delay);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let delay = Duration::from_secs(1);
        for _ in 0..100 {
            let jittered = jittered(delay, 0.25);
            assert!(jittered.as_secs_f64() >= 0.75 && jittered.as_secs_f64() <= 1.25);
        }
    }
}
