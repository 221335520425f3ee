//! Retry with exponential backoff and random jitter.
//!
//! The delay before retry `n` (0-based) is `base * 2^n + uniform(jitter)`,
//! which with the defaults gives `2^n + uniform(0.1, 0.5)` seconds.
//! Whether an error is worth retrying is decided by a caller-supplied
//! predicate; anything else is returned immediately.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_attempts(3)
    }
}

impl RetryPolicy {
    pub fn with_attempts(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            jitter_min: Duration::from_millis(100),
            jitter_max: Duration::from_millis(500),
        }
    }

    /// Millisecond-scale delays for tests.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(1),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::from_millis(1),
        }
    }

    /// Backoff before the retry that follows failed attempt `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        let jitter_min = self.jitter_min.as_micros() as u64;
        let jitter_max = (self.jitter_max.as_micros() as u64).max(jitter_min);
        let jitter = rand::thread_rng().gen_range(jitter_min..=jitter_max);
        self.base_delay.saturating_mul(factor) + Duration::from_micros(jitter)
    }

    pub fn attempts<'a>(&'a self, operation: &'a str) -> Attempts<'a> {
        Attempts {
            policy: self,
            operation,
            failed: 0,
        }
    }
}

/// Attempt bookkeeping for loops that cannot be expressed as a closure
/// (for example when every attempt needs `&mut` access to a connection).
pub struct Attempts<'a> {
    policy: &'a RetryPolicy,
    operation: &'a str,
    failed: u32,
}

impl Attempts<'_> {
    /// Record a failed attempt. Sleeps the backoff and returns `true` when the
    /// caller should try again.
    pub async fn retry_after<E: Display>(&mut self, err: &E, transient: bool) -> bool {
        self.failed += 1;

        if !transient {
            warn!("{} failed with a non-retryable error: {}", self.operation, err);
            return false;
        }

        if self.failed >= self.policy.max_attempts {
            warn!(
                "{} failed after {} attempts: {}",
                self.operation, self.failed, err
            );
            return false;
        }

        let delay = self.policy.delay_for(self.failed - 1);
        warn!(
            "{} failed (attempt {}/{}): {}. Retrying in {:.2}s",
            self.operation,
            self.failed,
            self.policy.max_attempts,
            err,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
        true
    }

    pub fn succeeded(&self) {
        if self.failed > 0 {
            info!("{} succeeded after {} retries", self.operation, self.failed);
        }
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed
    }
}

/// Run `operation` until it succeeds, fails with an error `is_transient`
/// rejects, or the policy's attempts are used up. The last error is returned.
pub async fn retry<T, E, F, Fut, P>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_transient: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: Display,
{
    let mut attempts = policy.attempts(operation_name);
    loop {
        match operation().await {
            Ok(value) => {
                attempts.succeeded();
                return Ok(value);
            }
            Err(err) => {
                let transient = is_transient(&err);
                if !attempts.retry_after(&err, transient).await {
                    return Err(err);
                }
            }
        }
    }
}
