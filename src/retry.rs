//! Bounded retry with exponential backoff for generation calls.
//!
//! Transient errors are retried up to `max_attempts` total calls with
//! `base_delay * 2^(attempt-1)` backoff (capped) plus jitter. Permanent
//! errors return at once. `execute` never fails: exhaustion comes back as
//! `Attempted { outcome: Failed(..) }` so the caller can move on.

use crate::models::{GenerationError, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Result of a retried operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    Succeeded(T),
    Failed(GenerationError),
}

impl<T> CallOutcome<T> {
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }
}

/// Outcome plus the number of calls it took.
#[derive(Debug, Clone)]
pub struct Attempted<T> {
    pub outcome: CallOutcome<T>,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: Option<Duration>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: None,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts)
            .base_delay(Duration::from_millis(config.base_delay_ms))
            .max_delay(Duration::from_millis(config.max_delay_ms))
            .with_jitter(Duration::from_millis(config.jitter_ms))
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.jitter = (!max_jitter.is_zero()).then_some(max_jitter);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the retry following failed attempt `attempt` (1-based).
    ///
    /// `seed` spreads jitter across records.
    pub fn backoff_delay(&self, attempt: u32, seed: u64) -> Duration {
        let exp = attempt.saturating_sub(1);
        let mut delay = self.base_delay.saturating_mul(2u32.saturating_pow(exp));
        delay = delay.min(self.max_delay);

        if let Some(max_jitter) = self.jitter {
            delay = delay
                .saturating_add(jitter(max_jitter, seed, attempt))
                .min(self.max_delay);
        }

        delay
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of
    /// attempts.
    pub async fn execute<T, F, Fut>(&self, seed: u64, mut operation: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    return Attempted {
                        outcome: CallOutcome::Succeeded(value),
                        attempts: attempt,
                    };
                }
                Err(error) if !error.is_transient() => {
                    warn!(attempt = attempt, error = %error, "Permanent error, not retrying");
                    return Attempted {
                        outcome: CallOutcome::Failed(error),
                        attempts: attempt,
                    };
                }
                Err(error) if attempt >= self.max_attempts => {
                    warn!(attempts = attempt, error = %error, "Retries exhausted");
                    return Attempted {
                        outcome: CallOutcome::Failed(error),
                        attempts: attempt,
                    };
                }
                Err(error) => {
                    let mut delay = self.backoff_delay(attempt, seed);
                    if let Some(hint) = error.retry_after() {
                        delay = delay.max(hint.min(self.max_delay));
                    }
                    debug!(
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Stable seed for a string key (FNV-1a).
pub fn seed_for(key: &str) -> u64 {
    key.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn jitter(max_jitter: Duration, seed: u64, attempt: u32) -> Duration {
    let nanos = max_jitter.as_nanos().min(u128::from(u64::MAX)) as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }

    let mixed = (seed ^ u64::from(attempt))
        .wrapping_mul(6_364_136_223_846_793_005)
        .wrapping_add(1_442_695_040_888_963_407);
    Duration::from_nanos(mixed % nanos.saturating_add(1))
}
