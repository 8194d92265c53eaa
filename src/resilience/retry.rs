//! Retry with exponential backoff and jitter.

use crate::config::RetrySettings;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Fraction of the computed delay used as the upper bound for random jitter.
pub const JITTER_RATIO: f64 = 0.1;

/// Stateless retry handler: each [`RetryPolicy::execute`] call owns its attempt counter,
/// so one policy can serve any number of concurrent callers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    exponential_base: f64,
}

impl RetryPolicy {
    /// Build a policy. `max_attempts` is clamped to at least one call and
    /// `exponential_base` to at least `1.0`.
    pub fn new(
        max_attempts: u32,
        base_delay: Duration,
        max_delay: Duration,
        exponential_base: f64,
    ) -> Self {
        let exponential_base = if exponential_base.is_finite() {
            exponential_base.max(1.0)
        } else {
            1.0
        };
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            exponential_base,
        }
    }

    /// Total number of calls the policy makes before giving up.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff for the zero-based `attempt` before jitter:
    /// `min(base_delay * exponential_base^attempt, max_delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    /// Backoff for `attempt` plus jitter drawn uniformly from `[0, 0.1 * backoff]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let ceiling = backoff.as_secs_f64() * JITTER_RATIO;
        let jitter = if ceiling > 0.0 {
            rand::thread_rng().gen_range(0.0..=ceiling)
        } else {
            0.0
        };
        backoff + Duration::from_secs_f64(jitter)
    }

    /// Run `operation` until it succeeds, fails with an error `retryable` rejects, or the
    /// attempt budget is spent. The last observed error is returned unchanged.
    pub async fn execute<T, E, F, Fut, P>(&self, mut operation: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !retryable(&error) {
                        tracing::debug!(attempt, error = %error, "Non-retryable failure");
                        return Err(error);
                    }
                    if attempt + 1 >= self.max_attempts {
                        tracing::error!(
                            attempts = self.max_attempts,
                            error = %error,
                            "Final retry attempt failed"
                        );
                        return Err(error);
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed; retrying"
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
        RetrySettings::default().into()
    }
}

impl From<RetrySettings> for RetryPolicy {
    fn from(settings: RetrySettings) -> Self {
        Self::new(
            settings.max_attempts,
            settings.base_delay,
            settings.max_delay,
            settings.exponential_base,
        )
    }
}
