//! Circuit breaker guarding one collaborator.
//!
//! ```text
//! Closed   -> Open      consecutive failures reach the threshold
//! Open     -> HalfOpen  recovery timeout elapsed since the last failure
//! HalfOpen -> Closed    the single trial call succeeds
//! HalfOpen -> Open      the trial call fails (recovery timer restarts)
//! ```
//!
//! State lives behind a mutex that is held only for bookkeeping; the wrapped call runs
//! with the lock released.

use crate::clock::SharedClock;
use crate::config::BreakerSettings;
use serde::Serialize;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Observable breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected without reaching the collaborator.
    Open,
    /// One trial call is allowed to probe for recovery.
    HalfOpen,
}

/// Outcome of a call made through a [`CircuitBreaker`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call without invoking the operation.
    #[error("circuit '{name}' is open; retry after {retry_after:?}")]
    Open {
        /// Breaker that rejected the call.
        name: &'static str,
        /// Remaining cool-down before a trial call will be admitted.
        retry_after: Duration,
    },
    /// The operation ran and failed.
    #[error(transparent)]
    Inner(E),
}

/// Point-in-time view of a breaker used by health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Collaborator guarded by the breaker.
    pub name: &'static str,
    /// Current mode.
    pub state: BreakerState,
    /// Consecutive failures recorded since the last success.
    pub consecutive_failures: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    trial_in_flight: bool,
}

/// Failure-tracking gate for one collaborator relationship.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    recovery_timeout: Duration,
    clock: SharedClock,
    inner: Mutex<BreakerInner>,
}

enum Admission {
    Normal,
    Trial,
}

impl CircuitBreaker {
    /// Create a closed breaker named after the collaborator it guards.
    pub fn new(name: &'static str, settings: BreakerSettings, clock: SharedClock) -> Self {
        Self {
            name,
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: settings.recovery_timeout,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                trial_in_flight: false,
            }),
        }
    }

    /// Collaborator name used in errors and logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Current mode. An open breaker whose cool-down has elapsed still reports `Open`
    /// until a call arrives to trial it.
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// State and failure counter for health reporting.
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            name: self.name,
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    /// Invoke `operation` unless the breaker is open. Failures (`Err`) count toward the
    /// threshold; a success closes the breaker and resets the counter.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let admission = self.admit()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: matches!(admission, Admission::Trial),
        };

        let result = operation().await;
        guard.armed = false;
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        result.map_err(BreakerError::Inner)
    }

    fn admit<E>(&self) -> Result<Admission, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let now = self.clock.now();
                let elapsed = inner
                    .last_failure
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(self.recovery_timeout);
                if elapsed >= self.recovery_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.trial_in_flight = true;
                    tracing::info!(breaker = self.name, "Circuit breaker half-open; allowing trial call");
                    Ok(Admission::Trial)
                } else {
                    Err(BreakerError::Open {
                        name: self.name,
                        retry_after: self.recovery_timeout - elapsed,
                    })
                }
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(BreakerError::Open {
                        name: self.name,
                        retry_after: Duration::ZERO,
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(Admission::Trial)
                }
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.trial_in_flight = false;
        if previous != BreakerState::Closed {
            tracing::info!(breaker = self.name, "Circuit breaker closed");
        }
    }

    fn on_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(self.clock.now());
        inner.trial_in_flight = false;

        let reopen = inner.state == BreakerState::HalfOpen;
        if reopen || inner.consecutive_failures >= self.failure_threshold {
            if inner.state != BreakerState::Open {
                tracing::warn!(
                    breaker = self.name,
                    failures = inner.consecutive_failures,
                    "Circuit breaker opened"
                );
            }
            inner.state = BreakerState::Open;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Releases the half-open trial slot if the trial call is dropped before finishing.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}
