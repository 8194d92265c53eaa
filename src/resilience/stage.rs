//! Composition of timeout, retry, and circuit breaker for one collaborator.

use crate::clock::SharedClock;
use crate::collaborators::{CollaboratorError, Stage};
use crate::config::BreakerSettings;
use crate::metrics::PipelineMetrics;
use crate::resilience::{BreakerError, BreakerSnapshot, CircuitBreaker, RetryPolicy};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Failure surfaced by a [`ResilientStage`].
pub type StageError = BreakerError<CollaboratorError>;

/// `breaker(retry(timeout(call)))`, built once per collaborator at startup.
///
/// The breaker sits outermost: an open breaker rejects before any attempt is made, and
/// one exhausted retry sequence counts as a single breaker failure.
pub struct ResilientStage {
    stage: Stage,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl ResilientStage {
    /// Assemble the wrapper for `stage`.
    pub fn new(
        stage: Stage,
        retry: RetryPolicy,
        breaker: BreakerSettings,
        timeout: Duration,
        clock: SharedClock,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            stage,
            breaker: CircuitBreaker::new(stage.as_str(), breaker, clock),
            retry,
            timeout,
            metrics,
        }
    }

    /// Stage guarded by this wrapper.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Breaker state for health reporting.
    pub fn breaker_snapshot(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    /// Run `operation` through the breaker, retrying retryable failures and bounding each
    /// attempt by the stage timeout.
    pub async fn run<T, F, Fut>(&self, operation: F) -> Result<T, StageError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let operation = &operation;
        let result = self
            .breaker
            .call(|| {
                self.retry.execute(
                    move || self.attempt(operation),
                    CollaboratorError::is_retryable,
                )
            })
            .await;

        if let Err(BreakerError::Open { retry_after, .. }) = &result {
            self.metrics.record_breaker_rejection();
            tracing::warn!(
                stage = %self.stage,
                retry_after_ms = retry_after.as_millis() as u64,
                "Stage call rejected by open circuit"
            );
        }
        result
    }

    async fn attempt<T, F, Fut>(&self, operation: &F) -> Result<T, CollaboratorError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        self.metrics.record_stage_attempt();
        match tokio::time::timeout(self.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::Timeout {
                stage: self.stage,
                after: self.timeout,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::collaborators::{ExtractionError, RecognitionError};
    use crate::resilience::BreakerState;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn stage(threshold: u32, timeout: Duration) -> ResilientStage {
        ResilientStage::new(
            Stage::Recognition,
            RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0),
            BreakerSettings::new(threshold, 30),
            timeout,
            Arc::new(ManualClock::default()),
            Arc::new(PipelineMetrics::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_count_as_one_breaker_failure() {
        let stage = stage(2, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), StageError> = stage
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::from(RecognitionError::ModelUnavailable(
                    "offline".into(),
                )))
            })
            .await;

        assert!(matches!(
            result,
            Err(BreakerError::Inner(CollaboratorError::Recognition(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(stage.breaker_snapshot().consecutive_failures, 1);
        assert_eq!(stage.breaker_snapshot().state, BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_skips_retries() {
        let stage = stage(1, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let failing = || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(CollaboratorError::from(RecognitionError::ModelUnavailable(
                "offline".into(),
            )))
        };
        let _ = stage.run(failing).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let result = stage.run(failing).await;
        assert!(matches!(result, Err(BreakerError::Open { name: "recognition", .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_is_not_retried() {
        let stage = stage(5, Duration::from_secs(1));
        let calls = AtomicU32::new(0);
        let result: Result<(), StageError> = stage
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CollaboratorError::from(ExtractionError::Unsupported(
                    ".exe".into(),
                )))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_are_retried() {
        let stage = stage(5, Duration::from_millis(100));
        let calls = AtomicU32::new(0);
        let result = stage
            .run(|| {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                    }
                    Ok::<_, CollaboratorError>(call)
                }
            })
            .await;

        assert_eq!(result.expect("second attempt succeeds"), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
