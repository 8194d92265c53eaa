//! Error and report types shared by the orchestrator and its callers.

use crate::collaborators::{CollaboratorError, Stage};
use crate::document::{InvalidTransition, Metadata, SourceDocument};
use crate::rate_limit::RateLimitRejection;
use crate::resilience::{BreakerError, BreakerSnapshot, BreakerState, StageError};
use crate::validation::ValidationError;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::pipeline::PipelineOrchestrator`] operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller input was rejected before any work started.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A collaborator failed terminally: non-retryable, or retries were exhausted.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    /// A breaker rejected the call without contacting the collaborator.
    #[error("{stage} circuit is open; retry after {retry_after:?}")]
    CircuitOpen {
        /// Stage whose breaker is open.
        stage: Stage,
        /// Remaining cool-down.
        retry_after: Duration,
    },
    /// The client exceeded an admission window.
    #[error(transparent)]
    RateLimited(#[from] RateLimitRejection),
    /// No document with this id exists.
    #[error("document not found: {0}")]
    NotFound(String),
    /// A work item was asked to make a transition its lifecycle forbids.
    #[error(transparent)]
    Lifecycle(#[from] InvalidTransition),
    /// The task driving the document panicked or was aborted.
    #[error("processing task failed: {0}")]
    TaskFailed(String),
}

impl PipelineError {
    /// Map a [`StageError`] from `stage` into the caller-facing taxonomy.
    pub fn from_stage(stage: Stage, error: StageError) -> Self {
        match error {
            BreakerError::Open { retry_after, .. } => Self::CircuitOpen { stage, retry_after },
            BreakerError::Inner(inner) => Self::Collaborator(inner),
        }
    }

    /// Whether the same request may succeed if repeated later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Collaborator(error) => error.is_retryable(),
            Self::CircuitOpen { .. } | Self::RateLimited(_) => true,
            Self::Validation(_)
            | Self::NotFound(_)
            | Self::Lifecycle(_)
            | Self::TaskFailed(_) => false,
        }
    }
}

/// One entry of a batch submission.
#[derive(Debug, Clone)]
pub struct Submission {
    /// Document to process.
    pub source: SourceDocument,
    /// Optional caller metadata.
    pub metadata: Option<Metadata>,
}

impl Submission {
    /// Submission without metadata.
    pub fn new(source: SourceDocument) -> Self {
        Self {
            source,
            metadata: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl From<SourceDocument> for Submission {
    fn from(source: SourceDocument) -> Self {
        Self::new(source)
    }
}

/// Overall service condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every breaker is closed.
    Healthy,
    /// At least one breaker is open or probing.
    Degraded,
}

/// Breaker states and store size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// Aggregate condition.
    pub status: HealthStatus,
    /// One entry per stage breaker.
    pub breakers: Vec<BreakerSnapshot>,
    /// Documents currently held in the store.
    pub documents: usize,
}

impl HealthReport {
    /// Build a report, deriving the aggregate status from `breakers`.
    pub fn new(breakers: Vec<BreakerSnapshot>, documents: usize) -> Self {
        let status = if breakers
            .iter()
            .all(|breaker| breaker.state == BreakerState::Closed)
        {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            breakers,
            documents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ExtractionError, RecognitionError};
    use crate::rate_limit::RateWindow;

    #[test]
    fn open_breaker_maps_to_circuit_open() {
        let error = PipelineError::from_stage(
            Stage::Recognition,
            BreakerError::Open {
                name: "recognition",
                retry_after: Duration::from_secs(5),
            },
        );
        assert!(matches!(
            error,
            PipelineError::CircuitOpen {
                stage: Stage::Recognition,
                ..
            }
        ));
        assert!(error.is_retryable());
    }

    #[test]
    fn retryability_distinguishes_exhausted_from_permanent() {
        let exhausted = PipelineError::from_stage(
            Stage::Recognition,
            BreakerError::Inner(RecognitionError::ModelUnavailable("down".into()).into()),
        );
        let permanent = PipelineError::from_stage(
            Stage::Extraction,
            BreakerError::Inner(ExtractionError::Unsupported(".pdf".into()).into()),
        );
        assert!(exhausted.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!PipelineError::NotFound("x".into()).is_retryable());
        assert!(!PipelineError::TaskFailed("worker panicked".into()).is_retryable());
        assert!(
            PipelineError::from(RateLimitRejection {
                window: RateWindow::Minute,
                limit: 60
            })
            .is_retryable()
        );
    }

    #[test]
    fn any_open_breaker_degrades_health() {
        let closed = BreakerSnapshot {
            name: "extraction",
            state: BreakerState::Closed,
            consecutive_failures: 0,
        };
        let open = BreakerSnapshot {
            name: "indexing",
            state: BreakerState::Open,
            consecutive_failures: 5,
        };
        assert_eq!(HealthReport::new(vec![closed], 0).status, HealthStatus::Healthy);
        assert_eq!(
            HealthReport::new(vec![closed, open], 2).status,
            HealthStatus::Degraded
        );
    }
}
