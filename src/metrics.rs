use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing pipeline activity.
#[derive(Default)]
pub struct PipelineMetrics {
    submissions: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    stage_attempts: AtomicU64,
    breaker_rejections: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    rate_limited: AtomicU64,
}

impl PipelineMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted submission.
    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a work item reaching `Completed`.
    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a work item reaching `Failed`.
    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one call into a collaborator, retries included.
    pub fn record_stage_attempt(&self) {
        self.stage_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call rejected by an open breaker.
    pub fn record_breaker_rejection(&self) {
        self.breaker_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cache lookup outcome.
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request denied admission.
    pub fn record_rate_limited(&self) {
        self.rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            submissions: self.submissions.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            stage_attempts: self.stage_attempts.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of pipeline counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Submissions that passed admission and validation.
    pub submissions: u64,
    /// Work items that reached `Completed`.
    pub completed: u64,
    /// Work items that reached `Failed`.
    pub failed: u64,
    /// Collaborator calls made, retries included.
    pub stage_attempts: u64,
    /// Calls rejected by an open circuit breaker.
    pub breaker_rejections: u64,
    /// Pipeline and search cache hits.
    pub cache_hits: u64,
    /// Pipeline and search cache misses.
    pub cache_misses: u64,
    /// Requests denied by the rate limiter.
    pub rate_limited: u64,
}
