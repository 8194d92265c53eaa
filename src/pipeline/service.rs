//! Orchestrator sequencing extraction, recognition, and indexing for each document.

use crate::{
    cache::{ResultCache, search_fingerprint, source_fingerprint},
    clock::{SharedClock, SystemClock},
    collaborators::{
        CollaboratorError, ExtractionError, Extractor, Indexer, LexiconRecognizer, MemoryIndexer,
        PlainTextExtractor, Recognizer, Stage,
    },
    config::Config,
    document::{Entity, Metadata, SearchHit, SourceDocument, Statistics, WorkItem},
    embedding::HashingEmbedder,
    metrics::{MetricsSnapshot, PipelineMetrics},
    pipeline::{
        store::DocumentStore,
        types::{HealthReport, PipelineError, Submission},
    },
    rate_limit::RateLimiter,
    resilience::{ResilientStage, RetryPolicy},
    validation::{SourceValidator, validate_limit, validate_metadata, validate_search_query},
};
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

/// Surface consumed by the HTTP layer and the batch CLI.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Rate-limit `client_id`, then process one document.
    async fn submit_for_client(
        &self,
        client_id: &str,
        source: SourceDocument,
        metadata: Option<Metadata>,
    ) -> Result<WorkItem, PipelineError>;

    /// Rate-limit `client_id` once, then process every submission.
    async fn submit_batch_for_client(
        &self,
        client_id: &str,
        submissions: Vec<Submission>,
    ) -> Result<Vec<WorkItem>, PipelineError>;

    /// Document with `id`, if present.
    fn get(&self, id: &str) -> Option<WorkItem>;

    /// Page through documents in submission order.
    fn list(&self, limit: usize, offset: usize) -> Vec<WorkItem>;

    /// Delete a document. Returns `false` when it does not exist.
    async fn delete(&self, id: &str) -> bool;

    /// Similarity search over indexed documents.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, PipelineError>;

    /// Similarity search using entity texts as the query.
    async fn search_entities(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>, PipelineError>;

    /// Aggregates over the live store.
    fn stats(&self) -> Statistics;

    /// Breaker states and store size.
    fn health(&self) -> HealthReport;

    /// Pipeline counters.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Coordinates the document lifecycle: admission, caching, the three resilient stages,
/// batch fan-out, and the read paths over the document store.
///
/// Every shared structure (store, caches, breakers, rate counters) carries its own lock,
/// held only for bookkeeping; no lock is held while a stage runs. Cloning is cheap and
/// clones share state.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Orchestrator>,
}

struct Orchestrator {
    extractor: Arc<dyn Extractor>,
    recognizer: Arc<dyn Recognizer>,
    indexer: Arc<dyn Indexer>,
    extraction: ResilientStage,
    recognition: ResilientStage,
    indexing: ResilientStage,
    store: DocumentStore,
    documents: ResultCache<WorkItem>,
    searches: ResultCache<Vec<SearchHit>>,
    limiter: RateLimiter,
    validator: SourceValidator,
    workers: Arc<Semaphore>,
    clock: SharedClock,
    metrics: Arc<PipelineMetrics>,
}

/// Why a submission did not complete, with the failed record when one was created.
struct Failure {
    item: Option<WorkItem>,
    error: PipelineError,
}

impl Failure {
    fn rejected(error: impl Into<PipelineError>) -> Self {
        Self {
            item: None,
            error: error.into(),
        }
    }
}

/// Assembles a [`PipelineOrchestrator`] from configuration and collaborators. Anything
/// not supplied falls back to the bundled in-process implementation.
pub struct PipelineBuilder {
    config: Config,
    extractor: Option<Arc<dyn Extractor>>,
    recognizer: Option<Arc<dyn Recognizer>>,
    indexer: Option<Arc<dyn Indexer>>,
    clock: Option<SharedClock>,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl PipelineBuilder {
    /// Use `extractor` for the extraction stage.
    pub fn extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Use `recognizer` for the recognition stage.
    pub fn recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Use `indexer` for the indexing stage.
    pub fn indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Read time from `clock`.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Record counters into `metrics`.
    pub fn metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Wire the breakers, caches, limiter, and worker pool.
    pub fn build(self) -> PipelineOrchestrator {
        let Self {
            config,
            extractor,
            recognizer,
            indexer,
            clock,
            metrics,
        } = self;

        let clock = clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = metrics.unwrap_or_default();
        let retry = RetryPolicy::from(config.retry);
        let stage = |stage, breaker| {
            ResilientStage::new(
                stage,
                retry,
                breaker,
                config.stage_timeout,
                clock.clone(),
                metrics.clone(),
            )
        };

        let inner = Orchestrator {
            extractor: extractor.unwrap_or_else(|| Arc::new(PlainTextExtractor::new())),
            recognizer: recognizer.unwrap_or_else(|| Arc::new(LexiconRecognizer::default())),
            indexer: indexer.unwrap_or_else(|| {
                Arc::new(MemoryIndexer::new(HashingEmbedder::new(
                    config.embedding_dimension,
                )))
            }),
            extraction: stage(Stage::Extraction, config.extraction_breaker),
            recognition: stage(Stage::Recognition, config.recognition_breaker),
            indexing: stage(Stage::Indexing, config.indexing_breaker),
            store: DocumentStore::new(),
            documents: ResultCache::new(
                "documents",
                config.cache_ttl,
                config.cache_capacity,
                clock.clone(),
            )
            .with_metrics(metrics.clone()),
            searches: ResultCache::new(
                "searches",
                config.cache_ttl,
                config.cache_capacity,
                clock.clone(),
            ),
            limiter: RateLimiter::new(config.rate_limit),
            validator: SourceValidator::from_config(&config),
            workers: Arc::new(Semaphore::new(config.worker_pool_size.max(1))),
            clock,
            metrics,
        };

        tracing::debug!(
            workers = config.worker_pool_size,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "Pipeline orchestrator ready"
        );
        PipelineOrchestrator {
            inner: Arc::new(inner),
        }
    }
}

impl PipelineOrchestrator {
    /// Start building an orchestrator from `config`.
    pub fn builder(config: Config) -> PipelineBuilder {
        PipelineBuilder {
            config,
            extractor: None,
            recognizer: None,
            indexer: None,
            clock: None,
            metrics: None,
        }
    }

    /// Admit one request from `client_id`, or report which window is exhausted.
    pub fn admit(&self, client_id: &str) -> Result<(), PipelineError> {
        self.inner
            .limiter
            .check_and_consume(client_id, self.inner.clock.utc())
            .map_err(|rejection| {
                self.inner.metrics.record_rate_limited();
                PipelineError::RateLimited(rejection)
            })
    }

    /// Process one document to completion.
    ///
    /// Identical submissions (same file name, type, content, and metadata) made within the
    /// cache TTL return the earlier result without calling any collaborator; an identical
    /// submission arriving while the first is still running waits for it.
    ///
    /// Once a worker is obtained the document runs on its own task, so dropping the
    /// returned future does not stop it short of `Completed` or `Failed`.
    pub async fn submit(
        &self,
        source: SourceDocument,
        metadata: Option<Metadata>,
    ) -> Result<WorkItem, PipelineError> {
        let permit = self.inner.acquire_worker().await;
        let worker = self.inner.clone();
        tokio::spawn(async move { worker.run(source, metadata, permit).await })
            .await
            .map_err(|join_error| PipelineError::TaskFailed(join_error.to_string()))?
            .map_err(|failure| failure.error)
    }

    /// [`Self::admit`] followed by [`Self::submit`].
    pub async fn submit_for_client(
        &self,
        client_id: &str,
        source: SourceDocument,
        metadata: Option<Metadata>,
    ) -> Result<WorkItem, PipelineError> {
        self.admit(client_id)?;
        self.submit(source, metadata).await
    }

    /// Process every submission concurrently on the worker pool.
    ///
    /// The result has one item per submission, in input order; failures appear as
    /// `Failed` items. Dropping the returned future abandons submissions that have not
    /// yet obtained a worker, while those already running finish normally.
    pub async fn process_batch(&self, submissions: Vec<Submission>) -> Vec<WorkItem> {
        tracing::info!(items = submissions.len(), "Processing batch");
        let tasks = submissions.into_iter().map(|submission| {
            let inner = self.inner.clone();
            async move {
                let placeholder = WorkItem::pending(
                    Uuid::new_v4().to_string(),
                    &submission.source,
                    submission.metadata.clone(),
                    inner.clock.utc(),
                );
                let permit = inner.acquire_worker().await;
                let worker = inner.clone();
                let handle = tokio::spawn(async move {
                    worker
                        .run(submission.source, submission.metadata, permit)
                        .await
                });
                match handle.await {
                    Ok(Ok(item)) => item,
                    Ok(Err(Failure {
                        item: Some(item), ..
                    })) => item,
                    Ok(Err(Failure { item: None, error })) => {
                        inner.record_rejected(placeholder, error.to_string())
                    }
                    Err(join_error) => inner.record_rejected(
                        placeholder,
                        format!("processing task failed: {join_error}"),
                    ),
                }
            }
        });
        join_all(tasks).await
    }

    /// [`Self::admit`] once for the whole batch, then [`Self::process_batch`].
    pub async fn submit_batch_for_client(
        &self,
        client_id: &str,
        submissions: Vec<Submission>,
    ) -> Result<Vec<WorkItem>, PipelineError> {
        self.admit(client_id)?;
        Ok(self.process_batch(submissions).await)
    }

    /// Document with `id`, if present.
    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.inner.store.get(id)
    }

    /// Up to `limit` documents after `offset`, in submission order.
    pub fn list(&self, limit: usize, offset: usize) -> Vec<WorkItem> {
        self.inner.store.list(limit, offset)
    }

    /// Remove a document, its index entry (best effort), and every cache entry that
    /// references it. Returns `false` when the id is unknown; repeated calls are safe.
    pub async fn delete(&self, id: &str) -> bool {
        let inner = &self.inner;
        let Some(item) = inner.store.remove(id) else {
            tracing::debug!(document_id = id, "Delete requested for unknown document");
            return false;
        };
        if let Some(index_ref) = item.index_ref.as_deref() {
            inner.remove_from_index(index_ref, id).await;
        }
        let documents = inner.documents.invalidate_where(|_, cached| cached.id == id);
        let searches = inner
            .searches
            .invalidate_where(|_, hits| hits.iter().any(|hit| hit.document.id == id));
        tracing::info!(
            document_id = id,
            purged_documents = documents,
            purged_searches = searches,
            "Document deleted"
        );
        true
    }

    /// Documents most similar to `query`, best first.
    ///
    /// Invalid queries and limits are rejected; index failures degrade to an empty list.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, PipelineError> {
        let query = validate_search_query(query)?;
        let limit = validate_limit(limit)?;
        Ok(self.inner.search_index("text", &query, limit).await)
    }

    /// Documents most similar to the given entity texts.
    pub async fn search_entities(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        let joined = terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let query = validate_search_query(&joined)?;
        let limit = validate_limit(limit)?;
        Ok(self.inner.search_index("entities", &query, limit).await)
    }

    /// Aggregates computed from the live store.
    pub fn stats(&self) -> Statistics {
        Statistics::from_items(&self.inner.store.snapshot())
    }

    /// Breaker states and store size.
    pub fn health(&self) -> HealthReport {
        let inner = &self.inner;
        HealthReport::new(
            vec![
                inner.extraction.breaker_snapshot(),
                inner.recognition.breaker_snapshot(),
                inner.indexing.breaker_snapshot(),
            ],
            inner.store.len(),
        )
    }

    /// Pipeline counters.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl Orchestrator {
    async fn acquire_worker(&self) -> Option<OwnedSemaphorePermit> {
        match self.workers.clone().acquire_owned().await {
            Ok(permit) => Some(permit),
            Err(error) => {
                tracing::warn!(error = %error, "Worker pool closed; running unbounded");
                None
            }
        }
    }

    /// Holds `_permit` for the whole run. Every caller takes the worker permit before the
    /// flight gate, never the other way round.
    async fn run(
        &self,
        source: SourceDocument,
        metadata: Option<Metadata>,
        _permit: Option<OwnedSemaphorePermit>,
    ) -> Result<WorkItem, Failure> {
        let metadata = metadata
            .map(validate_metadata)
            .transpose()
            .map_err(Failure::rejected)?;
        self.validator
            .validate(&source)
            .map_err(Failure::rejected)?;
        self.metrics.record_submission();

        let key = source_fingerprint(&source, metadata.as_ref());
        let gate = self.store.flight_gate(&key);
        let outcome = {
            let _turn = gate.lock().await;
            match self.documents.get(&key) {
                Some(item) => {
                    tracing::debug!(document_id = %item.id, "Returning cached result");
                    Ok(item)
                }
                None => self.process(&key, source, metadata).await,
            }
        };
        self.store.release_flight_gate(&key, gate);
        outcome
    }

    async fn process(
        &self,
        key: &str,
        source: SourceDocument,
        metadata: Option<Metadata>,
    ) -> Result<WorkItem, Failure> {
        let started = self.clock.now();
        let mut item = WorkItem::pending(
            Uuid::new_v4().to_string(),
            &source,
            metadata,
            self.clock.utc(),
        );
        self.store.insert(item.clone());
        tracing::info!(document_id = %item.id, filename = %item.filename, "Document accepted");

        if let Err(error) = item.begin_processing(self.clock.utc()) {
            return Err(self.fail(item, error.into(), started));
        }
        self.store.replace_if_present(&item);

        match self.run_stages(&mut item, &source).await {
            Ok(index_ref) => self.finish(key, item, index_ref, started).await,
            Err(error) => Err(self.fail(item, error, started)),
        }
    }

    async fn run_stages(
        &self,
        item: &mut WorkItem,
        source: &SourceDocument,
    ) -> Result<String, PipelineError> {
        let extractor = &self.extractor;
        let extraction = self
            .extraction
            .run(move || async move {
                let extraction = extractor.extract(source).await?;
                if extraction.text.trim().is_empty() {
                    return Err(CollaboratorError::from(ExtractionError::Empty));
                }
                Ok::<_, CollaboratorError>(extraction)
            })
            .await
            .map_err(|error| PipelineError::from_stage(Stage::Extraction, error))?;
        item.record_extraction(extraction.text, extraction.confidence, self.clock.utc());
        self.store.replace_if_present(item);
        tracing::debug!(document_id = %item.id, confidence = extraction.confidence, "Text extracted");

        let recognizer = &self.recognizer;
        let text = item.extracted_text.as_deref().unwrap_or_default();
        let entities = self
            .recognition
            .run(move || async move {
                recognizer
                    .recognize(text)
                    .await
                    .map_err(CollaboratorError::from)
            })
            .await
            .map_err(|error| PipelineError::from_stage(Stage::Recognition, error))?;
        let (entities, malformed): (Vec<Entity>, Vec<Entity>) =
            entities.into_iter().partition(Entity::is_well_formed);
        if !malformed.is_empty() {
            tracing::debug!(
                document_id = %item.id,
                dropped = malformed.len(),
                "Dropped malformed entities"
            );
        }
        item.record_entities(entities, self.clock.utc());
        self.store.replace_if_present(item);

        let indexer = &self.indexer;
        let snapshot: &WorkItem = item;
        self.indexing
            .run(move || async move { indexer.index(snapshot).await.map_err(CollaboratorError::from) })
            .await
            .map_err(|error| PipelineError::from_stage(Stage::Indexing, error))
    }

    async fn finish(
        &self,
        key: &str,
        mut item: WorkItem,
        index_ref: String,
        started: Instant,
    ) -> Result<WorkItem, Failure> {
        let elapsed = self.elapsed_since(started);
        if let Err(error) = item.complete(index_ref.clone(), elapsed, self.clock.utc()) {
            self.remove_from_index(&index_ref, &item.id).await;
            return Err(self.fail(item, error.into(), started));
        }
        if !self.store.replace_if_present(&item) {
            tracing::warn!(document_id = %item.id, "Document deleted while processing; discarding result");
            self.remove_from_index(&index_ref, &item.id).await;
            return Ok(item);
        }

        self.documents.insert(key.to_string(), item.clone());
        self.searches.clear();
        self.metrics.record_completed();
        tracing::info!(
            document_id = %item.id,
            entities = item.entity_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "Document processing completed"
        );
        Ok(item)
    }

    fn fail(&self, mut item: WorkItem, error: PipelineError, started: Instant) -> Failure {
        if let Err(transition) =
            item.fail(error.to_string(), self.elapsed_since(started), self.clock.utc())
        {
            tracing::error!(document_id = %item.id, error = %transition, "Could not mark document failed");
        }
        self.store.replace_if_present(&item);
        self.metrics.record_failed();
        tracing::error!(
            document_id = %item.id,
            retryable = error.is_retryable(),
            error = %error,
            "Document processing failed"
        );
        Failure {
            item: Some(item),
            error,
        }
    }

    /// Store a `Failed` record for a batch entry that never produced one.
    fn record_rejected(&self, mut placeholder: WorkItem, message: String) -> WorkItem {
        if let Err(transition) = placeholder.fail(message, Duration::ZERO, self.clock.utc()) {
            tracing::error!(document_id = %placeholder.id, error = %transition, "Could not mark document failed");
        }
        self.store.insert(placeholder.clone());
        self.metrics.record_failed();
        tracing::error!(
            document_id = %placeholder.id,
            filename = %placeholder.filename,
            error = placeholder.error_message.as_deref().unwrap_or_default(),
            "Batch item rejected"
        );
        placeholder
    }

    async fn remove_from_index(&self, index_ref: &str, document_id: &str) {
        let indexer = &self.indexer;
        match self
            .indexing
            .run(move || async move {
                indexer
                    .remove(index_ref)
                    .await
                    .map_err(CollaboratorError::from)
            })
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(document_id, index_ref, "Index entry already absent");
            }
            Err(error) => {
                tracing::warn!(document_id, index_ref, error = %error, "Failed to remove index entry");
            }
        }
    }

    async fn search_index(&self, kind: &str, query: &str, limit: usize) -> Vec<SearchHit> {
        let key = search_fingerprint(kind, query, limit);
        let indexing = &self.indexing;
        let indexer = &self.indexer;
        let result = self
            .searches
            .get_or_compute(&key, move || async move {
                indexing
                    .run(move || async move {
                        indexer
                            .query(query, limit)
                            .await
                            .map_err(CollaboratorError::from)
                    })
                    .await
            })
            .await;

        match result {
            Ok(hits) => hits
                .into_iter()
                .filter_map(|hit| {
                    self.store.get(&hit.document.id).map(|document| SearchHit {
                        document,
                        score: hit.score,
                    })
                })
                .collect(),
            Err(error) => {
                tracing::warn!(kind, error = %error, "Search failed; returning no results");
                Vec::new()
            }
        }
    }

    fn elapsed_since(&self, started: Instant) -> Duration {
        self.clock.now().saturating_duration_since(started)
    }
}

#[async_trait]
impl DocumentApi for PipelineOrchestrator {
    async fn submit_for_client(
        &self,
        client_id: &str,
        source: SourceDocument,
        metadata: Option<Metadata>,
    ) -> Result<WorkItem, PipelineError> {
        PipelineOrchestrator::submit_for_client(self, client_id, source, metadata).await
    }

    async fn submit_batch_for_client(
        &self,
        client_id: &str,
        submissions: Vec<Submission>,
    ) -> Result<Vec<WorkItem>, PipelineError> {
        PipelineOrchestrator::submit_batch_for_client(self, client_id, submissions).await
    }

    fn get(&self, id: &str) -> Option<WorkItem> {
        PipelineOrchestrator::get(self, id)
    }

    fn list(&self, limit: usize, offset: usize) -> Vec<WorkItem> {
        PipelineOrchestrator::list(self, limit, offset)
    }

    async fn delete(&self, id: &str) -> bool {
        PipelineOrchestrator::delete(self, id).await
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, PipelineError> {
        PipelineOrchestrator::search(self, query, limit).await
    }

    async fn search_entities(
        &self,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        PipelineOrchestrator::search_entities(self, terms, limit).await
    }

    fn stats(&self) -> Statistics {
        PipelineOrchestrator::stats(self)
    }

    fn health(&self) -> HealthReport {
        PipelineOrchestrator::health(self)
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        PipelineOrchestrator::metrics_snapshot(self)
    }
}
