//! HTTP surface for Rusty Docs.
//!
//! This module exposes a compact Axum router over the pipeline:
//!
//! - `POST /api/v1/documents` – Process one document (`filename`, `content`, optional
//!   `content_type` and `metadata`). The caller is identified by the `x-client-id` header for
//!   rate limiting.
//! - `POST /api/v1/documents/batch` – Process several documents concurrently; failures are
//!   reported per item.
//! - `GET /api/v1/documents` – Page through documents (`limit`, `offset`).
//! - `GET /api/v1/documents/:id` / `DELETE /api/v1/documents/:id` – Fetch or delete one document.
//! - `GET /api/v1/search` – Similarity search (`query`, `limit`).
//! - `GET /api/v1/search/entities` – Similarity search over comma-separated entity `terms`.
//! - `GET /api/v1/stats`, `GET /api/v1/health`, `GET /metrics` – Observability.

use crate::document::{Metadata, SearchHit, SourceDocument, Statistics, WorkItem};
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{DocumentApi, HealthReport, PipelineError, Submission};
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

/// Header carrying the caller identity used for rate limiting.
pub const CLIENT_ID_HEADER: &str = "x-client-id";
const ANONYMOUS_CLIENT: &str = "anonymous";
const DEFAULT_LIST_LIMIT: usize = 100;
const MAX_LIST_LIMIT: usize = 1000;
const DEFAULT_SEARCH_LIMIT: usize = 10;

/// Build the HTTP router exposing the document API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: DocumentApi + 'static,
{
    Router::new()
        .route(
            "/api/v1/documents",
            get(list_documents::<S>).post(submit_document::<S>),
        )
        .route("/api/v1/documents/batch", post(submit_batch::<S>))
        .route(
            "/api/v1/documents/:id",
            get(get_document::<S>).delete(delete_document::<S>),
        )
        .route("/api/v1/search", get(search::<S>))
        .route("/api/v1/search/entities", get(search_entities::<S>))
        .route("/api/v1/stats", get(get_stats::<S>))
        .route("/api/v1/health", get(get_health::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .with_state(service)
}

/// Request body for `POST /api/v1/documents`.
#[derive(Deserialize)]
struct SubmitRequest {
    /// Original file name; its extension selects the extractor.
    filename: String,
    /// Document body as UTF-8 text.
    content: String,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    metadata: Option<Metadata>,
}

impl SubmitRequest {
    fn into_submission(self) -> Submission {
        let mut source = SourceDocument::new(self.filename, self.content.into_bytes());
        if let Some(content_type) = self.content_type {
            source = source.with_content_type(content_type);
        }
        Submission {
            source,
            metadata: self.metadata,
        }
    }
}

/// Process a single document.
async fn submit_document<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<WorkItem>, AppError>
where
    S: DocumentApi,
{
    let client_id = client_id(&headers);
    let Submission { source, metadata } = request.into_submission();
    let item = service
        .submit_for_client(&client_id, source, metadata)
        .await?;
    Ok(Json(item))
}

/// Request body for `POST /api/v1/documents/batch`.
#[derive(Deserialize)]
struct BatchRequest {
    documents: Vec<SubmitRequest>,
}

/// Response body for `POST /api/v1/documents/batch`.
#[derive(Serialize)]
struct BatchResponse {
    total: usize,
    completed: usize,
    failed: usize,
    documents: Vec<WorkItem>,
}

/// Process several documents, reporting failures per item.
async fn submit_batch<S>(
    State(service): State<Arc<S>>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> Result<Json<BatchResponse>, AppError>
where
    S: DocumentApi,
{
    let client_id = client_id(&headers);
    let submissions = request
        .documents
        .into_iter()
        .map(SubmitRequest::into_submission)
        .collect();
    let documents = service
        .submit_batch_for_client(&client_id, submissions)
        .await?;
    let statistics = Statistics::from_items(&documents);
    tracing::info!(
        client_id = %client_id,
        total = statistics.total,
        completed = statistics.completed,
        failed = statistics.failed,
        "Batch request completed"
    );
    Ok(Json(BatchResponse {
        total: statistics.total,
        completed: statistics.completed,
        failed: statistics.failed,
        documents,
    }))
}

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: Option<usize>,
}

/// Page through documents in submission order.
async fn list_documents<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<ListParams>,
) -> Json<Vec<WorkItem>>
where
    S: DocumentApi,
{
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Json(service.list(limit, params.offset.unwrap_or(0)))
}

async fn get_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<WorkItem>, AppError>
where
    S: DocumentApi,
{
    service
        .get(&id)
        .map(Json)
        .ok_or_else(|| PipelineError::NotFound(id).into())
}

async fn delete_document<S>(
    State(service): State<Arc<S>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError>
where
    S: DocumentApi,
{
    if service.delete(&id).await {
        Ok(Json(json!({ "id": id, "deleted": true })))
    } else {
        Err(PipelineError::NotFound(id).into())
    }
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

/// Response body for both search endpoints.
#[derive(Serialize)]
struct SearchResponse {
    query: String,
    total: usize,
    results: Vec<SearchHit>,
}

async fn search<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: DocumentApi,
{
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let results = service.search(&params.query, limit).await?;
    Ok(Json(SearchResponse {
        query: params.query,
        total: results.len(),
        results,
    }))
}

#[derive(Deserialize)]
struct EntitySearchParams {
    /// Comma-separated entity texts.
    terms: String,
    #[serde(default)]
    limit: Option<usize>,
}

async fn search_entities<S>(
    State(service): State<Arc<S>>,
    Query(params): Query<EntitySearchParams>,
) -> Result<Json<SearchResponse>, AppError>
where
    S: DocumentApi,
{
    let terms: Vec<String> = params
        .terms
        .split(',')
        .map(|term| term.trim().to_string())
        .filter(|term| !term.is_empty())
        .collect();
    let limit = params.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
    let results = service.search_entities(&terms, limit).await?;
    Ok(Json(SearchResponse {
        query: terms.join(", "),
        total: results.len(),
        results,
    }))
}

async fn get_stats<S>(State(service): State<Arc<S>>) -> Json<Statistics>
where
    S: DocumentApi,
{
    Json(service.stats())
}

async fn get_health<S>(State(service): State<Arc<S>>) -> Json<HealthReport>
where
    S: DocumentApi,
{
    Json(service.health())
}

async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: DocumentApi,
{
    Json(service.metrics_snapshot())
}

fn client_id(headers: &HeaderMap) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(ANONYMOUS_CLIENT)
        .to_string()
}

struct AppError(PipelineError);

impl AppError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::NotFound(_) => StatusCode::NOT_FOUND,
            PipelineError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            PipelineError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            PipelineError::Lifecycle(_) | PipelineError::TaskFailed(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        }));
        let mut response = (status, body).into_response();
        if let PipelineError::CircuitOpen { retry_after, .. } = &self.0 {
            let seconds = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<PipelineError> for AppError {
    fn from(inner: PipelineError) -> Self {
        Self(inner)
    }
}
