#![deny(missing_docs)]

//! Core library for the Rusty Docs document-processing service.

/// HTTP routing and REST handlers.
pub mod api;
/// TTL result caches and submission fingerprints.
pub mod cache;
/// Injectable wall and monotonic clocks.
pub mod clock;
/// Extraction, recognition, and indexing contracts and bundled implementations.
pub mod collaborators;
/// Environment-driven configuration management.
pub mod config;
/// Work items, entities, and statistics.
pub mod document;
/// Deterministic text embeddings and similarity.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline counters.
pub mod metrics;
/// Document pipeline orchestration.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// Per-client fixed-window admission control.
pub mod rate_limit;
/// Retry, circuit breaker, and timeout wrappers for collaborator calls.
pub mod resilience;
/// Input validation and sanitization.
pub mod validation;
