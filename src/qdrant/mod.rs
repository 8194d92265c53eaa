//! Qdrant vector store integration.

pub mod client;
pub mod indexer;
pub mod types;

pub use client::QdrantService;
pub use indexer::QdrantIndexer;
pub use types::{QdrantError, ScoredPoint};
