//! Contracts for the external capabilities the pipeline drives, plus the bundled
//! in-process implementations used when no external engine is configured.

pub mod lexicon;
pub mod memory;
pub mod text;

pub use lexicon::LexiconRecognizer;
pub use memory::MemoryIndexer;
pub use text::PlainTextExtractor;

use crate::document::{Entity, SearchHit, SourceDocument, WorkItem};
use crate::qdrant::QdrantError;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// One of the three ordered pipeline steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Text extraction from the source document.
    Extraction,
    /// Named-entity recognition over extracted text.
    Recognition,
    /// Vector indexing of the finished work item.
    Indexing,
}

impl Stage {
    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extraction => "extraction",
            Self::Recognition => "recognition",
            Self::Indexing => "indexing",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text and confidence produced by an [`Extractor`].
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Extracted text.
    pub text: String,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
}

impl Extraction {
    /// Pair extracted text with its confidence.
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// Failures raised by text extraction.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The source type is not handled by this extractor.
    #[error("unsupported source type: {0}")]
    Unsupported(String),
    /// The source could not be decoded.
    #[error("unreadable source: {0}")]
    Unreadable(String),
    /// Extraction produced no text.
    #[error("no text could be extracted")]
    Empty,
    /// The extraction engine is temporarily unavailable.
    #[error("extraction engine unavailable: {0}")]
    Unavailable(String),
}

/// Failures raised by entity recognition.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// The recognition model could not be reached or loaded.
    #[error("recognition model unavailable: {0}")]
    ModelUnavailable(String),
}

/// Failures raised by the indexing backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Backend could not serve the request right now.
    #[error("index backend unavailable: {0}")]
    Unavailable(String),
    /// Qdrant rejected or failed the request.
    #[error("Qdrant request failed: {0}")]
    Qdrant(#[from] QdrantError),
}

impl IndexError {
    /// Whether repeating the call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Qdrant(error) => error.is_transient(),
        }
    }
}

/// Failure of one collaborator call, tagged with the stage it came from.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Extraction stage failed.
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// Recognition stage failed.
    #[error("entity recognition failed: {0}")]
    Recognition(#[from] RecognitionError),
    /// Indexing stage failed.
    #[error("indexing failed: {0}")]
    Indexing(#[from] IndexError),
    /// The call exceeded its time budget.
    #[error("{stage} stage timed out after {after:?}")]
    Timeout {
        /// Stage that timed out.
        stage: Stage,
        /// Budget that was exceeded.
        after: Duration,
    },
}

impl CollaboratorError {
    /// Stage the failure belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Extraction(_) => Stage::Extraction,
            Self::Recognition(_) => Stage::Recognition,
            Self::Indexing(_) => Stage::Indexing,
            Self::Timeout { stage, .. } => *stage,
        }
    }

    /// Whether the retry handler should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Extraction(ExtractionError::Unavailable(_)) => true,
            Self::Extraction(_) => false,
            Self::Recognition(_) => true,
            Self::Indexing(error) => error.is_retryable(),
            Self::Timeout { .. } => true,
        }
    }
}

/// Turns a source document into text.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract text and a confidence score from `source`.
    async fn extract(&self, source: &SourceDocument) -> Result<Extraction, ExtractionError>;
}

/// Finds entities in extracted text.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize entities in `text`. Empty input yields an empty list.
    async fn recognize(&self, text: &str) -> Result<Vec<Entity>, RecognitionError>;
}

/// Stores and queries work items by similarity.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Index `item`, returning a reference usable with [`Indexer::remove`].
    async fn index(&self, item: &WorkItem) -> Result<String, IndexError>;

    /// Remove a previously indexed item. Returns `false` when the reference was unknown.
    async fn remove(&self, index_ref: &str) -> Result<bool, IndexError>;

    /// Items most similar to `text`, best first, scores in `[0, 1]`.
    async fn query(&self, text: &str, limit: usize) -> Result<Vec<SearchHit>, IndexError>;
}
