//! Document pipeline: lifecycle, resilient stage sequencing, batching, and the store.

mod service;
pub mod store;
pub mod types;

pub use service::{DocumentApi, PipelineBuilder, PipelineOrchestrator};
pub use store::DocumentStore;
pub use types::{HealthReport, HealthStatus, PipelineError, Submission};
