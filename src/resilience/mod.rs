//! Resilience primitives wrapped around every collaborator call.

pub mod breaker;
pub mod retry;
pub mod stage;

pub use breaker::{BreakerError, BreakerSnapshot, BreakerState, CircuitBreaker};
pub use retry::RetryPolicy;
pub use stage::{ResilientStage, StageError};
