//! Model error types.

use thiserror::Error;

use skenario_sim::SimError;

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors raised while configuring or running a scenario.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("decider failed: {0}")]
    Decider(String),

    #[error("metrics collector error: {0}")]
    Collector(String),

    #[error("simulation error: {0}")]
    Sim(#[from] SimError),
}
