//! Placement error types.

use thiserror::Error;

/// Configuration errors raised while building the PSO pipeline.
///
/// An infeasible demand is not an error: it shows up as an empty option
/// list or a worst score.
#[derive(Debug, Error, PartialEq)]
pub enum PlacementError {
    #[error("unknown placement hint: {0}")]
    UnknownHint(String),

    #[error("unknown score calculator: {0}")]
    UnknownScoreCalculator(String),

    #[error("unknown optimizer: {0}")]
    UnknownOptimizer(String),

    #[error("service {service} requires unknown container type {node_type}")]
    UnknownContainerType { service: String, node_type: String },

    #[error("state error: {0}")]
    State(#[from] scalesim_state::StateError),
}

pub type PlacementResult<T> = Result<T, PlacementError>;
