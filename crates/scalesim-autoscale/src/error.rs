//! Adjuster error types.

use thiserror::Error;

/// Errors raised while building or running the adjuster.
#[derive(Debug, Error)]
pub enum AdjustError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("placement error: {0}")]
    Placement(#[from] scalesim_placement::PlacementError),

    #[error("state error: {0}")]
    State(#[from] scalesim_state::StateError),
}

pub type AdjustResult<T> = Result<T, AdjustError>;
