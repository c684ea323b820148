//! Error types for the scalesim state model.

use thiserror::Error;

/// Result type alias for state and delta operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by the state/delta model.
///
/// All of these are contract violations: a malformed delta or a reference
/// to something the catalog does not know. Infeasibility is never an error.
#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("container delta sign {container} disagrees with entities delta sign {entities}")]
    SignMismatch { container: i64, entities: i64 },

    #[error("entities delta mixes scale-up and scale-down changes: {0}")]
    MixedEntitySigns(String),

    #[error("regional delta for {found} merged into region {expected}")]
    RegionMismatch { expected: String, found: String },

    #[error("group {group} would drop below zero for {what}")]
    NegativeCount { group: String, what: String },

    #[error("unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("unknown service: {0}")]
    UnknownService(String),

    #[error("invalid resource requirements for {0}: at least one dimension must be positive")]
    InvalidRequirements(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),
}
