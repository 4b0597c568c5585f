//! Error types for fitted-model handling

use crate::serde_canon::CanonicalError;
use thiserror::Error;

/// Errors raised while describing, validating or evaluating a fitted model
#[derive(Error, Debug)]
pub enum ModelError {
    /// Model family, task, class count or link does not fit an additive export
    #[error("Unsupported model kind: {0}")]
    UnsupportedModelKind(String),

    /// Threshold/score arrays are inconsistent
    #[error("Malformed bins: {0}")]
    MalformedBins(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Canonical serialization error
    #[error("Canonical serialization error: {0}")]
    Canonical(#[from] CanonicalError),

    /// Failure reported by an external collaborator (trainer, plot sink)
    #[error("External collaborator failed: {0}")]
    External(String),
}

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;
