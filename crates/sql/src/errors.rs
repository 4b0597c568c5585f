//! Error types for the SQL export pipeline

use glassbox_model::ModelError;
use thiserror::Error;

/// Errors that abort a build. Nothing is retried and no artifact is written.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Introspection or model validation failure
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Calibration is configured but no curve was supplied
    #[error("Missing calibration curve: {0}")]
    MissingCalibrationCurve(String),

    /// A boolean-like option holds an unrecognized value
    #[error("Unsupported value for '{key}': {value} (expected \"true\" or \"false\")")]
    UnsupportedSplitConfiguration { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Compiled output disagrees with the reference evaluator
    #[error("Verification failed: {0}")]
    Verification(String),

    #[cfg(feature = "sqlite-verify")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[cfg(feature = "sqlite-verify")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for export operations
pub type Result<T> = std::result::Result<T, ExportError>;
