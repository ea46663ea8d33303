//! Error types for notebook reading.

use std::path::PathBuf;

/// Result type for notebook reading.
pub type IpynbResult<T> = Result<T, IpynbError>;

/// Errors that can occur while reading a notebook.
#[derive(Debug, thiserror::Error)]
pub enum IpynbError {
    /// Failed to read the notebook file.
    #[error("Failed to read file {path}: {message}")]
    ReadError { path: PathBuf, message: String },

    /// Failed to deserialize JSON.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Not a notebook this crate can read.
    #[error("Invalid notebook: {0}")]
    InvalidNotebook(String),
}
