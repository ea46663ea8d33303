//! Error types for nbreplay-core.

use thiserror::Error;

/// Result type for nbreplay-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in nbreplay-core.
///
/// Code that raises inside the interpreter and outputs that differ from the
/// stored ones are not errors: they are cell outcomes.
#[derive(Debug, Error)]
pub enum Error {
    /// No correlated message arrived within the timeout.
    #[error("timed out after {seconds}s waiting for the interpreter")]
    TimedOut { seconds: u64 },

    /// Interpreter-level fault unrelated to the executed code.
    #[error("session failure: {0}")]
    Session(String),

    /// A correlated message could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The cell cannot be run as written.
    #[error("malformed cell: {0}")]
    MalformedCell(String),

    /// An output selector that is not registered.
    #[error("unknown output selector: {0}")]
    UnknownSelector(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error is a listen timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut { .. })
    }

    /// Whether this error means the interpreter itself misbehaved.
    pub fn is_session_failure(&self) -> bool {
        matches!(self, Error::Session(_) | Error::Protocol(_) | Error::Io(_) | Error::Json(_))
    }
}
