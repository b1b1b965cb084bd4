//! Error types for routing.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors raised while building a route table.
#[derive(Debug, Error)]
pub enum RouterError {
    /// A catch-all segment was followed by more segments.
    #[error("Catch-all segment `{segment}` must be the last segment of `{pattern}`")]
    NonTerminalCatchAll { pattern: String, segment: String },

    /// A dynamic segment without a name, such as `[]` or `:`.
    #[error("Invalid route pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },

    /// `insert` was given a pattern other than the descriptor's own.
    #[error("Pattern `{pattern}` does not match descriptor pattern `{descriptor}`")]
    PatternMismatch { pattern: String, descriptor: String },

    /// The pages directory does not exist.
    #[error("Pages directory not found: {path}")]
    PagesDirNotFound { path: PathBuf },

    /// IO error while scanning.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RouterError {
    pub(crate) fn invalid(pattern: &str, message: impl Into<String>) -> Self {
        RouterError::InvalidPattern {
            pattern: pattern.to_string(),
            message: message.into(),
        }
    }
}

impl From<RouterError> for trellis_core::Error {
    fn from(err: RouterError) -> Self {
        trellis_core::Error::Internal(err.to_string())
    }
}
