//! Error types for module compilation.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Errors that can occur while compiling a module.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Source file not found.
    #[error("Module not found: {path}")]
    NotFound { path: PathBuf },

    /// Path resolves outside the project root.
    #[error("Module path escapes the project root: {path}")]
    Forbidden { path: PathBuf },

    /// Not a script source, or inside a hidden file or directory.
    #[error("Module path is not a servable source: {path}")]
    NotServable { path: PathBuf },

    /// A bare import that is neither aliased nor declared external.
    #[error("Cannot resolve import '{specifier}' from {importer}")]
    UnresolvedImport { specifier: String, importer: PathBuf },

    /// Relative imports form a cycle.
    #[error("Circular import: {}", format_chain(.chain))]
    CircularImport { chain: Vec<PathBuf> },

    /// The source transform rejected the file.
    #[error("Transform failed for {path}: {message}")]
    Transform { path: PathBuf, message: String },

    /// Background compile task failed.
    #[error("Compile task failed: {0}")]
    Task(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl CompileError {
    /// Create a transform error.
    pub fn transform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        CompileError::Transform {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<CompileError> for trellis_core::Error {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::NotFound { path } => {
                trellis_core::Error::ModuleNotFound(path.display().to_string())
            }
            CompileError::Forbidden { path } | CompileError::NotServable { path } => {
                trellis_core::Error::Forbidden(path.display().to_string())
            }
            other => {
                let path = match &other {
                    CompileError::UnresolvedImport { importer, .. } => Some(importer),
                    CompileError::Transform { path, .. } => Some(path),
                    CompileError::CircularImport { chain } => chain.first(),
                    _ => None,
                };
                trellis_core::Error::ModuleCompile {
                    path: path.map(|p| p.display().to_string()).unwrap_or_default(),
                    message: other.to_string(),
                }
            }
        }
    }
}
