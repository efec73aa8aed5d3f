//! Error types for render engine operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for render operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Errors that can occur while generating scene data.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("Render engine not found: {0}")]
    EngineNotFound(String),

    #[error("Render engine failed: {message}")]
    EngineFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("Render engine produced no output at {0}")]
    MissingOutput(PathBuf),

    #[error("Invalid render request: {0}")]
    InvalidRequest(String),

    #[error("Render timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RenderError {
    /// Create an engine failure error.
    pub fn engine_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::EngineFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}
