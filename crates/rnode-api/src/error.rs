//! API client error types.

use thiserror::Error;

/// Result type for coordinator API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors that can occur while talking to the coordinator.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{what} failed with status {status}: {message}")]
    UnexpectedStatus {
        what: String,
        status: u16,
        message: String,
    },

    #[error("Missing response header: {0}")]
    MissingHeader(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] cacache::Error),
}

impl ApiError {
    pub fn unexpected_status(what: impl Into<String>, status: reqwest::StatusCode) -> Self {
        Self::UnexpectedStatus {
            what: what.into(),
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP status code, if the coordinator answered at all.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ApiError::UnexpectedStatus { status, .. } => Some(*status),
            ApiError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
