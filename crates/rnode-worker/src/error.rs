//! Worker error types.

use std::time::Duration;

use thiserror::Error;

use rnode_api::ApiError;
use rnode_queue::QueueError;
use rnode_render::RenderError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Coarse classification used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    Fetch,
    Download,
    Render,
    Upload,
    Timeout,
    ChannelClosed,
    Io,
    Queue,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Decode => "decode",
            ErrorKind::Fetch => "fetch",
            ErrorKind::Download => "download",
            ErrorKind::Render => "render",
            ErrorKind::Upload => "upload",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ChannelClosed => "channel_closed",
            ErrorKind::Io => "io",
            ErrorKind::Queue => "queue",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Invalid assignment body: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Invalid job input: {0}")]
    InvalidInput(String),

    #[error("Job fetch failed: {0}")]
    Fetch(#[source] ApiError),

    #[error("Download of {what} failed: {source}")]
    Download {
        what: String,
        #[source]
        source: ApiError,
    },

    #[error("Render failed: {0}")]
    Render(#[from] RenderError),

    #[error("Upload failed: {0}")]
    Upload(#[source] ApiError),

    #[error("{phase} timed out after {after:?}")]
    Timeout {
        phase: &'static str,
        after: Duration,
    },

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn download(what: impl Into<String>, source: ApiError) -> Self {
        Self::Download {
            what: what.into(),
            source,
        }
    }

    pub fn timeout(phase: &'static str, after: Duration) -> Self {
        Self::Timeout { phase, after }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Decode(_) | WorkerError::InvalidInput(_) => ErrorKind::Decode,
            WorkerError::Fetch(_) => ErrorKind::Fetch,
            WorkerError::Download { .. } => ErrorKind::Download,
            WorkerError::Render(_) => ErrorKind::Render,
            WorkerError::Upload(_) => ErrorKind::Upload,
            WorkerError::Timeout { .. } => ErrorKind::Timeout,
            WorkerError::Queue(e) if e.is_channel_closed() => ErrorKind::ChannelClosed,
            WorkerError::Queue(_) => ErrorKind::Queue,
            WorkerError::Io(_) => ErrorKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        let decode = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(WorkerError::Decode(decode).kind(), ErrorKind::Decode);
        assert_eq!(
            WorkerError::timeout("input download", Duration::from_secs(14400)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            WorkerError::from(RenderError::Timeout(5)).kind(),
            ErrorKind::Render
        );
        assert_eq!(
            WorkerError::from(QueueError::ChannelClosed).kind(),
            ErrorKind::ChannelClosed
        );
    }

    #[test]
    fn test_timeout_message() {
        let err = WorkerError::timeout("job fetch", Duration::from_secs(600));
        assert_eq!(err.to_string(), "job fetch timed out after 600s");

        let err = WorkerError::timeout("texture pack download", Duration::from_millis(500));
        assert_eq!(err.to_string(), "texture pack download timed out after 500ms");
    }
}
