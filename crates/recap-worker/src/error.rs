//! Worker error types.

use thiserror::Error;

use recap_media::MediaError;
use recap_providers::ProviderError;
use recap_queue::QueueError;
use recap_storage::StorageError;

/// Result type for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur while executing a pipeline step.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Job failed: {0}")]
    JobFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Source fetch failed: {0}")]
    SourceFetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WorkerError {
    pub fn job_failed(msg: impl Into<String>) -> Self {
        Self::JobFailed(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn source_fetch(msg: impl Into<String>) -> Self {
        Self::SourceFetch(msg.into())
    }

    /// Whether the failing step should be redelivered. Transient
    /// infrastructure trouble retries; malformed inputs and permanent
    /// decode failures do not.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Queue(_) => true,
            WorkerError::Storage(e) => !matches!(e, StorageError::ConfigError(_)),
            // Cancellation means shutdown interrupted the step, not that the
            // input is bad; the next delivery starts over.
            WorkerError::Media(e) => matches!(
                e,
                MediaError::Timeout(_)
                    | MediaError::Io(_)
                    | MediaError::SinkFailed(_)
                    | MediaError::Cancelled
            ),
            WorkerError::Provider(e) => e.is_retryable(),
            WorkerError::JobFailed(_) => true,
            WorkerError::InvalidInput(_) => false,
            WorkerError::SourceFetch(_) => true,
            WorkerError::Io(_) => true,
            WorkerError::Json(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_is_permanent() {
        assert!(!WorkerError::invalid_input("no source url").is_retryable());
        assert!(!WorkerError::Media(MediaError::InvalidVideo("no video stream".into()))
            .is_retryable());
    }

    #[test]
    fn transient_failures_retry() {
        assert!(WorkerError::Media(MediaError::Timeout(300)).is_retryable());
        assert!(WorkerError::Media(MediaError::Cancelled).is_retryable());
        assert!(WorkerError::source_fetch("connection reset").is_retryable());
    }
}
