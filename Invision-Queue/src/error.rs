use thiserror::Error;

/// Errors that can occur in the invision queue.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Bad input shape or unsupported settings values. Never enters the work list.
    #[error("Invalid request: {0}")]
    Validation(String),

    /// A follow-up referenced a generation that is not (or no longer) stored.
    #[error("Generation not found: {0}")]
    NotFound(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// A record or settings write/read failed in the storage layer.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The front-end could not deliver an update to the interaction.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Dispatch loop is already running")]
    AlreadyRunning,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Other(err.to_string())
    }
}

impl QueueError {
    /// Wrap a storage-layer failure.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        QueueError::Persistence(format!("{:#}", err))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, QueueError::NotFound(_))
    }
}

/// Failures reported by an [`ImageBackend`](crate::ImageBackend). The queue never retries them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Connection-level failure (refused, reset, DNS).
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("backend refused the request (HTTP {status}): {body}")]
    Refused { status: u16, body: String },

    /// The backend answered but the output could not be used.
    #[error("malformed backend output: {0}")]
    Malformed(String),

    #[error("backend timed out")]
    Timeout,
}
