use invision_queue::BackendError;
use thiserror::Error;

/// Errors returned by web UI operations.
#[derive(Error, Debug)]
pub enum SdError {
    /// The web UI returned a non-success HTTP status.
    #[error("Stable Diffusion web UI returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The response was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An image in the response was not valid base64.
    #[error("Invalid image data: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SdError>;

impl From<SdError> for BackendError {
    fn from(err: SdError) -> Self {
        match err {
            SdError::Http { status, body } => BackendError::Refused { status, body },
            SdError::Network { source, .. } if source.is_timeout() => BackendError::Timeout,
            SdError::Network { context, source } => {
                BackendError::Transport(format!("{}: {}", context, source))
            }
            other => BackendError::Malformed(other.to_string()),
        }
    }
}
