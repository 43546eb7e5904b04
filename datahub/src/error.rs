use thiserror::Error;

/// Result type for datahub operations.
pub type Result<T> = std::result::Result<T, DatahubError>;

/// Errors that can occur talking to the hub.
#[derive(Debug, Error)]
pub enum DatahubError {
    /// Client or helper configuration is unusable
    #[error("Configuration error: {0}")]
    Config(String),

    /// A call was made with missing or invalid arguments
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The hub answered with a non-2xx status
    #[error("Hub returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item encryption or decryption failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// A queue operation needed a Tokio runtime and none was running
    #[error("No Tokio runtime available to schedule queue work")]
    NoRuntime,

    /// Anything else
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DatahubError {
    /// The hub status code, if this error came from a non-2xx response.
    pub fn status(&self) -> Option<u16> {
        match self {
            DatahubError::Status { status, .. } => Some(*status),
            DatahubError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Shorthand for the validation errors raised by client methods.
    pub(crate) fn missing(what: &str) -> Self {
        DatahubError::InvalidRequest(format!("Missing {}", what))
    }
}
