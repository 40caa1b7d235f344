//! Muninn error types

/// Muninn error types
#[derive(Debug, thiserror::Error)]
pub enum MuninnError {
    // Admission errors
    #[error("too many requests for identity '{identity}'")]
    AdmissionDenied { identity: String },

    #[error("attachment of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Backend/network errors
    #[error("inference backend unavailable: {0}")]
    Upstream(String),

    #[error("backend error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("stream error: {0}")]
    Stream(String),

    // Collaborator errors
    #[error("conversation store failure: {0}")]
    Persistence(String),

    #[error("execution error: {0}")]
    Execution(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl MuninnError {
    /// Whether this error means the inference backend could not serve the call.
    ///
    /// Lets callers of [`ModelClient::try_complete`](crate::model::ModelClient::try_complete)
    /// branch on an unreachable or failing backend without string matching.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MuninnError::Upstream(_) | MuninnError::Api { .. } | MuninnError::Stream(_)
        )
    }

    /// Whether the error was raised before any work was charged for the request.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            MuninnError::AdmissionDenied { .. }
                | MuninnError::PayloadTooLarge { .. }
                | MuninnError::InvalidInput(_)
        )
    }
}

impl From<reqwest::Error> for MuninnError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => MuninnError::Api {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => MuninnError::Upstream(err.to_string()),
        }
    }
}

/// Result type alias for Muninn operations
pub type Result<T> = std::result::Result<T, MuninnError>;
