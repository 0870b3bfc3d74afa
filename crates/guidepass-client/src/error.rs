//! Client error types.

use guidepass_store::StoreError;

/// Errors that can occur when talking to the remote ledger.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether the ledger could not be reached, as opposed to refusing the request.
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_decode(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Serialization(_) | Self::Configuration(_) => false,
        }
    }
}

impl From<ClientError> for StoreError {
    fn from(err: ClientError) -> Self {
        if err.is_unreachable() {
            return Self::Unavailable(err.to_string());
        }
        match err {
            ClientError::Api {
                message, status, ..
            } => Self::Rejected { status, message },
            ClientError::Http(e) => Self::Serialization(e.to_string()),
            ClientError::Serialization(e) => Self::Serialization(e.to_string()),
            ClientError::Configuration(message) => Self::Unavailable(message),
        }
    }
}
