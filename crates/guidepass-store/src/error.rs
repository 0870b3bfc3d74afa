//! Error types for guidepass storage.

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The ledger could not be reached (network down, timeout, 5xx).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The ledger refused the request.
    #[error("store rejected request: status={status}, message={message}")]
    Rejected {
        /// Status code reported by the ledger.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Database(err.to_string())
    }
}
