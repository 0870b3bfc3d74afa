//! Error types for guidepass.

use crate::ids::IdError;

/// Result type for guidepass core operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in guidepass core operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// Product id is not in the catalog.
    #[error("unknown product: {product_id}")]
    UnknownProduct {
        /// The unrecognized product id.
        product_id: String,
    },

    /// Spending another credit would pass the user's limit.
    #[error("usage limit exceeded: usage_count={usage_count}, limit={limit}")]
    LimitExceeded {
        /// Credits already spent.
        usage_count: u32,
        /// Credit limit.
        limit: u32,
    },

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}
