//! Service error types.
//!
//! Expected outcomes (blocked access, empty restore, cancelled purchase,
//! usage limit reached) are return values, not errors. What remains here is
//! what a caller may need to show or retry.

use guidepass_core::BillingError;
use guidepass_store::StoreError;

use crate::provider::ProviderError;

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Service error type.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The purchase provider could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The user dismissed the purchase dialog.
    #[error("purchase cancelled by user")]
    UserCancelled,

    /// The provider reports the product is already owned.
    #[error("product already owned: {product_id}")]
    AlreadyOwned {
        /// Product the user tried to buy.
        product_id: String,
    },

    /// The provider rejected the purchase.
    #[error("purchase failed: {0}")]
    PurchaseFailed(String),

    /// Writing to the remote ledger failed.
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// Spending another credit would pass the user's limit.
    #[error("usage limit exceeded: usage_count={usage_count}, limit={limit}")]
    LimitExceeded {
        /// Credits already spent.
        usage_count: u32,
        /// Credit limit.
        limit: u32,
    },

    /// The operation needs `connect()` first.
    #[error("service not connected")]
    NotConnected,

    /// Product id is not in the catalog.
    #[error("unknown product: {product_id}")]
    UnknownProduct {
        /// The unrecognized product id.
        product_id: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ServiceError {
    /// Whether the user may retry the operation that failed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::PurchaseFailed(_) | Self::PersistenceFailed(_)
        )
    }

    /// Whether the UI should show an error for this.
    ///
    /// Cancellation and already-owned are normal outcomes; persistence failures
    /// are retried silently by the next restore.
    #[must_use]
    pub const fn is_user_facing(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::PurchaseFailed(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        Self::PersistenceFailed(err.to_string())
    }
}

impl From<ProviderError> for ServiceError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UserCancelled => Self::UserCancelled,
            ProviderError::AlreadyOwned { product_id } => Self::AlreadyOwned { product_id },
            ProviderError::ConnectionFailed(msg) => Self::StoreUnavailable(msg),
            ProviderError::Rejected(msg) => Self::PurchaseFailed(msg),
        }
    }
}

impl From<BillingError> for ServiceError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::UnknownProduct { product_id } => Self::UnknownProduct { product_id },
            BillingError::LimitExceeded { usage_count, limit } => {
                Self::LimitExceeded { usage_count, limit }
            }
            BillingError::InvalidId(e) => Self::Configuration(e.to_string()),
            BillingError::Configuration(msg) => Self::Configuration(msg),
        }
    }
}
