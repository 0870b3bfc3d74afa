//! Platform purchase provider boundary.
//!
//! The concrete store SDKs (App Store, Play Billing) live outside this crate;
//! they are adapted to [`PurchaseProvider`].

use async_trait::async_trait;
use tokio::sync::broadcast;

use guidepass_core::{ProductId, PurchaseEvent};

/// Errors reported by the purchase provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The user dismissed the purchase dialog.
    #[error("purchase cancelled by user")]
    UserCancelled,

    /// The product is already owned by this store account.
    #[error("product already owned: {product_id}")]
    AlreadyOwned {
        /// Product the user tried to buy.
        product_id: String,
    },

    /// The provider could not be reached.
    #[error("provider connection failed: {0}")]
    ConnectionFailed(String),

    /// The provider refused the request.
    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// Push delivery from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderUpdate {
    /// Purchases changed state (completed, pending, renewed).
    Purchases(Vec<PurchaseEvent>),
    /// An asynchronous purchase error.
    Error(ProviderError),
}

/// The platform purchase provider.
#[async_trait]
pub trait PurchaseProvider: Send + Sync {
    /// Platform name for logs (`app_store`, `play_store`).
    fn platform(&self) -> &str;

    // =========================================================================
    // Connection
    // =========================================================================

    /// Open the connection to the platform store.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::ConnectionFailed` if the store is unreachable.
    async fn connect(&self) -> Result<(), ProviderError>;

    /// Close the connection.
    async fn disconnect(&self);

    /// Subscribe to push delivery of purchase updates.
    fn subscribe(&self) -> broadcast::Receiver<ProviderUpdate>;

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Every purchase the platform knows for this store account, including
    /// ones not yet acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be queried.
    async fn list_available_purchases(&self) -> Result<Vec<PurchaseEvent>, ProviderError>;

    /// Launch the purchase flow for `product_id` and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::UserCancelled` when the dialog is dismissed and
    /// `ProviderError::AlreadyOwned` for owned non-consumables.
    async fn request_purchase(&self, product_id: &ProductId)
        -> Result<PurchaseEvent, ProviderError>;

    /// Tell the platform the purchase was handled so it stops redelivering it.
    ///
    /// `consumable` purchases are consumed and can be bought again.
    ///
    /// # Errors
    ///
    /// Returns an error if the acknowledgement did not reach the store.
    async fn acknowledge(&self, event: &PurchaseEvent, consumable: bool)
        -> Result<(), ProviderError>;
}
