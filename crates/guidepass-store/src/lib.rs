//! Storage boundaries for guidepass.
//!
//! This crate defines the two persistence seams the entitlement service talks
//! to, plus local implementations of both:
//!
//! - [`EntitlementStore`]: the remote ledger, the single writable source of
//!   truth for subscriptions, usage records and purchase records.
//! - [`SnapshotCache`]: the on-device read replica holding the last-known
//!   `EntitlementSnapshot` under a single key per user.
//!
//! # Backends
//!
//! - [`MemoryStore`] / [`MemorySnapshotCache`]: in-process, used for tests and
//!   offline mode.
//! - [`FileSnapshotCache`]: one JSON file per user.
//! - `RocksStore` (feature `rocksdb-backend`): both traits over `RocksDB`
//!   column families with CBOR values.
//!
//! # Example
//!
//! ```no_run
//! use guidepass_store::{EntitlementStore, MemoryStore};
//! use guidepass_core::UserId;
//!
//! # async fn example() -> guidepass_store::Result<()> {
//! let store = MemoryStore::new();
//! let user_id = UserId::generate();
//!
//! let state = store.get_credits_and_owned_items(&user_id).await?;
//! assert!(state.usage.is_none());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod error;
mod grant;
pub mod memory;

#[cfg(feature = "rocksdb-backend")]
pub mod keys;
#[cfg(feature = "rocksdb-backend")]
pub mod rocks;
#[cfg(feature = "rocksdb-backend")]
pub mod schema;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use guidepass_core::{
    AttractionId, CreditsLedger, OwnedItems, ProductId, PurchaseRecord, SubscriptionStatus,
    TransactionId, UsageRecord, UsageUpdate, UsageWrite, UserId,
};

pub use cache::{FileSnapshotCache, MemorySnapshotCache, SnapshotCache};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
#[cfg(feature = "rocksdb-backend")]
pub use rocks::RocksStore;

/// Result of inserting a purchase record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertOutcome {
    /// The record was new; its grant was applied.
    Inserted,
    /// A record with the same transaction id already existed; nothing was written.
    Duplicate,
}

/// Credits and owned items for one user, as read from the remote ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
    /// Usage record, absent until the user first spends a credit or buys a package.
    pub usage: Option<UsageRecord>,

    /// Attractions bought individually.
    #[serde(default)]
    pub owned_attractions: BTreeSet<AttractionId>,

    /// Credit packages bought.
    #[serde(default)]
    pub owned_packages: BTreeSet<ProductId>,
}

impl LedgerState {
    /// Credit pools; a user without a usage record has the bare trial allowance.
    #[must_use]
    pub fn ledger(&self, trial_allowance: u32) -> CreditsLedger {
        self.usage.as_ref().map_or_else(
            || CreditsLedger::from_usage(0, trial_allowance, trial_allowance),
            |usage| usage.ledger(trial_allowance),
        )
    }

    /// Owned items, including attractions unlocked with credits.
    #[must_use]
    pub fn owned_items(&self) -> OwnedItems {
        OwnedItems {
            attractions: self.owned_attractions.clone(),
            packages: self.owned_packages.clone(),
            unlocked: self
                .usage
                .as_ref()
                .map(|usage| usage.unlocked_attractions.clone())
                .unwrap_or_default(),
        }
    }
}

/// The remote entitlement ledger.
///
/// Every mutating operation is keyed by a stable identifier (user id or
/// transaction id) so repeated or concurrent delivery converges instead of
/// double-applying.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a user's subscription, if one was ever recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be reached or read.
    async fn get_subscription_status(&self, user_id: &UserId)
        -> Result<Option<SubscriptionStatus>>;

    /// Get a user's usage record and owned items.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be reached or read.
    async fn get_credits_and_owned_items(&self, user_id: &UserId) -> Result<LedgerState>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Apply a usage update to the stored record, creating it when absent.
    ///
    /// The increment and the limit check run against the stored record in
    /// the same write as the change (see [`UsageUpdate::apply_to`]). A
    /// reached limit or an already unlocked attraction is reported in the
    /// returned [`UsageWrite`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be reached or written.
    async fn upsert_usage(&self, user_id: &UserId, update: &UsageUpdate) -> Result<UsageWrite>;

    /// Insert a purchase record and apply its grant in the same write.
    ///
    /// This is the dedup anchor: when a record with the same transaction id
    /// exists, nothing is written and `InsertOutcome::Duplicate` is returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be reached or written.
    async fn insert_purchase_record(&self, record: &PurchaseRecord) -> Result<InsertOutcome>;

    /// Set a user's subscription unless a later expiry is already on file.
    ///
    /// Purchases carry their subscription grant through
    /// [`insert_purchase_record`](Self::insert_purchase_record). This is the
    /// write for subscriptions granted outside the purchase flow, such as
    /// support grants or plans migrated from a legacy billing system.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be reached or written.
    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        status: &SubscriptionStatus,
        transaction_id: Option<&TransactionId>,
    ) -> Result<()>;
}
