//! Purchase event and record types for guidepass.
//!
//! The purchase provider delivers `PurchaseEvent`s; each one that reaches the
//! ledger is written exactly once as a `PurchaseRecord` keyed by its platform
//! transaction id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AttractionId, ProductId, ProductKind, SubscriptionKind, TransactionId, UserId};

/// Provider-reported state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseState {
    /// Payment completed.
    Purchased,
    /// Awaiting payment (deferred payment, parental approval).
    Pending,
    /// Replayed by a restore.
    Restored,
}

impl PurchaseState {
    /// Whether the purchase is paid and may mutate the ledger.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Purchased | Self::Restored)
    }
}

/// A purchase as delivered by the platform provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    /// Purchased product.
    pub product_id: ProductId,

    /// Platform-issued transaction id (the dedup anchor).
    pub transaction_id: TransactionId,

    /// When the platform recorded the transaction.
    pub timestamp: DateTime<Utc>,

    /// Provider-reported state.
    pub state: PurchaseState,
}

/// The ledger mutation a purchase carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum PurchaseGrant {
    /// Set or extend the user's subscription.
    Subscription {
        /// Subscription kind.
        kind: SubscriptionKind,
        /// Expiry computed from the transaction timestamp.
        expires_at: Option<DateTime<Utc>>,
    },

    /// Raise the user's credit limit.
    Credits {
        /// Package that was bought; recorded as owned.
        package_id: ProductId,
        /// Credits added to the limit.
        credits: u32,
        /// Limit to start from when the user has no usage record yet.
        initial_limit: u32,
    },

    /// Own one attraction outright.
    Attraction {
        /// Attraction unlocked.
        attraction_id: AttractionId,
    },
}

impl PurchaseGrant {
    /// Grant for a classified product purchased at `purchased_at`.
    #[must_use]
    pub fn for_product(
        kind: &ProductKind,
        product_id: &ProductId,
        purchased_at: DateTime<Utc>,
        trial_allowance: u32,
    ) -> Self {
        match kind {
            ProductKind::Subscription { kind, cadence } => Self::Subscription {
                kind: *kind,
                expires_at: Some(cadence.expires_at(purchased_at)),
            },
            ProductKind::Package { credits } | ProductKind::LegacyPack { credits } => {
                Self::Credits {
                    package_id: product_id.clone(),
                    credits: *credits,
                    initial_limit: trial_allowance,
                }
            }
            ProductKind::SingleAttraction { attraction_id } => Self::Attraction {
                attraction_id: attraction_id.clone(),
            },
        }
    }
}

/// One persisted purchase; never mutated after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
    /// Platform transaction id (unique key).
    pub transaction_id: TransactionId,

    /// Buyer.
    pub user_id: UserId,

    /// Purchased product.
    pub product_id: ProductId,

    /// Ledger mutation applied with the insert.
    pub grant: PurchaseGrant,

    /// Platform transaction timestamp.
    pub purchased_at: DateTime<Utc>,

    /// When the record was written.
    pub recorded_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// Build the record for an observed event.
    #[must_use]
    pub fn new(user_id: UserId, event: &PurchaseEvent, grant: PurchaseGrant) -> Self {
        Self {
            transaction_id: event.transaction_id.clone(),
            user_id,
            product_id: event.product_id.clone(),
            grant,
            purchased_at: event.timestamp,
            recorded_at: Utc::now(),
        }
    }
}
