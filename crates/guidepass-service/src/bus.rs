//! Ledger-change event bus.
//!
//! The service publishes here whenever the ledger or the snapshot changes;
//! UI-facing code subscribes and re-reads the snapshot instead of reacting to
//! provider callbacks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use guidepass_core::{AttractionId, ProductId, ProductKind, TransactionId};

/// Default capacity of the bus; slow subscribers beyond it see `Lagged`.
pub const DEFAULT_BUS_CAPACITY: usize = 64;

/// A change to the user's entitlements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum LedgerEvent {
    /// A purchase record was written and its grant applied.
    PurchaseApplied {
        /// Platform transaction id.
        transaction_id: TransactionId,
        /// Purchased product.
        product_id: ProductId,
        /// What the product granted.
        kind: ProductKind,
    },

    /// A credit was spent on an attraction.
    UsageRecorded {
        /// Attraction unlocked.
        attraction_id: AttractionId,
        /// Usage count after the write.
        usage_count: u32,
    },

    /// A spent credit was returned.
    UsageRefunded {
        /// Attraction relocked.
        attraction_id: AttractionId,
        /// Usage count after the write.
        usage_count: u32,
    },

    /// The snapshot was re-read from the remote ledger.
    SnapshotRefreshed {
        /// When the read happened.
        refreshed_at: DateTime<Utc>,
    },
}

/// Broadcast bus for [`LedgerEvent`]s.
#[derive(Debug, Clone)]
pub struct LedgerBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl LedgerBus {
    /// Create a bus holding up to `capacity` undelivered events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: LedgerEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Ledger event dropped, no subscribers");
        }
    }
}

impl Default for LedgerBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUS_CAPACITY)
    }
}
