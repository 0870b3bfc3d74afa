//! Purchase reconciliation pipeline.
//!
//! Every purchase event the provider delivers (pushed, returned from a
//! purchase dialog or replayed by a restore) goes through the same stages:
//!
//! `Observed -> Classified -> Persisted -> Acknowledged`
//!
//! The persist step is an insert-if-absent keyed by transaction id, so the
//! pipeline can run any number of times for the same event. A failed
//! acknowledgement never re-runs the persist step; the provider redelivers
//! and the duplicate insert short-circuits.

use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use guidepass_core::{Catalog, ProductKind, PurchaseEvent, PurchaseGrant, PurchaseRecord, UserId};
use guidepass_store::{EntitlementStore, InsertOutcome};

use crate::bus::{LedgerBus, LedgerEvent};
use crate::error::{Result, ServiceError};
use crate::provider::PurchaseProvider;

/// Stage a purchase event reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStage {
    /// Delivered by the provider.
    Observed,
    /// Product identified.
    Classified,
    /// Record written and grant applied (or already on file).
    Persisted,
    /// Provider told the purchase was handled.
    Acknowledged,
    /// Persisted, but the acknowledgement failed. The ledger is correct.
    FailedAcknowledged,
}

impl ReconcileStage {
    /// Whether the ledger reflects the purchase at this stage.
    #[must_use]
    pub const fn is_persisted(&self) -> bool {
        matches!(
            self,
            Self::Persisted | Self::Acknowledged | Self::FailedAcknowledged
        )
    }
}

/// Result of reconciling one settled purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Terminal stage.
    pub stage: ReconcileStage,
    /// What the product granted.
    pub kind: ProductKind,
    /// Whether the transaction was already on file.
    pub duplicate: bool,
}

/// What happened to one purchase event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDisposition {
    /// The purchase is settled and reflected in the ledger.
    Reconciled(ReconcileOutcome),
    /// Payment is still pending; the provider will redeliver it.
    Pending,
}

/// Per-event counts of a restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreReport {
    /// Purchases newly applied to the ledger.
    pub applied: usize,
    /// Purchases already on file.
    pub duplicates: usize,
    /// Purchases awaiting payment.
    pub pending: usize,
    /// Purchases that could not be classified or persisted.
    pub failed: usize,
}

impl RestoreReport {
    /// Number of purchases the provider returned.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.applied + self.duplicates + self.pending + self.failed
    }
}

/// Result of a restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RestoreOutcome {
    /// The provider knows no purchases for this account.
    Empty,
    /// Purchases were replayed.
    Restored(RestoreReport),
}

/// Reconciles provider purchase events with the remote ledger.
pub struct ReconciliationPipeline {
    user_id: UserId,
    store: Arc<dyn EntitlementStore>,
    provider: Arc<dyn PurchaseProvider>,
    catalog: Arc<Catalog>,
    bus: LedgerBus,
}

impl ReconciliationPipeline {
    /// Create a pipeline for one user.
    #[must_use]
    pub fn new(
        user_id: UserId,
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn PurchaseProvider>,
        catalog: Arc<Catalog>,
        bus: LedgerBus,
    ) -> Self {
        Self {
            user_id,
            store,
            provider,
            catalog,
            bus,
        }
    }

    /// Run one purchase event through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::UnknownProduct` if the product is not in the
    /// catalog, or `ServiceError::PersistenceFailed` if the ledger write
    /// failed. Neither event is acknowledged, so the provider redelivers it.
    pub async fn process(&self, event: &PurchaseEvent) -> Result<EventDisposition> {
        let platform = self.provider.platform();

        tracing::debug!(
            user_id = %self.user_id,
            product_id = %event.product_id,
            transaction_id = %event.transaction_id,
            platform = %platform,
            stage = ?ReconcileStage::Observed,
            "Purchase observed"
        );

        if !event.state.is_settled() {
            tracing::info!(
                user_id = %self.user_id,
                product_id = %event.product_id,
                transaction_id = %event.transaction_id,
                platform = %platform,
                "Purchase pending, awaiting payment"
            );
            return Ok(EventDisposition::Pending);
        }

        let kind = self.catalog.classify(&event.product_id).map_err(|e| {
            tracing::error!(
                user_id = %self.user_id,
                product_id = %event.product_id,
                transaction_id = %event.transaction_id,
                platform = %platform,
                error = %e,
                "Purchase classification failed"
            );
            ServiceError::from(e)
        })?;

        tracing::debug!(
            transaction_id = %event.transaction_id,
            kind = kind.label(),
            stage = ?ReconcileStage::Classified,
            "Purchase classified"
        );

        let grant = PurchaseGrant::for_product(
            &kind,
            &event.product_id,
            event.timestamp,
            self.catalog.trial_allowance,
        );
        let record = PurchaseRecord::new(self.user_id, event, grant);

        let inserted = self.store.insert_purchase_record(&record).await.map_err(|e| {
            tracing::error!(
                user_id = %self.user_id,
                product_id = %event.product_id,
                transaction_id = %event.transaction_id,
                platform = %platform,
                error = %e,
                "Failed to persist purchase"
            );
            ServiceError::from(e)
        })?;

        let duplicate = inserted == InsertOutcome::Duplicate;
        if duplicate {
            tracing::debug!(
                transaction_id = %event.transaction_id,
                "Purchase already on file"
            );
        } else {
            tracing::info!(
                user_id = %self.user_id,
                product_id = %event.product_id,
                transaction_id = %event.transaction_id,
                kind = kind.label(),
                "Purchase applied"
            );
            self.bus.publish(LedgerEvent::PurchaseApplied {
                transaction_id: event.transaction_id.clone(),
                product_id: event.product_id.clone(),
                kind: kind.clone(),
            });
        }

        let stage = match self.provider.acknowledge(event, kind.is_consumable()).await {
            Ok(()) => ReconcileStage::Acknowledged,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    product_id = %event.product_id,
                    transaction_id = %event.transaction_id,
                    platform = %platform,
                    error = %e,
                    "Purchase persisted but acknowledgement failed"
                );
                ReconcileStage::FailedAcknowledged
            }
        };

        Ok(EventDisposition::Reconciled(ReconcileOutcome {
            stage,
            kind,
            duplicate,
        }))
    }

    /// Replay every purchase the provider knows.
    ///
    /// Events are processed concurrently; one failing event does not stop the
    /// others.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::StoreUnavailable` if the provider cannot list
    /// purchases.
    pub async fn restore(&self) -> Result<RestoreOutcome> {
        let events = self.provider.list_available_purchases().await.map_err(|e| {
            tracing::warn!(
                user_id = %self.user_id,
                platform = %self.provider.platform(),
                error = %e,
                "Failed to list purchases"
            );
            ServiceError::from(e)
        })?;

        if events.is_empty() {
            tracing::info!(user_id = %self.user_id, "Nothing to restore");
            return Ok(RestoreOutcome::Empty);
        }

        let results = join_all(events.iter().map(|event| self.process(event))).await;

        let mut report = RestoreReport::default();
        for result in results {
            match result {
                Ok(EventDisposition::Reconciled(outcome)) if outcome.duplicate => {
                    report.duplicates += 1;
                }
                Ok(EventDisposition::Reconciled(_)) => report.applied += 1,
                Ok(EventDisposition::Pending) => report.pending += 1,
                Err(_) => report.failed += 1,
            }
        }

        tracing::info!(
            user_id = %self.user_id,
            applied = report.applied,
            duplicates = report.duplicates,
            pending = report.pending,
            failed = report.failed,
            "Restore complete"
        );

        Ok(RestoreOutcome::Restored(report))
    }
}
