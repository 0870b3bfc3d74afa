//! The entitlement service.
//!
//! One `EntitlementService` per signed-in user. It owns the connection to the
//! purchase provider and wires the resolver, usage recorder, reconciliation
//! pipeline and snapshot manager together behind the operations the UI calls.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use guidepass_core::{
    AccessDecision, AttractionId, Catalog, EntitlementResolver, EntitlementSnapshot, ProductId,
    UserId,
};
use guidepass_store::{EntitlementStore, SnapshotCache};

use crate::bus::{LedgerBus, LedgerEvent};
use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::provider::{ProviderError, ProviderUpdate, PurchaseProvider};
use crate::reconcile::{
    EventDisposition, ReconcileOutcome, ReconciliationPipeline, RestoreOutcome,
};
use crate::snapshot::SnapshotManager;
use crate::usage::{RefundOutcome, UsageOutcome, UsageRecorder};

/// Result of a purchase request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PurchaseOutcome {
    /// The purchase was paid and reconciled.
    Completed(ReconcileOutcome),
    /// Payment is pending; the purchase is applied when the provider redelivers it.
    Pending,
    /// The user dismissed the purchase dialog.
    Cancelled,
    /// The product was already owned; a restore was run instead.
    AlreadyOwned(RestoreOutcome),
}

/// Entitlement and purchase service for one user.
pub struct EntitlementService {
    user_id: UserId,
    provider: Arc<dyn PurchaseProvider>,
    catalog: Arc<Catalog>,
    resolver: EntitlementResolver,
    snapshots: Arc<SnapshotManager>,
    usage: UsageRecorder,
    pipeline: Arc<ReconciliationPipeline>,
    bus: LedgerBus,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl EntitlementService {
    /// Create a disconnected service.
    #[must_use]
    pub fn new(
        user_id: UserId,
        store: Arc<dyn EntitlementStore>,
        provider: Arc<dyn PurchaseProvider>,
        cache: Arc<dyn SnapshotCache>,
        config: ServiceConfig,
    ) -> Self {
        let catalog = Arc::new(config.catalog);
        let bus = LedgerBus::new(config.bus_capacity);

        let snapshots = Arc::new(SnapshotManager::new(
            user_id,
            store.clone(),
            cache,
            catalog.trial_allowance,
            config.refund_policy,
            bus.clone(),
        ));
        let usage = UsageRecorder::new(user_id, store.clone(), catalog.clone());
        let pipeline = Arc::new(ReconciliationPipeline::new(
            user_id,
            store,
            provider.clone(),
            catalog.clone(),
            bus.clone(),
        ));

        Self {
            user_id,
            provider,
            resolver: EntitlementResolver::new(catalog.trial_allowance),
            catalog,
            snapshots,
            usage,
            pipeline,
            bus,
            listener: Mutex::new(None),
        }
    }

    /// The signed-in user.
    #[must_use]
    pub const fn user_id(&self) -> &UserId {
        &self.user_id
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Connect to the purchase provider, start listening for pushed purchases
    /// and replay any left pending from a previous session.
    ///
    /// Calling this while connected does nothing.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::StoreUnavailable` if the provider cannot be reached.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut listener = self.listener.lock().await;
            if listener.is_some() {
                tracing::debug!(user_id = %self.user_id, "Already connected");
                return Ok(());
            }

            self.provider.connect().await.map_err(|e| {
                tracing::warn!(
                    user_id = %self.user_id,
                    platform = %self.provider.platform(),
                    error = %e,
                    "Provider connection failed"
                );
                ServiceError::from(e)
            })?;

            let updates = self.provider.subscribe();
            *listener = Some(tokio::spawn(listen(
                updates,
                self.pipeline.clone(),
                self.snapshots.clone(),
            )));
        }

        tracing::info!(
            user_id = %self.user_id,
            platform = %self.provider.platform(),
            "Connected to purchase provider"
        );

        // Cold-start replay of purchases delivered while the app was closed
        if let Err(e) = self.pipeline.restore().await {
            tracing::warn!(user_id = %self.user_id, error = %e, "Cold-start replay failed");
        }
        self.snapshots.try_refresh().await;

        Ok(())
    }

    /// Stop listening and disconnect from the provider.
    pub async fn disconnect(&self) {
        let Some(handle) = self.listener.lock().await.take() else {
            return;
        };
        handle.abort();
        self.provider.disconnect().await;

        tracing::info!(user_id = %self.user_id, "Disconnected from purchase provider");
    }

    /// Whether `connect()` succeeded and `disconnect()` was not called since.
    pub async fn is_connected(&self) -> bool {
        self.listener.lock().await.is_some()
    }

    /// Disconnect and forget the cached snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::PersistenceFailed` if the cache cannot be cleared.
    pub async fn sign_out(&self) -> Result<()> {
        self.disconnect().await;
        self.snapshots.clear().await?;
        Ok(())
    }

    // =========================================================================
    // Access
    // =========================================================================

    /// Decide access to an attraction from the current snapshot.
    pub async fn resolve_access(&self, attraction_id: &AttractionId) -> AccessDecision {
        let snapshot = self.snapshots.current().await;
        let decision = self
            .resolver
            .resolve_snapshot(&snapshot, attraction_id, Utc::now());

        tracing::debug!(
            user_id = %self.user_id,
            attraction_id = %attraction_id,
            reason = decision.reason.as_str(),
            "Access resolved"
        );
        decision
    }

    /// Decide whether a new guide may be generated.
    pub async fn resolve_generation(&self) -> AccessDecision {
        let snapshot = self.snapshots.current().await;
        self.resolver
            .resolve_generation(&snapshot.subscription, &snapshot.ledger, Utc::now())
    }

    /// Spend a credit on `attraction_id` when access to it costs one.
    ///
    /// Never fails: ledger errors are logged and reported as
    /// `UsageOutcome::Failed`, and access is not revoked.
    pub async fn record_usage_if_needed(&self, attraction_id: &AttractionId) -> UsageOutcome {
        let decision = self.resolve_access(attraction_id).await;
        if !decision.consumes_credit() {
            return UsageOutcome::NotRequired {
                reason: decision.reason,
            };
        }

        let outcome = self.usage.record(attraction_id).await;
        match outcome {
            UsageOutcome::Recorded { usage_count, .. } => {
                self.snapshots.apply_consumption(attraction_id).await;
                self.bus.publish(LedgerEvent::UsageRecorded {
                    attraction_id: attraction_id.clone(),
                    usage_count,
                });
                self.snapshots.try_refresh().await;
            }
            UsageOutcome::AlreadyUnlocked | UsageOutcome::LimitExceeded { .. } => {
                // The local view was behind the ledger
                self.snapshots.try_refresh().await;
            }
            UsageOutcome::NotRequired { .. } | UsageOutcome::Failed => {}
        }
        outcome
    }

    /// Return the credit spent on `attraction_id`, e.g. after guide generation failed.
    pub async fn refund_usage(&self, attraction_id: &AttractionId) -> RefundOutcome {
        let outcome = self.usage.refund(attraction_id).await;
        if let RefundOutcome::Refunded { usage_count } = outcome {
            self.snapshots.apply_refund(attraction_id).await;
            self.bus.publish(LedgerEvent::UsageRefunded {
                attraction_id: attraction_id.clone(),
                usage_count,
            });
            self.snapshots.try_refresh().await;
        }
        outcome
    }

    // =========================================================================
    // Snapshot
    // =========================================================================

    /// The freshest snapshot available, falling back to the cached one when
    /// the ledger is unreachable.
    pub async fn entitlement_snapshot(&self) -> EntitlementSnapshot {
        self.snapshots.snapshot().await
    }

    /// Re-read the snapshot from the ledger (app foreground).
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::PersistenceFailed` if the ledger cannot be read.
    pub async fn refresh(&self) -> Result<EntitlementSnapshot> {
        Ok(self.snapshots.refresh().await?)
    }

    /// Subscribe to ledger changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.bus.subscribe()
    }

    // =========================================================================
    // Purchases
    // =========================================================================

    /// Buy a product.
    ///
    /// Cancellation, pending payment and already-owned products are outcomes,
    /// not errors.
    ///
    /// # Errors
    ///
    /// - `ServiceError::NotConnected` before `connect()`
    /// - `ServiceError::UnknownProduct` if the product is not in the catalog
    /// - `ServiceError::StoreUnavailable` / `PurchaseFailed` from the provider
    /// - `ServiceError::PersistenceFailed` if the ledger write failed
    pub async fn purchase(&self, product_id: &ProductId) -> Result<PurchaseOutcome> {
        self.ensure_connected().await?;
        let kind = self.catalog.classify(product_id)?;

        tracing::info!(
            user_id = %self.user_id,
            product_id = %product_id,
            kind = kind.label(),
            "Starting purchase"
        );

        let event = match self.provider.request_purchase(product_id).await {
            Ok(event) => event,
            Err(ProviderError::UserCancelled) => {
                tracing::info!(user_id = %self.user_id, product_id = %product_id, "Purchase cancelled");
                return Ok(PurchaseOutcome::Cancelled);
            }
            Err(ProviderError::AlreadyOwned { .. }) => {
                tracing::info!(
                    user_id = %self.user_id,
                    product_id = %product_id,
                    "Product already owned, restoring"
                );
                let restored = self.restore().await?;
                return Ok(PurchaseOutcome::AlreadyOwned(restored));
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    product_id = %product_id,
                    platform = %self.provider.platform(),
                    error = %e,
                    "Purchase request failed"
                );
                return Err(e.into());
            }
        };

        match self.pipeline.process(&event).await? {
            EventDisposition::Pending => Ok(PurchaseOutcome::Pending),
            EventDisposition::Reconciled(outcome) => {
                self.snapshots.try_refresh().await;
                Ok(PurchaseOutcome::Completed(outcome))
            }
        }
    }

    /// Replay every purchase the provider knows for this account.
    ///
    /// Safe to run as often as wanted; already-applied purchases are skipped.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::NotConnected` before `connect()`, or
    /// `ServiceError::StoreUnavailable` if the provider cannot be reached.
    pub async fn restore(&self) -> Result<RestoreOutcome> {
        self.ensure_connected().await?;

        let outcome = self.pipeline.restore().await?;
        if matches!(outcome, RestoreOutcome::Restored(_)) {
            self.snapshots.try_refresh().await;
        }
        Ok(outcome)
    }

    async fn ensure_connected(&self) -> Result<()> {
        if self.is_connected().await {
            Ok(())
        } else {
            Err(ServiceError::NotConnected)
        }
    }
}

impl Drop for EntitlementService {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

/// Consume pushed provider updates until the channel closes.
async fn listen(
    mut updates: broadcast::Receiver<ProviderUpdate>,
    pipeline: Arc<ReconciliationPipeline>,
    snapshots: Arc<SnapshotManager>,
) {
    loop {
        match updates.recv().await {
            Ok(ProviderUpdate::Purchases(events)) => {
                let results = join_all(events.iter().map(|event| pipeline.process(event))).await;
                let applied = results.iter().any(|result| {
                    matches!(result, Ok(EventDisposition::Reconciled(outcome)) if !outcome.duplicate)
                });
                if applied {
                    snapshots.try_refresh().await;
                }
            }
            Ok(ProviderUpdate::Error(ProviderError::UserCancelled)) => {
                tracing::debug!("Pushed purchase cancelled by user");
            }
            Ok(ProviderUpdate::Error(e)) => {
                tracing::warn!(error = %e, "Provider reported a purchase error");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped = skipped, "Missed provider updates, replaying purchases");
                if let Err(e) = pipeline.restore().await {
                    tracing::warn!(error = %e, "Replay after missed updates failed");
                }
                snapshots.try_refresh().await;
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::debug!("Provider update channel closed");
                break;
            }
        }
    }
}
