//! Entitlement snapshot management.
//!
//! The snapshot is read from the remote ledger and written wholesale to the
//! on-device cache. Local usage is applied to an optimistic copy for
//! immediate feedback; the next successful remote read discards that copy
//! instead of merging it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use guidepass_core::{AttractionId, EntitlementSnapshot, RefundPolicy, UserId};
use guidepass_store::{EntitlementStore, SnapshotCache};

use crate::bus::{LedgerBus, LedgerEvent};

#[derive(Debug, Default)]
struct View {
    /// Last snapshot read from the ledger or the cache.
    confirmed: Option<EntitlementSnapshot>,
    /// `confirmed` with local usage applied, until the next refresh.
    optimistic: Option<EntitlementSnapshot>,
}

impl View {
    fn current(&self) -> Option<&EntitlementSnapshot> {
        self.optimistic.as_ref().or(self.confirmed.as_ref())
    }
}

/// Reads, caches and locally adjusts one user's entitlement snapshot.
pub struct SnapshotManager {
    user_id: UserId,
    store: Arc<dyn EntitlementStore>,
    cache: Arc<dyn SnapshotCache>,
    trial_allowance: u32,
    refund_policy: RefundPolicy,
    bus: LedgerBus,
    view: RwLock<View>,
}

impl SnapshotManager {
    /// Create a manager with nothing loaded yet.
    #[must_use]
    pub fn new(
        user_id: UserId,
        store: Arc<dyn EntitlementStore>,
        cache: Arc<dyn SnapshotCache>,
        trial_allowance: u32,
        refund_policy: RefundPolicy,
        bus: LedgerBus,
    ) -> Self {
        Self {
            user_id,
            store,
            cache,
            trial_allowance,
            refund_policy,
            bus,
            view: RwLock::new(View::default()),
        }
    }

    /// Read the snapshot from the remote ledger, overwrite the cache and drop
    /// any optimistic adjustments.
    ///
    /// # Errors
    ///
    /// Returns an error if either ledger read fails. The cache and the local
    /// view are left untouched in that case.
    pub async fn refresh(&self) -> guidepass_store::Result<EntitlementSnapshot> {
        let (subscription, state) = futures::try_join!(
            self.store.get_subscription_status(&self.user_id),
            self.store.get_credits_and_owned_items(&self.user_id),
        )?;

        let snapshot = EntitlementSnapshot::build(
            subscription.unwrap_or_default(),
            state.ledger(self.trial_allowance),
            state.owned_items(),
            Utc::now(),
        );

        if let Err(e) = self.cache.store(&self.user_id, &snapshot).await {
            tracing::warn!(user_id = %self.user_id, error = %e, "Failed to cache snapshot");
        }

        {
            let mut view = self.view.write().await;
            view.confirmed = Some(snapshot.clone());
            view.optimistic = None;
        }

        tracing::debug!(
            user_id = %self.user_id,
            unlimited = snapshot.has_unlimited_access,
            available = snapshot.ledger.available_total(),
            "Snapshot refreshed"
        );
        self.bus.publish(LedgerEvent::SnapshotRefreshed {
            refreshed_at: snapshot.refreshed_at,
        });

        Ok(snapshot)
    }

    /// Refresh, logging a failure instead of returning it.
    ///
    /// Returns whether the refresh succeeded.
    pub async fn try_refresh(&self) -> bool {
        match self.refresh().await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "Snapshot refresh failed");
                false
            }
        }
    }

    /// The freshest snapshot available: the remote ledger, else the local
    /// view, else the on-device cache, else the trial-only default.
    pub async fn snapshot(&self) -> EntitlementSnapshot {
        match self.refresh().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    error = %e,
                    "Ledger unreachable, serving last known snapshot"
                );
                self.fallback(Utc::now()).await
            }
        }
    }

    /// The local view, loading it first when nothing has been read yet.
    pub async fn current(&self) -> EntitlementSnapshot {
        let now = Utc::now();
        if let Some(snapshot) = self.view.read().await.current() {
            return reevaluated(snapshot.clone(), now);
        }
        self.snapshot().await
    }

    /// Apply a recorded credit spend to the local view.
    pub async fn apply_consumption(&self, attraction_id: &AttractionId) {
        let mut view = self.view.write().await;
        let Some(mut next) = view.current().cloned() else {
            return;
        };
        if next.unlocked_attractions.insert(attraction_id.clone()) {
            next.ledger = next.ledger.consume(1).ledger;
        }
        view.optimistic = Some(next);
    }

    /// Apply a refunded credit to the local view.
    pub async fn apply_refund(&self, attraction_id: &AttractionId) {
        let mut view = self.view.write().await;
        let Some(mut next) = view.current().cloned() else {
            return;
        };
        if next.unlocked_attractions.remove(attraction_id) {
            next.ledger = next.ledger.refund(1, self.refund_policy);
        }
        view.optimistic = Some(next);
    }

    /// Forget the local view and the cached snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be cleared.
    pub async fn clear(&self) -> guidepass_store::Result<()> {
        *self.view.write().await = View::default();
        self.cache.clear(&self.user_id).await
    }

    async fn fallback(&self, now: DateTime<Utc>) -> EntitlementSnapshot {
        if let Some(snapshot) = self.view.read().await.current() {
            return reevaluated(snapshot.clone(), now);
        }

        match self.cache.load(&self.user_id).await {
            Ok(Some(cached)) => {
                tracing::info!(
                    user_id = %self.user_id,
                    refreshed_at = %cached.refreshed_at,
                    "Serving cached snapshot"
                );
                self.view
                    .write()
                    .await
                    .confirmed
                    .get_or_insert_with(|| cached.clone());
                reevaluated(cached, now)
            }
            Ok(None) => EntitlementSnapshot::empty(self.trial_allowance, now),
            Err(e) => {
                tracing::warn!(user_id = %self.user_id, error = %e, "Snapshot cache unreadable");
                EntitlementSnapshot::empty(self.trial_allowance, now)
            }
        }
    }
}

/// Recompute subscription expiry for a snapshot read earlier.
fn reevaluated(mut snapshot: EntitlementSnapshot, now: DateTime<Utc>) -> EntitlementSnapshot {
    snapshot.has_unlimited_access = snapshot.subscription.grants_unlimited_at(now);
    snapshot.subscription = snapshot.subscription.effective_at(now);
    snapshot
}
