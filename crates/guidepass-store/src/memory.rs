//! In-memory entitlement store.
//!
//! Used as the test double for the remote ledger and for offline mode. A
//! single lock covers every table, so insert-if-absent and the grant it
//! carries are applied atomically.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use guidepass_core::{
    PurchaseRecord, SubscriptionStatus, TransactionId, UsageRecord, UsageUpdate, UsageWrite,
    UserId,
};

use crate::error::Result;
use crate::grant::{self, GrantTarget};
use crate::{EntitlementStore, InsertOutcome, LedgerState};

#[derive(Debug, Default)]
struct Tables {
    subscriptions: HashMap<UserId, SubscriptionStatus>,
    usage: HashMap<UserId, UsageRecord>,
    purchases: HashMap<TransactionId, PurchaseRecord>,
}

/// In-memory implementation of [`EntitlementStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All purchase records for a user, oldest first.
    pub async fn purchase_records(&self, user_id: &UserId) -> Vec<PurchaseRecord> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .purchases
            .values()
            .filter(|record| record.user_id == *user_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.purchased_at);
        records
    }

    /// Number of purchase records across all users.
    pub async fn purchase_count(&self) -> usize {
        self.tables.lock().await.purchases.len()
    }

    /// Overwrite a user's usage record directly, bypassing merge rules.
    pub async fn put_usage_record(&self, user_id: UserId, record: UsageRecord) {
        self.tables.lock().await.usage.insert(user_id, record);
    }
}

#[async_trait]
impl EntitlementStore for MemoryStore {
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionStatus>> {
        Ok(self.tables.lock().await.subscriptions.get(user_id).cloned())
    }

    async fn get_credits_and_owned_items(&self, user_id: &UserId) -> Result<LedgerState> {
        let tables = self.tables.lock().await;
        let mut state = LedgerState {
            usage: tables.usage.get(user_id).cloned(),
            ..LedgerState::default()
        };
        tables
            .purchases
            .values()
            .filter(|record| record.user_id == *user_id)
            .for_each(|record| grant::collect_owned(record, &mut state));
        Ok(state)
    }

    async fn upsert_usage(&self, user_id: &UserId, update: &UsageUpdate) -> Result<UsageWrite> {
        let mut tables = self.tables.lock().await;
        let write = update.apply_to(tables.usage.get(user_id).cloned());
        if let Some(record) = write.changed() {
            tables.usage.insert(*user_id, record.clone());
        }
        Ok(write)
    }

    async fn insert_purchase_record(&self, record: &PurchaseRecord) -> Result<InsertOutcome> {
        let mut tables = self.tables.lock().await;
        if tables.purchases.contains_key(&record.transaction_id) {
            return Ok(InsertOutcome::Duplicate);
        }

        let Tables {
            subscriptions,
            usage,
            purchases,
        } = &mut *tables;

        let mut subscription = subscriptions.remove(&record.user_id);
        let mut usage_record = usage.remove(&record.user_id);
        grant::apply(
            record,
            GrantTarget {
                subscription: &mut subscription,
                usage: &mut usage_record,
            },
        );
        if let Some(subscription) = subscription {
            subscriptions.insert(record.user_id, subscription);
        }
        if let Some(usage_record) = usage_record {
            usage.insert(record.user_id, usage_record);
        }
        purchases.insert(record.transaction_id.clone(), record.clone());

        Ok(InsertOutcome::Inserted)
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        status: &SubscriptionStatus,
        transaction_id: Option<&TransactionId>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let mut current = tables.subscriptions.remove(user_id);

        let mut status = status.clone();
        if let Some(transaction_id) = transaction_id {
            status.transaction_id = Some(transaction_id.clone());
        }
        if !grant::merge_subscription(&mut current, status) {
            tracing::debug!(user_id = %user_id, "Kept later subscription expiry on file");
        }
        if let Some(current) = current {
            tables.subscriptions.insert(*user_id, current);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use guidepass_core::{
        AttractionId, ProductId, PurchaseEvent, PurchaseGrant, PurchaseState, SubscriptionKind,
    };

    fn event(product: &str, tx: &str) -> PurchaseEvent {
        PurchaseEvent {
            product_id: ProductId::new(product).unwrap(),
            transaction_id: TransactionId::new(tx).unwrap(),
            timestamp: Utc::now(),
            state: PurchaseState::Purchased,
        }
    }

    fn package_record(user_id: UserId, tx: &str, credits: u32) -> PurchaseRecord {
        let ev = event("guidepass.pack.5", tx);
        PurchaseRecord::new(
            user_id,
            &ev,
            PurchaseGrant::Credits {
                package_id: ev.product_id.clone(),
                credits,
                initial_limit: 2,
            },
        )
    }

    #[tokio::test]
    async fn duplicate_insert_applies_grant_once() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let record = package_record(user, "GPA.1", 5);

        assert_eq!(
            store.insert_purchase_record(&record).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_purchase_record(&record).await.unwrap(),
            InsertOutcome::Duplicate
        );

        let state = store.get_credits_and_owned_items(&user).await.unwrap();
        assert_eq!(state.usage.unwrap().limit, 7);
        assert_eq!(store.purchase_count().await, 1);
    }

    #[tokio::test]
    async fn package_raises_existing_limit() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let mut existing = UsageRecord::new(2);
        existing.usage_count = 2;
        store.put_usage_record(user, existing).await;

        store
            .insert_purchase_record(&package_record(user, "GPA.2", 15))
            .await
            .unwrap();

        let usage = store
            .get_credits_and_owned_items(&user)
            .await
            .unwrap()
            .usage
            .unwrap();
        assert_eq!(usage.limit, 17);
        assert_eq!(usage.usage_count, 2);
    }

    #[tokio::test]
    async fn owned_items_are_derived_from_records() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let other = UserId::generate();

        let ev = event("guidepass.attraction.louvre", "GPA.3");
        let record = PurchaseRecord::new(
            user,
            &ev,
            PurchaseGrant::Attraction {
                attraction_id: AttractionId::new("louvre").unwrap(),
            },
        );
        store.insert_purchase_record(&record).await.unwrap();
        store
            .insert_purchase_record(&package_record(user, "GPA.4", 5))
            .await
            .unwrap();

        let state = store.get_credits_and_owned_items(&user).await.unwrap();
        assert!(state
            .owned_attractions
            .contains(&AttractionId::new("louvre").unwrap()));
        assert_eq!(state.owned_packages.len(), 1);

        let others = store.get_credits_and_owned_items(&other).await.unwrap();
        assert!(others.owned_attractions.is_empty());
        assert!(others.usage.is_none());
    }

    fn unlock(id: &str, initial_limit: u32) -> UsageUpdate {
        UsageUpdate::Unlock {
            attraction_id: AttractionId::new(id).unwrap(),
            initial_limit,
        }
    }

    #[tokio::test]
    async fn upsert_usage_keeps_existing_limit() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let louvre = AttractionId::new("louvre").unwrap();

        let first = store.upsert_usage(&user, &unlock("louvre", 2)).await.unwrap();
        assert!(matches!(&first, UsageWrite::Unlocked(r) if r.limit == 2));

        let second = store.upsert_usage(&user, &unlock("prado", 50)).await.unwrap();
        let UsageWrite::Unlocked(record) = second else {
            panic!("expected unlock, got {second:?}");
        };
        assert_eq!(record.limit, 2);
        assert_eq!(record.usage_count, 2);
        assert!(record.has_unlocked(&louvre));

        let third = store.upsert_usage(&user, &unlock("uffizi", 50)).await.unwrap();
        assert!(matches!(third, UsageWrite::LimitExceeded(_)));
        let stored = store.get_credits_and_owned_items(&user).await.unwrap();
        assert_eq!(stored.usage, Some(record));
    }

    #[tokio::test]
    async fn concurrent_unlocks_count_every_credit() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let user = UserId::generate();

        let tasks: Vec<_> = ["louvre", "prado", "uffizi", "orsay"]
            .into_iter()
            .map(|id| {
                let store = store.clone();
                tokio::spawn(async move { store.upsert_usage(&user, &unlock(id, 3)).await })
            })
            .collect();
        let mut unlocked = 0;
        for task in tasks {
            if let UsageWrite::Unlocked(_) = task.await.unwrap().unwrap() {
                unlocked += 1;
            }
        }
        assert_eq!(unlocked, 3);

        let usage = store
            .get_credits_and_owned_items(&user)
            .await
            .unwrap()
            .usage
            .unwrap();
        assert_eq!(usage.usage_count, 3);
        assert_eq!(usage.unlocked_attractions.len(), 3);
    }

    #[tokio::test]
    async fn relock_unknown_attraction_writes_nothing() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let relock = UsageUpdate::Relock {
            attraction_id: AttractionId::new("louvre").unwrap(),
        };

        let write = store.upsert_usage(&user, &relock).await.unwrap();
        assert_eq!(write, UsageWrite::NotUnlocked);
        assert!(store
            .get_credits_and_owned_items(&user)
            .await
            .unwrap()
            .usage
            .is_none());
    }

    #[tokio::test]
    async fn subscription_grant_never_shortens_expiry() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let now = Utc::now();

        let later = SubscriptionStatus::active(
            SubscriptionKind::Unlimited,
            Some(now + Duration::days(365)),
        );
        store.upsert_subscription(&user, &later, None).await.unwrap();

        let ev = event("guidepass.unlimited.monthly", "GPA.5");
        let record = PurchaseRecord::new(
            user,
            &ev,
            PurchaseGrant::Subscription {
                kind: SubscriptionKind::Unlimited,
                expires_at: Some(now + Duration::days(30)),
            },
        );
        assert_eq!(
            store.insert_purchase_record(&record).await.unwrap(),
            InsertOutcome::Inserted
        );

        let stored = store.get_subscription_status(&user).await.unwrap().unwrap();
        assert_eq!(stored.expires_at, later.expires_at);
    }

    #[tokio::test]
    async fn upsert_subscription_records_transaction() {
        let store = MemoryStore::new();
        let user = UserId::generate();
        let tx = TransactionId::new("GPA.6").unwrap();
        let status = SubscriptionStatus::active(SubscriptionKind::LegacyPremium, None);

        store
            .upsert_subscription(&user, &status, Some(&tx))
            .await
            .unwrap();

        let stored = store.get_subscription_status(&user).await.unwrap().unwrap();
        assert_eq!(stored.transaction_id, Some(tx));
        assert_eq!(stored.kind, SubscriptionKind::LegacyPremium);
    }
}
