//! `RocksDB` storage implementation.
//!
//! This module provides `RocksStore`, implementing both [`EntitlementStore`]
//! (for a device-local ledger) and [`SnapshotCache`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};

use guidepass_core::{
    EntitlementSnapshot, PurchaseRecord, SubscriptionStatus, TransactionId, UsageRecord,
    UsageUpdate, UsageWrite, UserId,
};

use crate::cache::SnapshotCache;
use crate::error::{Result, StoreError};
use crate::grant::{self, GrantTarget};
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::{EntitlementStore, InsertOutcome, LedgerState};

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    /// Serializes read-modify-write sequences; the purchase key check and the
    /// batch that writes it must not interleave.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Mutex::new(()),
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn get<T: serde::de::DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| StoreError::Database("write lock poisoned".into()))
    }

    fn purchases_for(&self, user_id: &UserId) -> Result<Vec<PurchaseRecord>> {
        let cf_by_user = self.cf(cf::PURCHASES_BY_USER)?;
        let prefix = keys::user_purchases_prefix(user_id);

        let iter = self
            .db
            .iterator_cf(&cf_by_user, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }

            let Some(tx_id) = keys::extract_transaction_id_from_user_key(&key) else {
                tracing::warn!(user_id = %user_id, "Skipping malformed purchase index key");
                continue;
            };
            if let Some(record) = self.get(cf::PURCHASES, &keys::purchase_key(&tx_id))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn insert_purchase_sync(&self, record: &PurchaseRecord) -> Result<InsertOutcome> {
        let _guard = self.lock()?;

        let purchase_key = keys::purchase_key(&record.transaction_id);
        let cf_purchases = self.cf(cf::PURCHASES)?;
        let exists = self
            .db
            .get_cf(&cf_purchases, &purchase_key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .is_some();
        if exists {
            return Ok(InsertOutcome::Duplicate);
        }

        let user_key = keys::user_key(&record.user_id);
        let mut subscription: Option<SubscriptionStatus> = self.get(cf::SUBSCRIPTIONS, &user_key)?;
        let mut usage: Option<UsageRecord> = self.get(cf::USAGE, &user_key)?;
        grant::apply(
            record,
            GrantTarget {
                subscription: &mut subscription,
                usage: &mut usage,
            },
        );

        let cf_subscriptions = self.cf(cf::SUBSCRIPTIONS)?;
        let cf_usage = self.cf(cf::USAGE)?;
        let cf_by_user = self.cf(cf::PURCHASES_BY_USER)?;

        // Write atomically
        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_purchases, &purchase_key, Self::serialize(record)?);
        batch.put_cf(
            &cf_by_user,
            keys::user_purchase_key(&record.user_id, &record.transaction_id),
            [],
        );
        if let Some(subscription) = &subscription {
            batch.put_cf(&cf_subscriptions, &user_key, Self::serialize(subscription)?);
        }
        if let Some(usage) = &usage {
            batch.put_cf(&cf_usage, &user_key, Self::serialize(usage)?);
        }

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(InsertOutcome::Inserted)
    }

    fn upsert_usage_sync(&self, user_id: &UserId, update: &UsageUpdate) -> Result<UsageWrite> {
        let _guard = self.lock()?;
        let key = keys::user_key(user_id);

        let write = update.apply_to(self.get::<UsageRecord>(cf::USAGE, &key)?);
        if let Some(record) = write.changed() {
            let cf = self.cf(cf::USAGE)?;
            self.db
                .put_cf(&cf, key, Self::serialize(record)?)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(write)
    }

    fn upsert_subscription_sync(
        &self,
        user_id: &UserId,
        status: &SubscriptionStatus,
        transaction_id: Option<&TransactionId>,
    ) -> Result<()> {
        let _guard = self.lock()?;
        let key = keys::user_key(user_id);

        let mut current = self.get(cf::SUBSCRIPTIONS, &key)?;
        let mut status = status.clone();
        if let Some(transaction_id) = transaction_id {
            status.transaction_id = Some(transaction_id.clone());
        }
        if !grant::merge_subscription(&mut current, status) {
            return Ok(());
        }

        if let Some(current) = current {
            let cf = self.cf(cf::SUBSCRIPTIONS)?;
            self.db
                .put_cf(&cf, key, Self::serialize(&current)?)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for RocksStore {
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionStatus>> {
        self.get(cf::SUBSCRIPTIONS, &keys::user_key(user_id))
    }

    async fn get_credits_and_owned_items(&self, user_id: &UserId) -> Result<LedgerState> {
        let mut state = LedgerState {
            usage: self.get(cf::USAGE, &keys::user_key(user_id))?,
            ..LedgerState::default()
        };
        for record in self.purchases_for(user_id)? {
            grant::collect_owned(&record, &mut state);
        }
        Ok(state)
    }

    async fn upsert_usage(&self, user_id: &UserId, update: &UsageUpdate) -> Result<UsageWrite> {
        self.upsert_usage_sync(user_id, update)
    }

    async fn insert_purchase_record(&self, record: &PurchaseRecord) -> Result<InsertOutcome> {
        self.insert_purchase_sync(record)
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        status: &SubscriptionStatus,
        transaction_id: Option<&TransactionId>,
    ) -> Result<()> {
        self.upsert_subscription_sync(user_id, status, transaction_id)
    }
}

#[async_trait]
impl SnapshotCache for RocksStore {
    async fn load(&self, user_id: &UserId) -> Result<Option<EntitlementSnapshot>> {
        self.get(cf::SNAPSHOTS, &keys::user_key(user_id))
    }

    async fn store(&self, user_id: &UserId, snapshot: &EntitlementSnapshot) -> Result<()> {
        let cf = self.cf(cf::SNAPSHOTS)?;
        self.db
            .put_cf(&cf, keys::user_key(user_id), Self::serialize(snapshot)?)
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn clear(&self, user_id: &UserId) -> Result<()> {
        let cf = self.cf(cf::SNAPSHOTS)?;
        self.db
            .delete_cf(&cf, keys::user_key(user_id))
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}
