//! Common test utilities for guidepass integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use guidepass_core::{
    Catalog, ProductId, PurchaseEvent, PurchaseGrant, PurchaseRecord, PurchaseState,
    SubscriptionStatus, TransactionId, UsageRecord, UsageUpdate, UsageWrite, UserId,
};
use guidepass_service::{
    EntitlementService, LedgerEvent, ProviderError, ProviderUpdate, PurchaseProvider,
    ServiceConfig,
};
use guidepass_store::{
    EntitlementStore, InsertOutcome, LedgerState, MemorySnapshotCache, MemoryStore, StoreError,
};

// ============================================================================
// Scripted purchase provider
// ============================================================================

#[derive(Default)]
struct ProviderState {
    fail_connect: bool,
    connected: bool,
    connect_calls: usize,
    fail_list: bool,
    purchases: Vec<PurchaseEvent>,
    purchase_results: VecDeque<Result<PurchaseEvent, ProviderError>>,
    fail_acknowledge: bool,
    acknowledged: Vec<(TransactionId, bool)>,
}

/// Purchase provider driven by the test.
pub struct MockProvider {
    state: Mutex<ProviderState>,
    updates: broadcast::Sender<ProviderUpdate>,
}

impl MockProvider {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(ProviderState::default()),
            updates,
        }
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    pub fn fail_list(&self, fail: bool) {
        self.state.lock().unwrap().fail_list = fail;
    }

    pub fn fail_acknowledge(&self, fail: bool) {
        self.state.lock().unwrap().fail_acknowledge = fail;
    }

    /// Make the platform know a purchase (returned by restores).
    pub fn add_purchase(&self, event: PurchaseEvent) {
        self.state.lock().unwrap().purchases.push(event);
    }

    /// Queue the result of the next purchase dialog.
    pub fn script_purchase(&self, result: Result<PurchaseEvent, ProviderError>) {
        self.state.lock().unwrap().purchase_results.push_back(result);
    }

    /// Deliver purchases through the push channel.
    pub fn push(&self, events: Vec<PurchaseEvent>) {
        self.push_update(ProviderUpdate::Purchases(events));
    }

    pub fn push_update(&self, update: ProviderUpdate) {
        self.updates.send(update).expect("no listener subscribed");
    }

    pub fn connect_calls(&self) -> usize {
        self.state.lock().unwrap().connect_calls
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    /// Acknowledged transactions with their consumable flag, in order.
    pub fn acknowledged(&self) -> Vec<(TransactionId, bool)> {
        self.state.lock().unwrap().acknowledged.clone()
    }
}

#[async_trait]
impl PurchaseProvider for MockProvider {
    fn platform(&self) -> &str {
        "mock_store"
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        state.connect_calls += 1;
        if state.fail_connect {
            return Err(ProviderError::ConnectionFailed("store service offline".into()));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }

    fn subscribe(&self) -> broadcast::Receiver<ProviderUpdate> {
        self.updates.subscribe()
    }

    async fn list_available_purchases(&self) -> Result<Vec<PurchaseEvent>, ProviderError> {
        let state = self.state.lock().unwrap();
        if state.fail_list {
            return Err(ProviderError::ConnectionFailed("billing unavailable".into()));
        }
        Ok(state.purchases.clone())
    }

    async fn request_purchase(
        &self,
        _product_id: &ProductId,
    ) -> Result<PurchaseEvent, ProviderError> {
        let mut state = self.state.lock().unwrap();
        let result = state
            .purchase_results
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Rejected("no scripted purchase".into())));
        if let Ok(event) = &result {
            if event.state.is_settled() {
                state.purchases.push(event.clone());
            }
        }
        result
    }

    async fn acknowledge(
        &self,
        event: &PurchaseEvent,
        consumable: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_acknowledge {
            return Err(ProviderError::ConnectionFailed("acknowledge timed out".into()));
        }
        state
            .acknowledged
            .push((event.transaction_id.clone(), consumable));
        Ok(())
    }
}

// ============================================================================
// Store wrapper with injectable failures
// ============================================================================

/// `MemoryStore` that can be taken offline or made to fail writes.
pub struct FlakyStore {
    pub inner: MemoryStore,
    offline: AtomicBool,
    failing_writes: AtomicUsize,
    usage_writes: AtomicUsize,
    yielding: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            offline: AtomicBool::new(false),
            failing_writes: AtomicUsize::new(0),
            usage_writes: AtomicUsize::new(0),
            yielding: AtomicBool::new(false),
        }
    }

    /// Yield to the runtime before every call, as a network round trip would.
    pub fn set_yielding(&self, yielding: bool) {
        self.yielding.store(yielding, Ordering::SeqCst);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a transient error.
    pub fn fail_next_writes(&self, n: usize) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Usage write attempts, failed ones included.
    pub fn usage_writes(&self) -> usize {
        self.usage_writes.load(Ordering::SeqCst)
    }

    async fn round_trip(&self) {
        if self.yielding.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn check_read(&self) -> guidepass_store::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("network unreachable".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> guidepass_store::Result<()> {
        self.check_read()?;
        let failing = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(StoreError::Unavailable("503 from ledger".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementStore for FlakyStore {
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> guidepass_store::Result<Option<SubscriptionStatus>> {
        self.round_trip().await;
        self.check_read()?;
        self.inner.get_subscription_status(user_id).await
    }

    async fn get_credits_and_owned_items(
        &self,
        user_id: &UserId,
    ) -> guidepass_store::Result<LedgerState> {
        self.round_trip().await;
        self.check_read()?;
        self.inner.get_credits_and_owned_items(user_id).await
    }

    async fn upsert_usage(
        &self,
        user_id: &UserId,
        update: &UsageUpdate,
    ) -> guidepass_store::Result<UsageWrite> {
        self.round_trip().await;
        self.usage_writes.fetch_add(1, Ordering::SeqCst);
        self.check_write()?;
        self.inner.upsert_usage(user_id, update).await
    }

    async fn insert_purchase_record(
        &self,
        record: &PurchaseRecord,
    ) -> guidepass_store::Result<InsertOutcome> {
        self.round_trip().await;
        self.check_write()?;
        self.inner.insert_purchase_record(record).await
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        status: &SubscriptionStatus,
        transaction_id: Option<&TransactionId>,
    ) -> guidepass_store::Result<()> {
        self.round_trip().await;
        self.check_write()?;
        self.inner
            .upsert_subscription(user_id, status, transaction_id)
            .await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The service under test.
    pub service: EntitlementService,
    /// The remote ledger double.
    pub store: Arc<FlakyStore>,
    /// The purchase provider double.
    pub provider: Arc<MockProvider>,
    /// The on-device cache.
    pub cache: Arc<MemorySnapshotCache>,
    /// The signed-in user.
    pub user_id: UserId,
}

impl TestHarness {
    /// Create a disconnected service with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    /// Create a disconnected service with `config`.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store = Arc::new(FlakyStore::new());
        let provider = Arc::new(MockProvider::new());
        let cache = Arc::new(MemorySnapshotCache::new());
        let user_id = UserId::generate();

        let service = EntitlementService::new(
            user_id,
            store.clone(),
            provider.clone(),
            cache.clone(),
            config,
        );

        Self {
            service,
            store,
            provider,
            cache,
            user_id,
        }
    }

    /// Create a service and connect it.
    pub async fn connected() -> Self {
        let harness = Self::new();
        harness.service.connect().await.expect("connect failed");
        harness
    }

    /// Write a purchase straight into the ledger, bypassing the provider.
    pub async fn seed_purchase(&self, product: &str, transaction: &str) {
        let event = event(product, transaction, PurchaseState::Purchased);
        let kind = Catalog::default()
            .classify(&event.product_id)
            .expect("unknown product");
        let grant = PurchaseGrant::for_product(&kind, &event.product_id, event.timestamp, 2);
        let record = PurchaseRecord::new(self.user_id, &event, grant);
        self.store
            .inner
            .insert_purchase_record(&record)
            .await
            .expect("seed failed");
    }

    /// Write a subscription straight into the ledger.
    pub async fn seed_subscription(&self, status: SubscriptionStatus) {
        self.store
            .inner
            .upsert_subscription(&self.user_id, &status, None)
            .await
            .expect("seed failed");
    }

    /// Overwrite the user's usage record.
    pub async fn seed_usage(&self, usage_count: u32, limit: u32) {
        let mut record = UsageRecord::new(limit);
        record.usage_count = usage_count;
        self.store.inner.put_usage_record(self.user_id, record).await;
    }

    /// The user's ledger state as stored.
    pub async fn ledger_state(&self) -> LedgerState {
        self.store
            .inner
            .get_credits_and_owned_items(&self.user_id)
            .await
            .expect("read failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A purchase event stamped now.
pub fn event(product: &str, transaction: &str, state: PurchaseState) -> PurchaseEvent {
    event_at(product, transaction, state, Utc::now())
}

/// A purchase event with an explicit platform timestamp.
pub fn event_at(
    product: &str,
    transaction: &str,
    state: PurchaseState,
    timestamp: DateTime<Utc>,
) -> PurchaseEvent {
    PurchaseEvent {
        product_id: ProductId::new(product).expect("invalid product id"),
        transaction_id: TransactionId::new(transaction).expect("invalid transaction id"),
        timestamp,
        state,
    }
}

/// Wait for the first bus event matching `predicate`.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<LedgerEvent>,
    predicate: F,
) -> LedgerEvent
where
    F: Fn(&LedgerEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("ledger bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for ledger event")
}
