//! Usage recording.
//!
//! Runs after the UI has already granted access, so nothing here returns an
//! error: failures are logged and reported as an outcome. Access already
//! granted is never rolled back.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use guidepass_core::{AccessReason, AttractionId, Catalog, UsageUpdate, UsageWrite, UserId};
use guidepass_store::EntitlementStore;

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of attempts for a usage write.
const USAGE_MAX_RETRIES: u32 = 3;

/// Initial backoff duration for retries (doubles with each attempt).
const USAGE_INITIAL_BACKOFF_MS: u64 = 100;

/// Maximum backoff duration for retries.
const USAGE_MAX_BACKOFF_MS: u64 = 2000;

/// Result of recording usage for an attraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum UsageOutcome {
    /// A credit was spent.
    Recorded {
        /// Usage count after the write.
        usage_count: u32,
        /// Credit limit.
        limit: u32,
    },
    /// A credit was already spent on this attraction; nothing was written.
    AlreadyUnlocked,
    /// Spending would pass the limit; nothing was written.
    LimitExceeded {
        /// Credits already spent.
        usage_count: u32,
        /// Credit limit.
        limit: u32,
    },
    /// Access did not cost a credit.
    NotRequired {
        /// Why access was granted or refused.
        reason: AccessReason,
    },
    /// The ledger could not be read or written.
    Failed,
}

/// Result of refunding a credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RefundOutcome {
    /// The credit was returned.
    Refunded {
        /// Usage count after the write.
        usage_count: u32,
    },
    /// No credit was spent on this attraction.
    NotUnlocked,
    /// The ledger could not be read or written.
    Failed,
}

/// Writes credit spends and refunds to the remote ledger.
pub struct UsageRecorder {
    user_id: UserId,
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<Catalog>,
}

impl UsageRecorder {
    /// Create a recorder for one user.
    #[must_use]
    pub fn new(user_id: UserId, store: Arc<dyn EntitlementStore>, catalog: Arc<Catalog>) -> Self {
        Self {
            user_id,
            store,
            catalog,
        }
    }

    /// Spend one credit on `attraction_id`.
    ///
    /// Attractions bought outright are never charged. A user's first record
    /// also persists the limit derived from the packages they own.
    pub async fn record(&self, attraction_id: &AttractionId) -> UsageOutcome {
        let state = match self.store.get_credits_and_owned_items(&self.user_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    error = %e,
                    "Failed to load usage record"
                );
                return UsageOutcome::Failed;
            }
        };

        if state.owned_attractions.contains(attraction_id) {
            return UsageOutcome::NotRequired {
                reason: AccessReason::Owned,
            };
        }

        // The ledger increments and checks the limit inside its own write;
        // the limit only applies when this is the user's first record.
        let update = UsageUpdate::Unlock {
            attraction_id: attraction_id.clone(),
            initial_limit: self.catalog.limit_for_packages(&state.owned_packages),
        };

        match self.upsert_with_retry(&update).await {
            Ok(UsageWrite::Unlocked(record)) => {
                tracing::info!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    usage_count = record.usage_count,
                    limit = record.limit,
                    "Usage recorded"
                );
                UsageOutcome::Recorded {
                    usage_count: record.usage_count,
                    limit: record.limit,
                }
            }
            Ok(UsageWrite::AlreadyUnlocked(_)) => {
                tracing::debug!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    "Attraction already unlocked"
                );
                UsageOutcome::AlreadyUnlocked
            }
            Ok(UsageWrite::LimitExceeded(record)) => {
                tracing::info!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    usage_count = record.usage_count,
                    limit = record.limit,
                    "Usage not recorded, limit reached"
                );
                UsageOutcome::LimitExceeded {
                    usage_count: record.usage_count,
                    limit: record.limit,
                }
            }
            Ok(other) => {
                tracing::error!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    write = ?other,
                    "Ledger answered an unlock with a relock effect"
                );
                UsageOutcome::Failed
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    error = %e,
                    "Failed to record usage"
                );
                UsageOutcome::Failed
            }
        }
    }

    /// Return the credit spent on `attraction_id`.
    pub async fn refund(&self, attraction_id: &AttractionId) -> RefundOutcome {
        let update = UsageUpdate::Relock {
            attraction_id: attraction_id.clone(),
        };

        match self.upsert_with_retry(&update).await {
            Ok(UsageWrite::Relocked(record)) => {
                tracing::info!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    usage_count = record.usage_count,
                    "Usage refunded"
                );
                RefundOutcome::Refunded {
                    usage_count: record.usage_count,
                }
            }
            Ok(UsageWrite::NotUnlocked) => RefundOutcome::NotUnlocked,
            Ok(other) => {
                tracing::error!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    write = ?other,
                    "Ledger answered a relock with an unlock effect"
                );
                RefundOutcome::Failed
            }
            Err(e) => {
                tracing::warn!(
                    user_id = %self.user_id,
                    attraction_id = %attraction_id,
                    error = %e,
                    "Failed to refund usage"
                );
                RefundOutcome::Failed
            }
        }
    }

    /// Write `update`, retrying transient failures with exponential backoff.
    ///
    /// Updates are keyed by attraction, so repeating one after a lost
    /// response changes nothing; the repeat reports `AlreadyUnlocked` or
    /// `NotUnlocked` instead.
    async fn upsert_with_retry(
        &self,
        update: &UsageUpdate,
    ) -> guidepass_store::Result<UsageWrite> {
        let mut attempt = 0;
        let mut backoff_ms = USAGE_INITIAL_BACKOFF_MS;

        loop {
            match self.store.upsert_usage(&self.user_id, update).await {
                Ok(write) => return Ok(write),
                Err(e) if e.is_transient() => {
                    attempt += 1;

                    if attempt >= USAGE_MAX_RETRIES {
                        return Err(e);
                    }

                    tracing::debug!(
                        user_id = %self.user_id,
                        attempt = %attempt,
                        backoff_ms = %backoff_ms,
                        error = %e,
                        "Usage write failed, retrying"
                    );

                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;

                    // Exponential backoff with cap
                    backoff_ms = (backoff_ms * 2).min(USAGE_MAX_BACKOFF_MS);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guidepass_core::{
        ProductId, PurchaseEvent, PurchaseGrant, PurchaseRecord, PurchaseState, TransactionId,
    };
    use guidepass_store::MemoryStore;

    fn attraction(s: &str) -> AttractionId {
        AttractionId::new(s).unwrap()
    }

    fn recorder(store: Arc<MemoryStore>, user_id: UserId) -> UsageRecorder {
        UsageRecorder::new(user_id, store, Arc::new(Catalog::default()))
    }

    #[tokio::test]
    async fn first_record_persists_trial_limit() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();

        let outcome = recorder(store.clone(), user_id)
            .record(&attraction("louvre"))
            .await;
        assert_eq!(
            outcome,
            UsageOutcome::Recorded {
                usage_count: 1,
                limit: 2
            }
        );
    }

    #[tokio::test]
    async fn repeat_attraction_is_not_charged_twice() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let recorder = recorder(store.clone(), user_id);

        recorder.record(&attraction("louvre")).await;
        assert_eq!(
            recorder.record(&attraction("louvre")).await,
            UsageOutcome::AlreadyUnlocked
        );

        let state = store.get_credits_and_owned_items(&user_id).await.unwrap();
        assert_eq!(state.usage.unwrap().usage_count, 1);
    }

    #[tokio::test]
    async fn limit_is_enforced() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let recorder = recorder(store.clone(), user_id);

        recorder.record(&attraction("louvre")).await;
        recorder.record(&attraction("prado")).await;
        assert_eq!(
            recorder.record(&attraction("uffizi")).await,
            UsageOutcome::LimitExceeded {
                usage_count: 2,
                limit: 2
            }
        );
    }

    #[tokio::test]
    async fn package_purchase_raises_limit() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();

        let event = PurchaseEvent {
            product_id: ProductId::new("guidepass.pack.5").unwrap(),
            transaction_id: TransactionId::new("GPA.77").unwrap(),
            timestamp: chrono::Utc::now(),
            state: PurchaseState::Purchased,
        };
        let record = PurchaseRecord::new(
            user_id,
            &event,
            PurchaseGrant::Credits {
                package_id: event.product_id.clone(),
                credits: 5,
                initial_limit: 2,
            },
        );
        store.insert_purchase_record(&record).await.unwrap();

        assert_eq!(
            recorder(store, user_id).record(&attraction("louvre")).await,
            UsageOutcome::Recorded {
                usage_count: 1,
                limit: 7
            }
        );
    }

    #[tokio::test]
    async fn refund_returns_credit() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let recorder = recorder(store.clone(), user_id);

        recorder.record(&attraction("louvre")).await;
        assert_eq!(
            recorder.refund(&attraction("louvre")).await,
            RefundOutcome::Refunded { usage_count: 0 }
        );
        assert_eq!(
            recorder.refund(&attraction("louvre")).await,
            RefundOutcome::NotUnlocked
        );

        // The refunded attraction can be unlocked again
        assert_eq!(
            recorder.record(&attraction("louvre")).await,
            UsageOutcome::Recorded {
                usage_count: 1,
                limit: 2
            }
        );
    }

    #[tokio::test]
    async fn concurrent_records_share_one_limit() {
        let store = Arc::new(MemoryStore::new());
        let user_id = UserId::generate();
        let recorder = recorder(store.clone(), user_id);

        let louvre = attraction("louvre");
        let prado = attraction("prado");
        let uffizi = attraction("uffizi");
        let outcomes = tokio::join!(
            recorder.record(&louvre),
            recorder.record(&prado),
            recorder.record(&uffizi),
        );
        let outcomes = [outcomes.0, outcomes.1, outcomes.2];

        let recorded = outcomes
            .iter()
            .filter(|o| matches!(o, UsageOutcome::Recorded { .. }))
            .count();
        assert_eq!(recorded, 2);
        assert!(outcomes.contains(&UsageOutcome::LimitExceeded {
            usage_count: 2,
            limit: 2
        }));

        let usage = store
            .get_credits_and_owned_items(&user_id)
            .await
            .unwrap()
            .usage
            .unwrap();
        assert_eq!(usage.usage_count, 2);
        assert_eq!(usage.unlocked_attractions.len(), 2);
    }
}
