//! Usage records for guidepass.
//!
//! The remote ledger keeps one `UsageRecord` per user: how many attraction
//! credits were spent, the credit limit, and which attractions those credits
//! unlocked. The credit pools are derived from it, see
//! [`CreditsLedger::from_usage`].

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, Result};
use crate::{AttractionId, CreditsLedger};

/// Per-user credit usage as stored in the remote ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// Credits spent so far.
    pub usage_count: u32,

    /// Lifetime credit limit (trial allowance plus purchased packages).
    pub limit: u32,

    /// Attractions unlocked by spending a credit.
    #[serde(default)]
    pub unlocked_attractions: BTreeSet<AttractionId>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    /// Create an unused record with the given limit.
    #[must_use]
    pub fn new(limit: u32) -> Self {
        Self {
            usage_count: 0,
            limit,
            unlocked_attractions: BTreeSet::new(),
            updated_at: Utc::now(),
        }
    }

    /// Whether a credit was already spent on `attraction_id`.
    #[must_use]
    pub fn has_unlocked(&self, attraction_id: &AttractionId) -> bool {
        self.unlocked_attractions.contains(attraction_id)
    }

    /// Credits left before the limit.
    #[must_use]
    pub const fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.usage_count)
    }

    /// The usage count after spending one more credit.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::LimitExceeded` if that would pass the limit.
    pub fn next_count(&self) -> Result<u32> {
        let next = self.usage_count.saturating_add(1);
        if next > self.limit {
            return Err(BillingError::LimitExceeded {
                usage_count: self.usage_count,
                limit: self.limit,
            });
        }
        Ok(next)
    }

    /// Raise the limit after a package purchase.
    pub fn raise_limit(&mut self, credits: u32) {
        self.limit = self.limit.saturating_add(credits);
        self.updated_at = Utc::now();
    }

    /// Spend a credit on `attraction_id` unless it is already unlocked or
    /// the limit is reached. Returns whether the record changed.
    fn unlock(&mut self, attraction_id: &AttractionId) -> bool {
        if self.has_unlocked(attraction_id) {
            return false;
        }
        let Ok(next) = self.next_count() else {
            return false;
        };
        self.usage_count = next;
        self.unlocked_attractions.insert(attraction_id.clone());
        self.updated_at = Utc::now();
        true
    }

    /// Return the credit spent on `attraction_id`. Returns whether the record changed.
    fn relock(&mut self, attraction_id: &AttractionId) -> bool {
        if !self.unlocked_attractions.remove(attraction_id) {
            return false;
        }
        self.usage_count = self.usage_count.saturating_sub(1);
        self.updated_at = Utc::now();
        true
    }

    /// Derive the credit pools.
    #[must_use]
    pub fn ledger(&self, trial_allowance: u32) -> CreditsLedger {
        CreditsLedger::from_usage(self.usage_count, self.limit, trial_allowance)
    }
}

/// A change to a user's usage record.
///
/// Updates carry intent, not counts: the store applies them against the
/// record it holds, inside its own write, so concurrent updates from several
/// devices never overwrite each other's increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum UsageUpdate {
    /// Spend a credit on an attraction.
    Unlock {
        /// Attraction to unlock.
        attraction_id: AttractionId,
        /// Limit for a user with no record yet (trial allowance plus owned packages).
        initial_limit: u32,
    },
    /// Return the credit spent on an attraction.
    Relock {
        /// Attraction to relock.
        attraction_id: AttractionId,
    },
}

impl UsageUpdate {
    /// Apply the update to the stored record (`None` if the user has none).
    ///
    /// Stores call this inside their write and persist
    /// [`UsageWrite::changed`] when it is set.
    #[must_use]
    pub fn apply_to(&self, current: Option<UsageRecord>) -> UsageWrite {
        match self {
            Self::Unlock {
                attraction_id,
                initial_limit,
            } => {
                let mut record = current.unwrap_or_else(|| UsageRecord::new(*initial_limit));
                if record.has_unlocked(attraction_id) {
                    UsageWrite::AlreadyUnlocked(record)
                } else if record.unlock(attraction_id) {
                    UsageWrite::Unlocked(record)
                } else {
                    UsageWrite::LimitExceeded(record)
                }
            }
            Self::Relock { attraction_id } => match current {
                Some(mut record) => {
                    if record.relock(attraction_id) {
                        UsageWrite::Relocked(record)
                    } else {
                        UsageWrite::NotUnlocked
                    }
                }
                None => UsageWrite::NotUnlocked,
            },
        }
    }
}

/// Result of applying a [`UsageUpdate`], with the record after the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "effect", content = "record")]
pub enum UsageWrite {
    /// A credit was spent.
    Unlocked(UsageRecord),
    /// The attraction was already unlocked; nothing changed.
    AlreadyUnlocked(UsageRecord),
    /// The limit is reached; nothing changed.
    LimitExceeded(UsageRecord),
    /// The credit was returned.
    Relocked(UsageRecord),
    /// The attraction was not unlocked; nothing changed.
    NotUnlocked,
}

impl UsageWrite {
    /// The record to persist, if the update changed it.
    #[must_use]
    pub const fn changed(&self) -> Option<&UsageRecord> {
        match self {
            Self::Unlocked(record) | Self::Relocked(record) => Some(record),
            Self::AlreadyUnlocked(_) | Self::LimitExceeded(_) | Self::NotUnlocked => None,
        }
    }
}
