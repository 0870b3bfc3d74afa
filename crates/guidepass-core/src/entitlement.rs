//! Entitlement resolution for guidepass.
//!
//! The resolver combines the subscription, the credit ledger and the owned
//! items into an access decision. It never mutates anything and can be called
//! as often as the UI likes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AttractionId, CreditSummary, CreditsLedger, ProductId, SubscriptionStatus};

/// Items a user owns outright.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedItems {
    /// Attractions bought individually.
    pub attractions: BTreeSet<AttractionId>,

    /// Credit packages bought. A package raises the purchased pool; it does
    /// not enumerate attractions.
    pub packages: BTreeSet<ProductId>,

    /// Attractions already unlocked by spending a credit.
    #[serde(default)]
    pub unlocked: BTreeSet<AttractionId>,
}

impl OwnedItems {
    /// Whether `attraction_id` is accessible without spending a credit.
    #[must_use]
    pub fn owns(&self, attraction_id: &AttractionId) -> bool {
        self.attractions.contains(attraction_id) || self.unlocked.contains(attraction_id)
    }
}

/// Materialized entitlement view handed to the UI.
///
/// Always derived from the remote ledger (or its cached copy); never
/// persisted as a ledger record of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementSnapshot {
    /// Whether the subscription granted unlimited access when the snapshot was built.
    pub has_unlimited_access: bool,

    /// Subscription the snapshot was built from; expiry is re-checked on read.
    pub subscription: SubscriptionStatus,

    /// Credit pools.
    pub ledger: CreditsLedger,

    /// Attractions bought individually.
    pub owned_attractions: BTreeSet<AttractionId>,

    /// Credit packages bought.
    pub owned_packages: BTreeSet<ProductId>,

    /// Attractions already unlocked with a credit.
    #[serde(default)]
    pub unlocked_attractions: BTreeSet<AttractionId>,

    /// When the snapshot was read from the remote ledger.
    pub refreshed_at: DateTime<Utc>,
}

impl EntitlementSnapshot {
    /// Build a snapshot from the three sources.
    #[must_use]
    pub fn build(
        subscription: SubscriptionStatus,
        ledger: CreditsLedger,
        owned: OwnedItems,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            has_unlimited_access: subscription.grants_unlimited_at(now),
            subscription: subscription.effective_at(now),
            ledger,
            owned_attractions: owned.attractions,
            owned_packages: owned.packages,
            unlocked_attractions: owned.unlocked,
            refreshed_at: now,
        }
    }

    /// Snapshot for a user with nothing but the trial allowance.
    #[must_use]
    pub fn empty(trial_allowance: u32, now: DateTime<Utc>) -> Self {
        Self::build(
            SubscriptionStatus::none(),
            CreditsLedger::from_usage(0, trial_allowance, trial_allowance),
            OwnedItems::default(),
            now,
        )
    }

    /// Owned items view of the snapshot.
    #[must_use]
    pub fn owned_items(&self) -> OwnedItems {
        OwnedItems {
            attractions: self.owned_attractions.clone(),
            packages: self.owned_packages.clone(),
            unlocked: self.unlocked_attractions.clone(),
        }
    }

    /// Credit summary for display.
    #[must_use]
    pub fn credit_summary(&self) -> CreditSummary {
        self.ledger.summarize()
    }
}

/// Why access was granted or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// Active subscription (current or grandfathered plan).
    Unlimited,
    /// Purchased capacity beyond the free allowance, with credits left.
    Pack,
    /// Attraction owned outright or already unlocked.
    Owned,
    /// Free allowance credits left.
    FreeRemaining,
    /// Nothing grants access; present an upsell.
    Blocked,
}

impl AccessReason {
    /// Stable tag for analytics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unlimited => "unlimited",
            Self::Pack => "pack",
            Self::Owned => "owned",
            Self::FreeRemaining => "free_remaining",
            Self::Blocked => "blocked",
        }
    }
}

/// Access decision for one attraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether the guide may be played or generated.
    pub has_access: bool,
    /// Reason tag.
    pub reason: AccessReason,
}

impl AccessDecision {
    const fn granted(reason: AccessReason) -> Self {
        Self {
            has_access: true,
            reason,
        }
    }

    const fn blocked() -> Self {
        Self {
            has_access: false,
            reason: AccessReason::Blocked,
        }
    }

    /// Whether granting this access spends a credit.
    #[must_use]
    pub const fn consumes_credit(&self) -> bool {
        matches!(self.reason, AccessReason::Pack | AccessReason::FreeRemaining)
    }
}

/// Turns entitlement state into access decisions.
#[derive(Debug, Clone, Copy)]
pub struct EntitlementResolver {
    trial_allowance: u32,
}

impl EntitlementResolver {
    /// Create a resolver for the given free allowance.
    #[must_use]
    pub const fn new(trial_allowance: u32) -> Self {
        Self { trial_allowance }
    }

    /// Decide access to `attraction_id`.
    ///
    /// Precedence: unlimited, pack, owned, free remaining, blocked.
    #[must_use]
    pub fn resolve(
        &self,
        subscription: &SubscriptionStatus,
        ledger: &CreditsLedger,
        owned: &OwnedItems,
        attraction_id: &AttractionId,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        if subscription.grants_unlimited_at(now) {
            return AccessDecision::granted(AccessReason::Unlimited);
        }
        if self.has_pack_credits(ledger) {
            return AccessDecision::granted(AccessReason::Pack);
        }
        if owned.owns(attraction_id) {
            return AccessDecision::granted(AccessReason::Owned);
        }
        if ledger.available_total() > 0 {
            return AccessDecision::granted(AccessReason::FreeRemaining);
        }
        AccessDecision::blocked()
    }

    /// Decide access from a snapshot, re-checking subscription expiry at `now`.
    #[must_use]
    pub fn resolve_snapshot(
        &self,
        snapshot: &EntitlementSnapshot,
        attraction_id: &AttractionId,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        self.resolve(
            &snapshot.subscription,
            &snapshot.ledger,
            &snapshot.owned_items(),
            attraction_id,
            now,
        )
    }

    /// Decide whether a new guide may be generated (no specific attraction).
    #[must_use]
    pub fn resolve_generation(
        &self,
        subscription: &SubscriptionStatus,
        ledger: &CreditsLedger,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        if subscription.grants_unlimited_at(now) {
            AccessDecision::granted(AccessReason::Unlimited)
        } else if self.has_pack_credits(ledger) {
            AccessDecision::granted(AccessReason::Pack)
        } else if ledger.available_total() > 0 {
            AccessDecision::granted(AccessReason::FreeRemaining)
        } else {
            AccessDecision::blocked()
        }
    }

    /// Total capacity beyond the free grant, with credits left.
    fn has_pack_credits(&self, ledger: &CreditsLedger) -> bool {
        ledger.total() > self.trial_allowance && ledger.available_total() > 0
    }
}
