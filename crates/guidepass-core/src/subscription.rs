//! Subscription state for guidepass.
//!
//! Expiry is evaluated lazily: a stored subscription whose `expires_at` has
//! passed reads as inactive, with no background expiry job.

use chrono::{DateTime, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::TransactionId;

/// Kind of subscription a user holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// No subscription.
    #[default]
    None,

    /// Current unlimited plan.
    Unlimited,

    /// Grandfathered premium plan from the first app release.
    LegacyPremium,

    /// Grandfathered annual explorer plan.
    LegacyExplorer,
}

impl SubscriptionKind {
    /// Whether this kind grants unlimited access while active.
    #[must_use]
    pub const fn grants_unlimited(&self) -> bool {
        matches!(
            self,
            Self::Unlimited | Self::LegacyPremium | Self::LegacyExplorer
        )
    }

    /// Whether this is a grandfathered plan type.
    #[must_use]
    pub const fn is_legacy(&self) -> bool {
        matches!(self, Self::LegacyPremium | Self::LegacyExplorer)
    }

    /// Stable name for logs and the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Unlimited => "unlimited",
            Self::LegacyPremium => "legacy_premium",
            Self::LegacyExplorer => "legacy_explorer",
        }
    }
}

/// Renewal cadence of a subscription product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCadence {
    /// Renews every calendar month.
    Monthly,
    /// Renews every twelve calendar months.
    Yearly,
    /// Never expires.
    Lifetime,
}

impl BillingCadence {
    /// Expiry for a purchase made at `purchased_at`.
    ///
    /// Always relative to the transaction timestamp, never wall-clock time,
    /// so replaying the same purchase yields the same expiry.
    #[must_use]
    pub fn expires_at(&self, purchased_at: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            Self::Monthly => Months::new(1),
            Self::Yearly => Months::new(12),
            Self::Lifetime => return lifetime_expiry(),
        };
        purchased_at
            .checked_add_months(months)
            .unwrap_or_else(lifetime_expiry)
    }
}

/// Far-future sentinel used as the expiry of lifetime purchases.
#[must_use]
pub fn lifetime_expiry() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A user's subscription as stored in the remote ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionStatus {
    /// Stored active flag. Read through [`is_active_at`](Self::is_active_at).
    pub active: bool,

    /// Subscription kind.
    pub kind: SubscriptionKind,

    /// When the subscription lapses; `None` means it does not expire.
    pub expires_at: Option<DateTime<Utc>>,

    /// Platform transaction that last set this subscription.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

impl SubscriptionStatus {
    /// No subscription.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// An active subscription of `kind` expiring at `expires_at`.
    #[must_use]
    pub fn active(kind: SubscriptionKind, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            active: true,
            kind,
            expires_at,
            transaction_id: None,
        }
    }

    /// Whether the subscription is active at `now`.
    ///
    /// A stored `active = true` is overridden once `now > expires_at`.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.kind != SubscriptionKind::None
            && self.expires_at.map_or(true, |expires| now <= expires)
    }

    /// Whether the subscription grants unlimited access at `now`.
    #[must_use]
    pub fn grants_unlimited_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active_at(now) && self.kind.grants_unlimited()
    }

    /// Copy with `active` recomputed for `now`.
    #[must_use]
    pub fn effective_at(&self, now: DateTime<Utc>) -> Self {
        Self {
            active: self.is_active_at(now),
            ..self.clone()
        }
    }

    /// Whether `self` should replace `current`.
    ///
    /// A grant never shortens a later expiry already on file, so replaying an
    /// old renewal after a newer one is harmless.
    #[must_use]
    pub fn supersedes(&self, current: &Self) -> bool {
        if !current.active || current.kind == SubscriptionKind::None {
            return true;
        }
        match (self.expires_at, current.expires_at) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(new), Some(old)) => new > old,
        }
    }
}
