//! Attraction credit ledger arithmetic.
//!
//! A user's credits live in two pools: the trial pool (granted without
//! payment) and the purchased pool (granted by package purchases). Every
//! function here is total and side-effect-free; callers persist the result.

use serde::{Deserialize, Serialize};

/// One pool of attraction credits.
///
/// `available + used` is the lifetime grant size of the pool. Only
/// [`CreditsLedger::grant`] grows it; consume and refund move credits between
/// the two counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBucket {
    /// Credits that can still be spent.
    pub available: u32,
    /// Credits already spent.
    pub used: u32,
}

impl CreditBucket {
    /// Create a bucket with the given counters.
    #[must_use]
    pub const fn new(available: u32, used: u32) -> Self {
        Self { available, used }
    }

    /// Lifetime grant size of this bucket.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.available.saturating_add(self.used)
    }

    /// Move up to `amount` credits from available to used, returning how many moved.
    fn take(&mut self, amount: u32) -> u32 {
        let taken = amount.min(self.available);
        self.available -= taken;
        self.used = self.used.saturating_add(taken);
        taken
    }

    /// Move up to `amount` credits from used back to available, returning how many moved.
    fn give_back(&mut self, amount: u32) -> u32 {
        let returned = amount.min(self.used);
        self.used -= returned;
        self.available = self.available.saturating_add(returned);
        returned
    }
}

/// Which pool a credit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPool {
    /// Credits granted without payment.
    Trial,
    /// Credits granted by a money-bearing package purchase.
    Purchased,
}

/// Which pool a refund restores first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    /// Restore the purchased pool before the trial pool.
    #[default]
    PurchasedFirst,
    /// Restore the trial pool before the purchased pool.
    TrialFirst,
}

impl std::str::FromStr for RefundPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "purchased_first" | "purchased" => Ok(Self::PurchasedFirst),
            "trial_first" | "trial" => Ok(Self::TrialFirst),
            other => Err(format!("unknown refund policy: {other}")),
        }
    }
}

/// Both credit pools for a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditsLedger {
    /// Trial pool.
    pub trial: CreditBucket,
    /// Purchased pool.
    pub purchased: CreditBucket,
}

/// Result of [`CreditsLedger::consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    /// Ledger after consumption.
    pub ledger: CreditsLedger,
    /// Credits drained from the trial pool.
    pub from_trial: u32,
    /// Credits drained from the purchased pool.
    pub from_purchased: u32,
}

impl Consumption {
    /// Total credits actually consumed (may be less than requested).
    #[must_use]
    pub const fn consumed(&self) -> u32 {
        self.from_trial + self.from_purchased
    }
}

/// Aggregate view of a ledger for display.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CreditSummary {
    /// Sum of available credits across pools.
    pub available_total: u32,
    /// Sum of used credits across pools.
    pub used_total: u32,
    /// `available_total / (available_total + used_total)` in `0.0..=1.0`; `0.0` for an empty ledger.
    pub percent_available: f64,
}

impl CreditsLedger {
    /// Create a ledger from its two pools.
    #[must_use]
    pub const fn new(trial: CreditBucket, purchased: CreditBucket) -> Self {
        Self { trial, purchased }
    }

    /// Derive the ledger from a persisted usage counter and limit.
    ///
    /// The first `trial_allowance` credits of the limit form the trial pool;
    /// the rest is the purchased pool. Usage fills the trial pool first.
    #[must_use]
    pub fn from_usage(usage_count: u32, limit: u32, trial_allowance: u32) -> Self {
        let trial_size = trial_allowance.min(limit);
        let purchased_size = limit - trial_size;

        let trial_used = usage_count.min(trial_size);
        let purchased_used = (usage_count - trial_used).min(purchased_size);

        Self {
            trial: CreditBucket::new(trial_size - trial_used, trial_used),
            purchased: CreditBucket::new(purchased_size - purchased_used, purchased_used),
        }
    }

    /// Lifetime credits granted across both pools.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.trial.size().saturating_add(self.purchased.size())
    }

    /// Credits that can still be spent.
    #[must_use]
    pub const fn available_total(&self) -> u32 {
        self.trial.available.saturating_add(self.purchased.available)
    }

    /// Credits already spent.
    #[must_use]
    pub const fn used_total(&self) -> u32 {
        self.trial.used.saturating_add(self.purchased.used)
    }

    /// Borrow one pool.
    #[must_use]
    pub const fn bucket(&self, pool: CreditPool) -> &CreditBucket {
        match pool {
            CreditPool::Trial => &self.trial,
            CreditPool::Purchased => &self.purchased,
        }
    }

    /// Spend up to `amount` credits, trial pool first.
    ///
    /// Asking for more than [`available_total`](Self::available_total)
    /// consumes only what is available; balances never go negative.
    #[must_use]
    pub fn consume(&self, amount: u32) -> Consumption {
        let mut ledger = *self;
        let from_trial = ledger.trial.take(amount);
        let from_purchased = ledger.purchased.take(amount - from_trial);

        Consumption {
            ledger,
            from_trial,
            from_purchased,
        }
    }

    /// Return up to `amount` used credits to their pools in the order `policy` picks.
    #[must_use]
    pub fn refund(&self, amount: u32, policy: RefundPolicy) -> Self {
        let mut ledger = *self;
        let (first, second) = match policy {
            RefundPolicy::PurchasedFirst => (&mut ledger.purchased, &mut ledger.trial),
            RefundPolicy::TrialFirst => (&mut ledger.trial, &mut ledger.purchased),
        };
        let returned = first.give_back(amount);
        second.give_back(amount - returned);
        ledger
    }

    /// Add `amount` fresh credits to `pool`.
    #[must_use]
    pub fn grant(&self, pool: CreditPool, amount: u32) -> Self {
        let mut ledger = *self;
        let bucket = match pool {
            CreditPool::Trial => &mut ledger.trial,
            CreditPool::Purchased => &mut ledger.purchased,
        };
        bucket.available = bucket.available.saturating_add(amount);
        ledger
    }

    /// Summarize for display.
    #[must_use]
    pub fn summarize(&self) -> CreditSummary {
        let available_total = self.available_total();
        let used_total = self.used_total();
        let size = u64::from(available_total) + u64::from(used_total);

        #[allow(clippy::cast_precision_loss)]
        let percent_available = if size == 0 {
            0.0
        } else {
            f64::from(available_total) / size as f64
        };

        CreditSummary {
            available_total,
            used_total,
            percent_available,
        }
    }
}
