//! Applying purchase grants to ledger rows.
//!
//! Shared by every backend so a grant means the same thing everywhere.

use guidepass_core::{PurchaseGrant, PurchaseRecord, SubscriptionStatus, UsageRecord};

/// Rows a grant may touch for one user.
pub(crate) struct GrantTarget<'a> {
    pub subscription: &'a mut Option<SubscriptionStatus>,
    pub usage: &'a mut Option<UsageRecord>,
}

/// Apply `record`'s grant. Attraction grants need no row change: owned
/// attractions are derived from the purchase records themselves.
pub(crate) fn apply(record: &PurchaseRecord, target: GrantTarget<'_>) {
    match &record.grant {
        PurchaseGrant::Subscription { kind, expires_at } => {
            let status = SubscriptionStatus {
                active: true,
                kind: *kind,
                expires_at: *expires_at,
                transaction_id: Some(record.transaction_id.clone()),
            };
            merge_subscription(target.subscription, status);
        }
        PurchaseGrant::Credits {
            credits,
            initial_limit,
            ..
        } => {
            target
                .usage
                .get_or_insert_with(|| UsageRecord::new(*initial_limit))
                .raise_limit(*credits);
        }
        PurchaseGrant::Attraction { .. } => {}
    }
}

/// Replace the stored subscription unless it already runs longer.
pub(crate) fn merge_subscription(
    current: &mut Option<SubscriptionStatus>,
    status: SubscriptionStatus,
) -> bool {
    let replace = current
        .as_ref()
        .map_or(true, |existing| status.supersedes(existing));
    if replace {
        *current = Some(status);
    }
    replace
}

/// Add the items `record` grants ownership of to `state`.
pub(crate) fn collect_owned(record: &PurchaseRecord, state: &mut crate::LedgerState) {
    match &record.grant {
        PurchaseGrant::Attraction { attraction_id } => {
            state.owned_attractions.insert(attraction_id.clone());
        }
        PurchaseGrant::Credits { package_id, .. } => {
            state.owned_packages.insert(package_id.clone());
        }
        PurchaseGrant::Subscription { .. } => {}
    }
}
