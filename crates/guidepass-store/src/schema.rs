//! Column families of the `RocksDB` ledger.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Subscription status, keyed by `user_id`.
    pub const SUBSCRIPTIONS: &str = "subscriptions";

    /// Usage records, keyed by `user_id`.
    pub const USAGE: &str = "usage";

    /// Purchase records, keyed by platform `transaction_id`. Presence of a key
    /// is the dedup anchor.
    pub const PURCHASES: &str = "purchases";

    /// Index: purchases by user, keyed by `user_id || transaction_id`.
    /// Value is empty (index only).
    pub const PURCHASES_BY_USER: &str = "purchases_by_user";

    /// Cached entitlement snapshots, keyed by `user_id`.
    pub const SNAPSHOTS: &str = "snapshots";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::SUBSCRIPTIONS,
        cf::USAGE,
        cf::PURCHASES,
        cf::PURCHASES_BY_USER,
        cf::SNAPSHOTS,
    ]
}
