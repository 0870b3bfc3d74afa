//! `RocksDB` key layout.
//!
//! User ids are stored as their 16 raw bytes; transaction ids as UTF-8.

use guidepass_core::{TransactionId, UserId};

/// Create a per-user key (subscriptions, usage, snapshots).
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a purchase key from a platform transaction id.
#[must_use]
pub fn purchase_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.as_str().as_bytes().to_vec()
}

/// Create a user-purchase index key.
///
/// Format: `user_id (16 bytes) || transaction_id (UTF-8, variable length)`
#[must_use]
pub fn user_purchase_key(user_id: &UserId, transaction_id: &TransactionId) -> Vec<u8> {
    let tx = transaction_id.as_str().as_bytes();
    let mut key = Vec::with_capacity(16 + tx.len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(tx);
    key
}

/// Create a prefix for iterating all purchases for a user.
#[must_use]
pub fn user_purchases_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the transaction id from a user-purchase index key.
///
/// Returns `None` if the key is too short or the suffix is not a valid id.
#[must_use]
pub fn extract_transaction_id_from_user_key(key: &[u8]) -> Option<TransactionId> {
    let suffix = key.get(16..)?;
    let text = std::str::from_utf8(suffix).ok()?;
    TransactionId::new(text).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_key_length() {
        let user_id = UserId::generate();
        assert_eq!(user_key(&user_id).len(), 16);
    }

    #[test]
    fn user_purchase_key_format() {
        let user_id = UserId::generate();
        let tx = TransactionId::new("GPA.3372-0001").unwrap();
        let key = user_purchase_key(&user_id, &tx);

        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[16..], b"GPA.3372-0001");
        assert!(key.starts_with(&user_purchases_prefix(&user_id)));
    }

    #[test]
    fn extract_transaction_id() {
        let user_id = UserId::generate();
        let tx = TransactionId::new("1000000812345678").unwrap();
        let key = user_purchase_key(&user_id, &tx);

        assert_eq!(extract_transaction_id_from_user_key(&key), Some(tx));
        assert_eq!(extract_transaction_id_from_user_key(&key[..10]), None);
    }
}
