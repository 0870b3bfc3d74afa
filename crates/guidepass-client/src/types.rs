//! Request and response bodies for the ledger REST API.

use serde::{Deserialize, Serialize};

use guidepass_core::{SubscriptionStatus, TransactionId};

/// Body of `PUT /v1/users/{user_id}/subscription`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionUpsertRequest {
    /// Subscription to store unless a later expiry is already on file.
    pub status: SubscriptionStatus,
    /// Transaction that produced the subscription, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorDetails,
}

/// API error details.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetails {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}
