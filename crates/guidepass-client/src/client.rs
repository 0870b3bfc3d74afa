//! Ledger HTTP client implementation.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use guidepass_core::{
    PurchaseRecord, SubscriptionStatus, TransactionId, UsageUpdate, UsageWrite, UserId,
};
use guidepass_store::{EntitlementStore, InsertOutcome, LedgerState, StoreError};

use crate::error::ClientError;
use crate::types::{ApiErrorResponse, SubscriptionUpsertRequest};

/// Remote ledger API client.
///
/// Implements [`EntitlementStore`] over the ledger's REST API. Transport
/// failures and 5xx responses surface as `StoreError::Unavailable`.
#[derive(Debug, Clone)]
pub struct LedgerClient {
    client: Client,
    base_url: String,
    api_key: String,
    platform: String,
}

impl LedgerClient {
    /// Create a new ledger client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the ledger API (e.g., `"https://ledger.guidepass.app"`)
    /// * `api_key` - API key for the app
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new ledger client with custom options.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is empty or the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Configuration("ledger base URL is empty".into()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            platform: options.platform,
        })
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn user_url(&self, user_id: &UserId, resource: &str) -> String {
        format!("{}/v1/users/{user_id}/{resource}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("x-api-key", &self.api_key)
            .header("x-platform", &self.platform)
    }

    /// Fetch a user's subscription; `None` when the ledger has none on file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn fetch_subscription(
        &self,
        user_id: &UserId,
    ) -> Result<Option<SubscriptionStatus>, ClientError> {
        let url = self.user_url(user_id, "subscription");
        let response = self.request(reqwest::Method::GET, &url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        self.handle_response(response).await.map(Some)
    }

    /// Fetch a user's usage record and owned items.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn fetch_ledger(&self, user_id: &UserId) -> Result<LedgerState, ClientError> {
        let url = self.user_url(user_id, "ledger");
        let response = self.request(reqwest::Method::GET, &url).send().await?;
        self.handle_response(response).await
    }

    /// Send a usage update. The ledger applies it to the stored record and
    /// answers with the effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn put_usage(
        &self,
        user_id: &UserId,
        update: &UsageUpdate,
    ) -> Result<UsageWrite, ClientError> {
        let url = self.user_url(user_id, "usage");
        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(update)
            .send()
            .await?;
        self.handle_response(response).await
    }

    /// Insert a purchase record. `409 Conflict` means the transaction id is
    /// already on file.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn post_purchase(&self, record: &PurchaseRecord) -> Result<InsertOutcome, ClientError> {
        let url = format!("{}/v1/purchases", self.base_url);
        let response = self
            .request(reqwest::Method::POST, &url)
            .json(record)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            tracing::debug!(
                transaction_id = %record.transaction_id,
                "Purchase record already on file"
            );
            return Ok(InsertOutcome::Duplicate);
        }
        if status.is_success() {
            return Ok(InsertOutcome::Inserted);
        }
        Err(Self::api_error(response).await)
    }

    /// Store a user's subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn put_subscription(
        &self,
        user_id: &UserId,
        request: &SubscriptionUpsertRequest,
    ) -> Result<(), ClientError> {
        let url = self.user_url(user_id, "subscription");
        let response = self
            .request(reqwest::Method::PUT, &url)
            .json(request)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(Self::api_error(response).await)
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(Self::api_error(response).await)
    }

    async fn api_error(response: reqwest::Response) -> ClientError {
        let status = response.status();

        // Try to parse error response
        match response.json::<ApiErrorResponse>().await {
            Ok(api_error) => ClientError::Api {
                code: api_error.error.code,
                message: api_error.error.message,
                status: status.as_u16(),
            },
            Err(_) => ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            },
        }
    }
}

#[async_trait]
impl EntitlementStore for LedgerClient {
    async fn get_subscription_status(
        &self,
        user_id: &UserId,
    ) -> guidepass_store::Result<Option<SubscriptionStatus>> {
        self.fetch_subscription(user_id).await.map_err(StoreError::from)
    }

    async fn get_credits_and_owned_items(
        &self,
        user_id: &UserId,
    ) -> guidepass_store::Result<LedgerState> {
        self.fetch_ledger(user_id).await.map_err(StoreError::from)
    }

    async fn upsert_usage(
        &self,
        user_id: &UserId,
        update: &UsageUpdate,
    ) -> guidepass_store::Result<UsageWrite> {
        self.put_usage(user_id, update).await.map_err(StoreError::from)
    }

    async fn insert_purchase_record(
        &self,
        record: &PurchaseRecord,
    ) -> guidepass_store::Result<InsertOutcome> {
        self.post_purchase(record).await.map_err(StoreError::from)
    }

    async fn upsert_subscription(
        &self,
        user_id: &UserId,
        status: &SubscriptionStatus,
        transaction_id: Option<&TransactionId>,
    ) -> guidepass_store::Result<()> {
        let request = SubscriptionUpsertRequest {
            status: status.clone(),
            transaction_id: transaction_id.cloned(),
        };
        self.put_subscription(user_id, &request)
            .await
            .map_err(StoreError::from)
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 15).
    pub timeout_seconds: u64,
    /// Platform tag sent with every request (`ios`, `android`).
    pub platform: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 15,
            platform: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a platform tag.
    #[must_use]
    pub fn with_platform(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            ..Self::default()
        }
    }
}
