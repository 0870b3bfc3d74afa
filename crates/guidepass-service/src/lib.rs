//! Guidepass entitlement service.
//!
//! This crate decides who may play which audio guide and keeps the credit
//! ledger and purchases consistent with the remote ledger:
//!
//! - [`EntitlementService`]: one per signed-in user; access checks, usage
//!   recording, purchases and restores
//! - [`PurchaseProvider`]: the platform store boundary
//! - [`ReconciliationPipeline`]: idempotent purchase persistence
//! - [`SnapshotManager`]: remote snapshot with cache fallback and optimistic
//!   local usage
//! - [`LedgerBus`]: ledger-change notifications for the UI
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use guidepass_core::{AttractionId, UserId};
//! use guidepass_service::{EntitlementService, PurchaseProvider, ServiceConfig};
//!
//! # async fn example(provider: Arc<dyn PurchaseProvider>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServiceConfig::from_env();
//! let store = Arc::new(config.ledger_client()?);
//! let cache = Arc::new(config.snapshot_cache());
//!
//! let service = EntitlementService::new(UserId::generate(), store, provider, cache, config);
//! service.connect().await?;
//!
//! let louvre = AttractionId::new("louvre")?;
//! if service.resolve_access(&louvre).await.has_access {
//!     service.record_usage_if_needed(&louvre).await;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bus;
pub mod config;
pub mod error;
pub mod provider;
pub mod reconcile;
pub mod service;
pub mod snapshot;
pub mod usage;

pub use bus::{LedgerBus, LedgerEvent};
pub use config::{load_catalog, ServiceConfig};
pub use error::{Result, ServiceError};
pub use provider::{ProviderError, ProviderUpdate, PurchaseProvider};
pub use reconcile::{
    EventDisposition, ReconcileOutcome, ReconcileStage, ReconciliationPipeline, RestoreOutcome,
    RestoreReport,
};
pub use service::{EntitlementService, PurchaseOutcome};
pub use snapshot::SnapshotManager;
pub use usage::{RefundOutcome, UsageOutcome, UsageRecorder};
