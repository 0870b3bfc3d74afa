//! Core types and utilities for guidepass.
//!
//! This crate provides the entitlement and credit model behind paid audio
//! guides:
//!
//! - **Identifiers**: `UserId`, `AttractionId`, `ProductId`, `TransactionId`
//! - **Credits**: `CreditsLedger`, `CreditBucket` and their pure arithmetic
//! - **Subscriptions**: `SubscriptionStatus`, `SubscriptionKind`, `BillingCadence`
//! - **Catalog**: `Catalog`, `ProductKind`
//! - **Entitlements**: `EntitlementResolver`, `EntitlementSnapshot`, `AccessDecision`
//! - **Usage**: `UsageRecord`, `UsageUpdate`, `UsageWrite`
//! - **Purchases**: `PurchaseEvent`, `PurchaseRecord`, `PurchaseGrant`
//!
//! # Attraction Credit
//!
//! **1 credit = 1 unlocked attraction guide**
//!
//! - Every user starts with a small trial allowance
//! - Packages raise the purchased pool
//! - Spending drains the trial pool before the purchased pool

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod credits;
pub mod entitlement;
pub mod error;
pub mod ids;
pub mod purchase;
pub mod subscription;
pub mod usage;

pub use catalog::{Catalog, ProductKind, DEFAULT_ATTRACTION_PREFIX, DEFAULT_TRIAL_ALLOWANCE};
pub use credits::{
    Consumption, CreditBucket, CreditPool, CreditSummary, CreditsLedger, RefundPolicy,
};
pub use entitlement::{
    AccessDecision, AccessReason, EntitlementResolver, EntitlementSnapshot, OwnedItems,
};
pub use error::{BillingError, Result};
pub use ids::{AttractionId, IdError, ProductId, TransactionId, UserId};
pub use purchase::{PurchaseEvent, PurchaseGrant, PurchaseRecord, PurchaseState};
pub use subscription::{lifetime_expiry, BillingCadence, SubscriptionKind, SubscriptionStatus};
pub use usage::{UsageRecord, UsageUpdate, UsageWrite};
