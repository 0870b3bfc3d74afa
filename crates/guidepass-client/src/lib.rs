//! Guidepass ledger client.
//!
//! This crate provides [`LedgerClient`], an HTTP implementation of
//! [`guidepass_store::EntitlementStore`] against the remote ledger REST API.
//!
//! # Example
//!
//! ```no_run
//! use guidepass_client::{ClientOptions, LedgerClient};
//! use guidepass_core::UserId;
//! use guidepass_store::EntitlementStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = LedgerClient::with_options(
//!     "https://ledger.guidepass.app",
//!     "your-app-api-key",
//!     ClientOptions::with_platform("ios"),
//! )?;
//!
//! let state = client.get_credits_and_owned_items(&UserId::generate()).await?;
//! println!("Owned packages: {}", state.owned_packages.len());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, LedgerClient};
pub use error::ClientError;
pub use types::*;
