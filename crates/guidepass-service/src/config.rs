//! Service configuration.

use std::path::Path;

use guidepass_client::{ClientOptions, LedgerClient};
use guidepass_core::{Catalog, RefundPolicy};
use guidepass_store::FileSnapshotCache;

use crate::bus::DEFAULT_BUS_CAPACITY;
use crate::error::{Result, ServiceError};

/// Catalog file locations tried when `GUIDEPASS_CATALOG_PATH` is unset.
const CATALOG_PATHS: [&str; 2] = [".guidepass/catalog.json", "config/catalog.json"];

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Remote ledger base URL (default: `"http://localhost:8080"`).
    pub ledger_url: String,

    /// Remote ledger API key.
    pub ledger_api_key: Option<String>,

    /// Platform tag for logs and ledger requests (default: "unknown").
    pub platform: String,

    /// Ledger request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Directory for the on-device snapshot cache.
    pub cache_dir: String,

    /// Which pool a refunded credit returns to.
    pub refund_policy: RefundPolicy,

    /// Ledger event bus capacity.
    pub bus_capacity: usize,

    /// Product catalog and trial allowance.
    pub catalog: Catalog,
}

impl ServiceConfig {
    /// Load configuration from environment variables and the catalog file.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mut catalog = lookup("GUIDEPASS_CATALOG_PATH")
            .map_or_else(find_catalog, |path| {
                load_catalog(&path).unwrap_or_else(|e| {
                    tracing::warn!(path = %path, error = %e, "Invalid catalog file, using built-in catalog");
                    Catalog::default()
                })
            });
        if let Some(allowance) = parse(&lookup, "GUIDEPASS_TRIAL_ALLOWANCE") {
            catalog.trial_allowance = allowance;
        }

        Self {
            ledger_url: lookup("GUIDEPASS_LEDGER_URL").unwrap_or(defaults.ledger_url),
            ledger_api_key: lookup("GUIDEPASS_LEDGER_API_KEY"),
            platform: lookup("GUIDEPASS_PLATFORM").unwrap_or(defaults.platform),
            request_timeout_seconds: parse(&lookup, "GUIDEPASS_REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
            cache_dir: lookup("GUIDEPASS_CACHE_DIR").unwrap_or(defaults.cache_dir),
            refund_policy: parse(&lookup, "GUIDEPASS_REFUND_POLICY")
                .unwrap_or(defaults.refund_policy),
            bus_capacity: parse(&lookup, "GUIDEPASS_BUS_CAPACITY").unwrap_or(defaults.bus_capacity),
            catalog,
        }
    }

    /// Credits in every user's trial pool.
    #[must_use]
    pub const fn trial_allowance(&self) -> u32 {
        self.catalog.trial_allowance
    }

    /// Options for the HTTP ledger client.
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout_seconds: self.request_timeout_seconds,
            platform: self.platform.clone(),
        }
    }

    /// Build the HTTP ledger client.
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Configuration` if no API key is set or the
    /// client cannot be built.
    pub fn ledger_client(&self) -> Result<LedgerClient> {
        let api_key = self
            .ledger_api_key
            .clone()
            .ok_or_else(|| ServiceError::Configuration("GUIDEPASS_LEDGER_API_KEY is not set".into()))?;

        LedgerClient::with_options(&self.ledger_url, api_key, self.client_options())
            .map_err(|e| ServiceError::Configuration(e.to_string()))
    }

    /// Snapshot cache under `cache_dir`.
    #[must_use]
    pub fn snapshot_cache(&self) -> FileSnapshotCache {
        FileSnapshotCache::new(&self.cache_dir)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            ledger_url: "http://localhost:8080".into(),
            ledger_api_key: None,
            platform: "unknown".into(),
            request_timeout_seconds: 15,
            cache_dir: ".guidepass/cache".into(),
            refund_policy: RefundPolicy::default(),
            bus_capacity: DEFAULT_BUS_CAPACITY,
            catalog: Catalog::default(),
        }
    }
}

/// Parse a variable, logging and ignoring values that do not parse.
fn parse<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key = %key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

/// Load the catalog from the first known location, or use the built-in one.
fn find_catalog() -> Catalog {
    for path in &CATALOG_PATHS {
        if let Ok(catalog) = load_catalog(path) {
            tracing::info!(path = %path, "Loaded catalog from file");
            return catalog;
        }
    }

    tracing::debug!("Catalog file not found, using built-in catalog");
    Catalog::default()
}

/// Load a catalog from a JSON file.
///
/// # Errors
///
/// Returns `ServiceError::Configuration` if the file is missing or invalid.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<Catalog> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ServiceError::Configuration(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&contents)
        .map_err(|e| ServiceError::Configuration(format!("{}: {e}", path.display())))
}
