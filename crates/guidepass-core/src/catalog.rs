//! Product catalog for guidepass.
//!
//! This module maps store product identifiers to what they grant, and holds
//! the free trial allowance every user starts with.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{BillingError, Result};
use crate::{AttractionId, BillingCadence, ProductId, SubscriptionKind};

// ============================================================================
// Constants
// ============================================================================

/// Attraction credits every user receives without paying.
pub const DEFAULT_TRIAL_ALLOWANCE: u32 = 2;

/// Product id prefix for single-attraction purchases (`guidepass.attraction.<id>`).
pub const DEFAULT_ATTRACTION_PREFIX: &str = "guidepass.attraction.";

/// What a product grants when purchased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProductKind {
    /// Time-bound subscription.
    Subscription {
        /// Subscription kind granted.
        kind: SubscriptionKind,
        /// Renewal cadence.
        cadence: BillingCadence,
    },

    /// Consumable credit package; raises the purchased pool.
    Package {
        /// Attraction credits added.
        credits: u32,
    },

    /// Consumable purchase of one attraction's guide.
    SingleAttraction {
        /// Attraction unlocked.
        attraction_id: AttractionId,
    },

    /// Grandfathered non-consumable city pack; raises the purchased pool.
    LegacyPack {
        /// Attraction credits added.
        credits: u32,
    },
}

impl ProductKind {
    /// Whether the provider should mark the purchase consumed on acknowledge.
    ///
    /// Subscriptions and legacy packs are acknowledged without consuming.
    #[must_use]
    pub const fn is_consumable(&self) -> bool {
        matches!(self, Self::Package { .. } | Self::SingleAttraction { .. })
    }

    /// Credits this product adds to the purchased pool.
    #[must_use]
    pub const fn credits(&self) -> u32 {
        match self {
            Self::Package { credits } | Self::LegacyPack { credits } => *credits,
            Self::Subscription { .. } | Self::SingleAttraction { .. } => 0,
        }
    }

    /// Classification label for logs and telemetry.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Subscription { .. } => "subscription",
            Self::Package { .. } => "consumable_package",
            Self::SingleAttraction { .. } => "consumable_single_attraction",
            Self::LegacyPack { .. } => "legacy_pack",
        }
    }
}

/// Product catalog and free allowance.
///
/// Fields missing from a catalog file take the built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Credits in the trial pool of every user.
    pub trial_allowance: u32,

    /// Explicitly configured products.
    pub products: HashMap<ProductId, ProductKind>,

    /// Prefix recognizing single-attraction products not listed in `products`.
    pub attraction_prefix: String,
}

impl Default for Catalog {
    fn default() -> Self {
        let mut products = HashMap::new();
        let mut add = |id: &str, kind: ProductKind| {
            if let Ok(id) = ProductId::new(id) {
                products.insert(id, kind);
            }
        };

        // Current unlimited plans
        add(
            "guidepass.unlimited.monthly",
            ProductKind::Subscription {
                kind: SubscriptionKind::Unlimited,
                cadence: BillingCadence::Monthly,
            },
        );
        add(
            "guidepass.unlimited.yearly",
            ProductKind::Subscription {
                kind: SubscriptionKind::Unlimited,
                cadence: BillingCadence::Yearly,
            },
        );
        add(
            "guidepass.unlimited.lifetime",
            ProductKind::Subscription {
                kind: SubscriptionKind::Unlimited,
                cadence: BillingCadence::Lifetime,
            },
        );

        // Grandfathered plans, still honored on restore
        add(
            "guidepass.premium.monthly",
            ProductKind::Subscription {
                kind: SubscriptionKind::LegacyPremium,
                cadence: BillingCadence::Monthly,
            },
        );
        add(
            "guidepass.explorer.yearly",
            ProductKind::Subscription {
                kind: SubscriptionKind::LegacyExplorer,
                cadence: BillingCadence::Yearly,
            },
        );

        // Credit packages
        add("guidepass.pack.5", ProductKind::Package { credits: 5 });
        add("guidepass.pack.15", ProductKind::Package { credits: 15 });
        add("guidepass.pack.40", ProductKind::Package { credits: 40 });
        add("guidepass.citypack", ProductKind::LegacyPack { credits: 10 });

        Self {
            trial_allowance: DEFAULT_TRIAL_ALLOWANCE,
            products,
            attraction_prefix: DEFAULT_ATTRACTION_PREFIX.to_string(),
        }
    }
}

impl Catalog {
    /// Classify a product.
    ///
    /// # Errors
    ///
    /// Returns `BillingError::UnknownProduct` if the product is neither listed
    /// nor carries the single-attraction prefix.
    pub fn classify(&self, product_id: &ProductId) -> Result<ProductKind> {
        if let Some(kind) = self.products.get(product_id) {
            return Ok(kind.clone());
        }

        product_id
            .as_str()
            .strip_prefix(self.attraction_prefix.as_str())
            .and_then(|rest| AttractionId::new(rest).ok())
            .map(|attraction_id| ProductKind::SingleAttraction { attraction_id })
            .ok_or_else(|| BillingError::UnknownProduct {
                product_id: product_id.to_string(),
            })
    }

    /// Credit limit for a user owning `packages`: the trial allowance plus
    /// every known package's credits. Unknown packages count as zero.
    #[must_use]
    pub fn limit_for_packages<'a, I>(&self, packages: I) -> u32
    where
        I: IntoIterator<Item = &'a ProductId>,
    {
        packages
            .into_iter()
            .filter_map(|id| self.products.get(id))
            .map(ProductKind::credits)
            .fold(self.trial_allowance, u32::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(s: &str) -> ProductId {
        ProductId::new(s).unwrap()
    }

    #[test]
    fn classifies_listed_products() {
        let catalog = Catalog::default();

        assert!(matches!(
            catalog.classify(&pid("guidepass.unlimited.yearly")).unwrap(),
            ProductKind::Subscription {
                kind: SubscriptionKind::Unlimited,
                cadence: BillingCadence::Yearly
            }
        ));
        assert_eq!(
            catalog.classify(&pid("guidepass.pack.15")).unwrap(),
            ProductKind::Package { credits: 15 }
        );
        assert_eq!(
            catalog.classify(&pid("guidepass.citypack")).unwrap(),
            ProductKind::LegacyPack { credits: 10 }
        );
    }

    #[test]
    fn classifies_attraction_prefix() {
        let kind = Catalog::default()
            .classify(&pid("guidepass.attraction.louvre"))
            .unwrap();
        assert_eq!(
            kind,
            ProductKind::SingleAttraction {
                attraction_id: AttractionId::new("louvre").unwrap()
            }
        );
        assert!(kind.is_consumable());
    }

    #[test]
    fn empty_attraction_suffix_is_unknown() {
        let err = Catalog::default()
            .classify(&pid("guidepass.attraction."))
            .unwrap_err();
        assert!(matches!(err, BillingError::UnknownProduct { .. }));
    }

    #[test]
    fn unknown_product_fails() {
        let err = Catalog::default().classify(&pid("com.other.app.coins")).unwrap_err();
        assert!(matches!(err, BillingError::UnknownProduct { product_id } if product_id == "com.other.app.coins"));
    }

    #[test]
    fn consumable_flags() {
        assert!(ProductKind::Package { credits: 5 }.is_consumable());
        assert!(!ProductKind::LegacyPack { credits: 5 }.is_consumable());
        assert!(!ProductKind::Subscription {
            kind: SubscriptionKind::Unlimited,
            cadence: BillingCadence::Monthly
        }
        .is_consumable());
    }

    #[test]
    fn limit_sums_owned_packages() {
        let catalog = Catalog::default();
        let owned = [pid("guidepass.pack.5"), pid("guidepass.citypack"), pid("gone.product")];
        assert_eq!(catalog.limit_for_packages(&owned), 2 + 5 + 10);
        assert_eq!(catalog.limit_for_packages(std::iter::empty()), 2);
    }

    #[test]
    fn catalog_json_roundtrip_keeps_products() {
        let catalog = Catalog::default();
        let json = serde_json::to_string(&catalog).unwrap();
        let parsed: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.products.len(), catalog.products.len());
        assert_eq!(parsed.trial_allowance, DEFAULT_TRIAL_ALLOWANCE);
    }
}
