//! Product catalogue entries and tier-keyed commission rates.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgramError;
use crate::partner::Tier;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    /// Starting point for per-partner overrides.
    pub base_commission_rate: Decimal,
    /// Percent of sale total keyed by partner tier.
    pub tier_commissions: BTreeMap<Tier, Decimal>,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn new(name: impl Into<String>, base_commission_rate: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_commission_rate,
            tier_commissions: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tier_rate(mut self, tier: Tier, percent: Decimal) -> Self {
        self.tier_commissions.insert(tier, percent);
        self
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewProduct {
    pub name: String,
    #[serde(default)]
    pub base_commission_rate: Decimal,
    #[serde(default)]
    pub tier_commissions: BTreeMap<Tier, Decimal>,
}

impl NewProduct {
    pub fn into_product(self, now: DateTime<Utc>) -> Result<Product, ProgramError> {
        if self.name.trim().is_empty() {
            return Err(ProgramError::validation("product name is required"));
        }
        check_percent("base_commission_rate", self.base_commission_rate)?;
        for (tier, rate) in &self.tier_commissions {
            check_percent(tier.as_str(), *rate)?;
        }
        Ok(Product {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            base_commission_rate: self.base_commission_rate,
            tier_commissions: self.tier_commissions,
            created_at: now,
        })
    }
}

fn check_percent(field: &str, value: Decimal) -> Result<(), ProgramError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(ProgramError::validation(format!(
            "{field} rate must be between 0 and 100"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    TierTable,
    /// No applicable entry; the sale still goes through at 0%.
    Unconfigured,
}

impl RateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TierTable => "tier_table",
            Self::Unconfigured => "unconfigured",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tier_table" => Some(Self::TierTable),
            "unconfigured" => Some(Self::Unconfigured),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResolvedRate {
    pub percent: Decimal,
    pub source: RateSource,
}

/// Commission percent for a sale of `product` by a partner at `tier`.
///
/// Only the tier table prices a sale. A partner without a tier, or a tier
/// missing from the table, resolves to zero rather than failing.
pub fn resolve_rate(product: &Product, tier: Option<Tier>) -> ResolvedRate {
    match tier.and_then(|t| product.tier_commissions.get(&t)) {
        Some(rate) => ResolvedRate {
            percent: *rate,
            source: RateSource::TierTable,
        },
        None => ResolvedRate {
            percent: Decimal::ZERO,
            source: RateSource::Unconfigured,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn router() -> Product {
        Product::new("Edge Router", dec!(4))
            .with_tier_rate(Tier::Gold, dec!(10))
            .with_tier_rate(Tier::Silver, dec!(7.5))
    }

    #[test]
    fn tier_table_lookup() {
        let r = resolve_rate(&router(), Some(Tier::Gold));
        assert_eq!(r.percent, dec!(10));
        assert_eq!(r.source, RateSource::TierTable);
    }

    #[test]
    fn missing_tier_entry_is_zero() {
        let r = resolve_rate(&router(), Some(Tier::Platinum));
        assert_eq!(r.percent, Decimal::ZERO);
        assert_eq!(r.source, RateSource::Unconfigured);

        let r = resolve_rate(&router(), None);
        assert_eq!(r.percent, Decimal::ZERO);
    }

    #[test]
    fn base_rate_is_not_a_fallback() {
        let r = resolve_rate(&Product::new("Switch", dec!(5)), Some(Tier::Gold));
        assert_eq!(r.percent, Decimal::ZERO);
        assert_eq!(r.source, RateSource::Unconfigured);
    }

    #[test]
    fn new_product_rejects_out_of_range_rate() {
        let mut rates = BTreeMap::new();
        rates.insert(Tier::Gold, dec!(120));
        let np = NewProduct {
            name: "Switch".into(),
            base_commission_rate: dec!(5),
            tier_commissions: rates,
        };
        assert!(np.into_product(Utc::now()).is_err());
    }
}
