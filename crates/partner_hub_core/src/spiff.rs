//! Time-boxed incentive campaigns and eligibility resolution.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgramError;
use crate::money::{checked_product, percent_of};
use crate::partner::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncentiveType {
    /// `incentive_amount` per unit sold.
    Fixed,
    /// `incentive_amount` percent of the sale total.
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpiffStatus {
    Draft,
    Active,
    Ended,
}

impl SpiffStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }
}

impl TryFrom<String> for SpiffStatus {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "ended" => Ok(Self::Ended),
            other => Err(ProgramError::validation(format!(
                "unknown spiff status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "targets", rename_all = "snake_case")]
pub enum SpiffTargeting {
    Tiers(BTreeSet<Tier>),
    Partners(BTreeSet<Uuid>),
}

impl SpiffTargeting {
    pub fn matches(&self, partner_id: Uuid, tier: Option<Tier>) -> bool {
        match self {
            Self::Tiers(tiers) => tier.is_some_and(|t| tiers.contains(&t)),
            Self::Partners(ids) => ids.contains(&partner_id),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Tiers(t) => t.is_empty(),
            Self::Partners(p) => p.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spiff {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub incentive_type: IncentiveType,
    pub incentive_amount: Decimal,
    pub targeting: SpiffTargeting,
    pub target_products: BTreeSet<Uuid>,
    pub status: SpiffStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl Spiff {
    /// Status as observed at `now`. Expiry has no timer; an active campaign
    /// past its end date simply reads as ended.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SpiffStatus {
        match self.status {
            SpiffStatus::Active if now > self.end_date => SpiffStatus::Ended,
            s => s,
        }
    }

    pub fn covers_date(&self, at: DateTime<Utc>) -> bool {
        self.start_date <= at && at <= self.end_date
    }

    /// Whether this campaign pays out on the described sale.
    pub fn applies_to(
        &self,
        partner_id: Uuid,
        tier: Option<Tier>,
        product_id: Uuid,
        sale_date: DateTime<Utc>,
    ) -> bool {
        self.status == SpiffStatus::Active
            && self.covers_date(sale_date)
            && self.target_products.contains(&product_id)
            && self.targeting.matches(partner_id, tier)
    }

    /// Unrounded bonus for one sale.
    pub fn bonus_for(&self, quantity: u32, total_amount: Decimal) -> Result<Decimal, ProgramError> {
        match self.incentive_type {
            IncentiveType::Fixed => checked_product(self.incentive_amount, Decimal::from(quantity)),
            IncentiveType::Percentage => percent_of(total_amount, self.incentive_amount),
        }
    }
}

/// One campaign's contribution to a sale's bonus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpiffAward {
    pub spiff_id: Uuid,
    pub name: String,
    pub bonus: Decimal,
}

/// Every campaign in `candidates` that matches the sale, with its bonus.
/// Campaigns stack; none is treated as exclusive.
pub fn resolve_awards(
    candidates: &[Spiff],
    partner_id: Uuid,
    tier: Option<Tier>,
    product_id: Uuid,
    sale_date: DateTime<Utc>,
    quantity: u32,
    total_amount: Decimal,
) -> Result<Vec<SpiffAward>, ProgramError> {
    candidates
        .iter()
        .filter(|s| s.applies_to(partner_id, tier, product_id, sale_date))
        .map(|s| {
            Ok(SpiffAward {
                spiff_id: s.id,
                name: s.name.clone(),
                bonus: s.bonus_for(quantity, total_amount)?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewSpiff {
    pub name: String,
    pub description: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub incentive_type: IncentiveType,
    pub incentive_amount: Decimal,
    pub targeting: SpiffTargeting,
    pub target_products: BTreeSet<Uuid>,
    #[serde(default = "default_status")]
    pub status: SpiffStatus,
}

fn default_status() -> SpiffStatus {
    SpiffStatus::Active
}

impl NewSpiff {
    pub fn into_spiff(self, created_by: &str, now: DateTime<Utc>) -> Result<Spiff, ProgramError> {
        if self.name.trim().is_empty() {
            return Err(ProgramError::validation("spiff name is required"));
        }
        if self.start_date >= self.end_date {
            return Err(ProgramError::validation(
                "start_date must be before end_date",
            ));
        }
        if self.incentive_amount < Decimal::ZERO {
            return Err(ProgramError::validation(
                "incentive_amount cannot be negative",
            ));
        }
        if self.incentive_type == IncentiveType::Percentage
            && self.incentive_amount > Decimal::ONE_HUNDRED
        {
            return Err(ProgramError::validation(
                "percentage incentive cannot exceed 100",
            ));
        }
        if self.target_products.is_empty() {
            return Err(ProgramError::validation(
                "at least one target product is required",
            ));
        }
        if self.targeting.is_empty() {
            return Err(ProgramError::validation(
                "targeting must name at least one tier or partner",
            ));
        }
        Ok(Spiff {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            incentive_type: self.incentive_type,
            incentive_amount: self.incentive_amount,
            targeting: self.targeting,
            target_products: self.target_products,
            status: self.status,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }
}
