//! Fulfillment assignments and their running actual-vs-target aggregates.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgramError;
use crate::money::{ratio_percent, round_percent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Active,
    Completed,
    Expired,
    Cancelled,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl TryFrom<String> for AssignmentStatus {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ProgramError::validation(format!(
                "unknown assignment status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentAssignment {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub product_ids: BTreeSet<Uuid>,
    pub spiff_id: Option<Uuid>,
    pub target_quantity: Option<Decimal>,
    pub target_revenue: Option<Decimal>,
    pub actual_quantity: Decimal,
    pub actual_revenue: Decimal,
    pub completion_percentage: Decimal,
    pub status: AssignmentStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FulfillmentAssignment {
    pub fn covers(&self, product_id: Uuid) -> bool {
        self.status == AssignmentStatus::Active && self.product_ids.contains(&product_id)
    }

    /// Fold one sale into the aggregates. Stores that cannot do this in a
    /// single atomic statement must hold a lock around it.
    pub fn apply_sale(&mut self, quantity: u32, revenue: Decimal, now: DateTime<Utc>) {
        self.actual_quantity = self.actual_quantity.saturating_add(Decimal::from(quantity));
        self.actual_revenue = self.actual_revenue.saturating_add(revenue);
        self.completion_percentage = completion_percentage(
            self.actual_quantity,
            self.actual_revenue,
            self.target_quantity,
            self.target_revenue,
        );
        self.updated_at = now;
    }
}

/// Quantity target first, revenue target second, otherwise zero. Never
/// clamped: 137 means the partner is 37 points over target.
pub fn completion_percentage(
    actual_quantity: Decimal,
    actual_revenue: Decimal,
    target_quantity: Option<Decimal>,
    target_revenue: Option<Decimal>,
) -> Decimal {
    let pct = match (target_quantity, target_revenue) {
        (Some(tq), _) if tq > Decimal::ZERO => ratio_percent(actual_quantity, tq),
        (_, Some(tr)) if tr > Decimal::ZERO => ratio_percent(actual_revenue, tr),
        _ => Decimal::ZERO,
    };
    round_percent(pct)
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewAssignment {
    pub partner_id: Uuid,
    pub product_ids: BTreeSet<Uuid>,
    pub spiff_id: Option<Uuid>,
    pub target_quantity: Option<Decimal>,
    pub target_revenue: Option<Decimal>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl NewAssignment {
    pub fn into_assignment(
        self,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<FulfillmentAssignment, ProgramError> {
        if self.product_ids.is_empty() {
            return Err(ProgramError::validation(
                "assignment needs at least one product",
            ));
        }
        let positive = |v: Option<Decimal>| v.is_some_and(|v| v > Decimal::ZERO);
        if !positive(self.target_quantity) && !positive(self.target_revenue) {
            return Err(ProgramError::validation(
                "target_quantity or target_revenue must be greater than 0",
            ));
        }
        if [self.target_quantity, self.target_revenue]
            .iter()
            .flatten()
            .any(|v| *v < Decimal::ZERO)
        {
            return Err(ProgramError::validation("targets cannot be negative"));
        }
        if let (Some(s), Some(e)) = (self.start_date, self.end_date) {
            if s >= e {
                return Err(ProgramError::validation(
                    "start_date must be before end_date",
                ));
            }
        }
        Ok(FulfillmentAssignment {
            id: Uuid::new_v4(),
            partner_id: self.partner_id,
            product_ids: self.product_ids,
            spiff_id: self.spiff_id,
            target_quantity: self.target_quantity,
            target_revenue: self.target_revenue,
            actual_quantity: Decimal::ZERO,
            actual_revenue: Decimal::ZERO,
            completion_percentage: Decimal::ZERO,
            status: AssignmentStatus::Active,
            start_date: self.start_date,
            end_date: self.end_date,
            notes: self.notes,
            created_by: created_by.to_string(),
            created_at: now,
            updated_at: now,
        })
    }
}
