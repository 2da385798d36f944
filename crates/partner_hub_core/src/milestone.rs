//! Milestone thresholds and per-assignment progress evaluation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assignment::FulfillmentAssignment;
use crate::error::ProgramError;
use crate::money::{ratio_percent, round_percent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneType {
    Quantity,
    Revenue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardType {
    Cash,
    Points,
    Badge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    InProgress,
    Achieved,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Achieved => "achieved",
        }
    }
}

impl TryFrom<String> for MilestoneStatus {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "in_progress" => Ok(Self::InProgress),
            "achieved" => Ok(Self::Achieved),
            other => Err(ProgramError::validation(format!(
                "unknown milestone status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub threshold: Decimal,
    pub milestone_type: MilestoneType,
    pub reward_amount: Decimal,
    pub reward_type: RewardType,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewMilestone {
    pub name: String,
    pub description: Option<String>,
    pub threshold: Decimal,
    pub milestone_type: MilestoneType,
    #[serde(default)]
    pub reward_amount: Decimal,
    pub reward_type: RewardType,
}

impl NewMilestone {
    pub fn into_milestone(self, created_by: &str, now: DateTime<Utc>) -> Result<Milestone, ProgramError> {
        if self.name.trim().is_empty() {
            return Err(ProgramError::validation("milestone name is required"));
        }
        if self.threshold <= Decimal::ZERO {
            return Err(ProgramError::validation(
                "milestone threshold must be greater than 0",
            ));
        }
        if self.reward_amount < Decimal::ZERO {
            return Err(ProgramError::validation("reward_amount cannot be negative"));
        }
        Ok(Milestone {
            id: Uuid::new_v4(),
            name: self.name.trim().to_string(),
            description: self.description,
            threshold: self.threshold,
            milestone_type: self.milestone_type,
            reward_amount: self.reward_amount,
            reward_type: self.reward_type,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }
}

/// One row per (partner, milestone, assignment).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneProgress {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub milestone_id: Uuid,
    pub assignment_id: Uuid,
    pub current_value: Decimal,
    pub percentage_complete: Decimal,
    pub status: MilestoneStatus,
    /// Write-once: set on the first crossing of 100% and never cleared.
    pub achieved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Re-evaluate `milestone` against `assignment`'s aggregates.
///
/// Once a row is achieved it stays achieved with its original `achieved_at`,
/// even if the recomputed value drops below the threshold.
pub fn evaluate(
    milestone: &Milestone,
    assignment: &FulfillmentAssignment,
    existing: Option<&MilestoneProgress>,
    now: DateTime<Utc>,
) -> MilestoneProgress {
    let current_value = match milestone.milestone_type {
        MilestoneType::Quantity => assignment.actual_quantity,
        MilestoneType::Revenue => assignment.actual_revenue,
    };
    let percentage_complete = round_percent(ratio_percent(current_value, milestone.threshold));
    let crossed = milestone.threshold > Decimal::ZERO && percentage_complete >= Decimal::ONE_HUNDRED;

    let (status, achieved_at) = match existing.and_then(|p| p.achieved_at) {
        Some(at) => (MilestoneStatus::Achieved, Some(at)),
        None if crossed => {
            tracing::info!(
                milestone_id = %milestone.id,
                assignment_id = %assignment.id,
                "milestone achieved"
            );
            (MilestoneStatus::Achieved, Some(now))
        }
        None => (MilestoneStatus::InProgress, None),
    };

    MilestoneProgress {
        id: existing.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
        partner_id: assignment.partner_id,
        milestone_id: milestone.id,
        assignment_id: assignment.id,
        current_value,
        percentage_complete,
        status,
        achieved_at,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assignment::NewAssignment;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn milestone(threshold: Decimal, kind: MilestoneType) -> Milestone {
        NewMilestone {
            name: "First fifty".into(),
            description: None,
            threshold,
            milestone_type: kind,
            reward_amount: dec!(250),
            reward_type: RewardType::Cash,
        }
        .into_milestone("mgr", Utc::now())
        .unwrap()
    }

    fn assignment() -> FulfillmentAssignment {
        NewAssignment {
            partner_id: Uuid::new_v4(),
            product_ids: [Uuid::new_v4()].into(),
            spiff_id: None,
            target_quantity: Some(dec!(100)),
            target_revenue: None,
            start_date: None,
            end_date: None,
            notes: None,
        }
        .into_assignment("mgr", Utc::now())
        .unwrap()
    }

    #[test]
    fn in_progress_below_threshold() {
        let m = milestone(dec!(50), MilestoneType::Quantity);
        let mut a = assignment();
        a.apply_sale(20, dec!(2000), Utc::now());
        let p = evaluate(&m, &a, None, Utc::now());
        assert_eq!(p.status, MilestoneStatus::InProgress);
        assert_eq!(p.percentage_complete, dec!(40));
        assert!(p.achieved_at.is_none());
    }

    #[test]
    fn revenue_milestone_uses_revenue() {
        let m = milestone(dec!(1000), MilestoneType::Revenue);
        let mut a = assignment();
        a.apply_sale(1, dec!(1500), Utc::now());
        let p = evaluate(&m, &a, None, Utc::now());
        assert_eq!(p.current_value, dec!(1500));
        assert_eq!(p.percentage_complete, dec!(150));
        assert_eq!(p.status, MilestoneStatus::Achieved);
    }

    #[test]
    fn achievement_follows_reported_percentage() {
        let m = milestone(dec!(3000), MilestoneType::Revenue);
        let mut a = assignment();
        a.apply_sale(1, dec!(2999.997), Utc::now());
        let p = evaluate(&m, &a, None, Utc::now());
        assert_eq!(p.percentage_complete, dec!(99.9999));
        assert_eq!(p.status, MilestoneStatus::InProgress);

        a.apply_sale(1, dec!(0.002), Utc::now());
        let p = evaluate(&m, &a, None, Utc::now());
        assert_eq!(p.percentage_complete, dec!(100));
        assert_eq!(p.status, MilestoneStatus::Achieved);
    }

    #[test]
    fn achieved_at_is_write_once() {
        let m = milestone(dec!(10), MilestoneType::Quantity);
        let mut a = assignment();
        a.apply_sale(10, dec!(100), Utc::now());
        let first_at = Utc::now() - Duration::days(2);
        let first = evaluate(&m, &a, None, first_at);
        assert_eq!(first.achieved_at, Some(first_at));

        a.apply_sale(5, dec!(50), Utc::now());
        let second = evaluate(&m, &a, Some(&first), Utc::now());
        assert_eq!(second.achieved_at, Some(first_at));
        assert_eq!(second.id, first.id);

        a.actual_quantity = dec!(3);
        let regressed = evaluate(&m, &a, Some(&second), Utc::now());
        assert_eq!(regressed.status, MilestoneStatus::Achieved);
        assert_eq!(regressed.achieved_at, Some(first_at));
        assert_eq!(regressed.current_value, dec!(3));
    }

    #[test]
    fn zero_threshold_never_divides() {
        let mut m = milestone(dec!(10), MilestoneType::Quantity);
        m.threshold = Decimal::ZERO;
        let mut a = assignment();
        a.apply_sale(5, dec!(50), Utc::now());
        let p = evaluate(&m, &a, None, Utc::now());
        assert_eq!(p.percentage_complete, Decimal::ZERO);
        assert_eq!(p.status, MilestoneStatus::InProgress);
    }

    #[test]
    fn creation_rejects_non_positive_threshold() {
        let nm = NewMilestone {
            name: "bad".into(),
            description: None,
            threshold: Decimal::ZERO,
            milestone_type: MilestoneType::Quantity,
            reward_amount: Decimal::ZERO,
            reward_type: RewardType::Badge,
        };
        assert!(nm.into_milestone("mgr", Utc::now()).is_err());
    }
}
