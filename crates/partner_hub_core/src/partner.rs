//! Partner aggregate and its lifecycle vocabulary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgramError;
use crate::principal::Role;

/// Partner tier. Drives the commission rate and tier-targeted spiffs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for Tier {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "bronze" => Ok(Self::Bronze),
            "silver" => Ok(Self::Silver),
            "gold" => Ok(Self::Gold),
            "platinum" => Ok(Self::Platinum),
            other => Err(ProgramError::validation(format!("unknown tier: {other}"))),
        }
    }
}

/// Partner lifecycle status.
///
/// Main cycle: `pending_l1 → pending_l2 → approved`. `rejected` and
/// `inactive` are only reached through exceptional admin actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartnerStatus {
    PendingL1,
    PendingL2,
    Approved,
    RejectedByL1,
    RejectedByL2,
    OnHold,
    Rejected,
    Inactive,
}

impl PartnerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingL1 => "pending_l1",
            Self::PendingL2 => "pending_l2",
            Self::Approved => "approved",
            Self::RejectedByL1 => "rejected_by_l1",
            Self::RejectedByL2 => "rejected_by_l2",
            Self::OnHold => "on_hold",
            Self::Rejected => "rejected",
            Self::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for PartnerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for PartnerStatus {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "pending_l1" => Ok(Self::PendingL1),
            "pending_l2" => Ok(Self::PendingL2),
            "approved" => Ok(Self::Approved),
            "rejected_by_l1" => Ok(Self::RejectedByL1),
            "rejected_by_l2" => Ok(Self::RejectedByL2),
            "on_hold" => Ok(Self::OnHold),
            "rejected" => Ok(Self::Rejected),
            "inactive" => Ok(Self::Inactive),
            other => Err(ProgramError::validation(format!(
                "unknown partner status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewLevel {
    L1,
    L2,
}

impl ReviewLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
        }
    }
}

/// One review step. Owned by its partner and reset on resubmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub level: u8,
    pub status: StepStatus,
    pub approver_id: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub comments: Option<String>,
    pub rejection_reason: Option<String>,
}

impl ApprovalStep {
    pub fn pending(level: u8) -> Self {
        Self {
            level,
            status: StepStatus::Pending,
            approver_id: None,
            decided_at: None,
            comments: None,
            rejection_reason: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactPerson {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// The partner's own login, when one exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedUser {
    pub user_id: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionInfo {
    pub reason: String,
    pub rejected_by: String,
    pub rejected_at: DateTime<Utc>,
    pub level: ReviewLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldInfo {
    pub reason: String,
    /// Shown to the partner; distinct from a rejection reason.
    pub feedback_message: String,
    pub initiated_by: String,
    pub hold_date: DateTime<Utc>,
    pub previous_status: PartnerStatus,
}

/// Per-partner commission override for one product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductAssignment {
    pub product_id: Uuid,
    pub custom_margin: Decimal,
    pub final_rate: Decimal,
    pub assigned_by: String,
    pub assigned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: Option<PartnerStatus>,
    pub to: PartnerStatus,
    pub by: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partner {
    pub id: Uuid,
    pub company_name: String,
    pub business_type: Option<String>,
    pub tax_id: Option<String>,
    pub years_in_business: Option<u32>,
    pub number_of_employees: Option<u32>,
    pub expected_monthly_volume: Option<Decimal>,
    pub business_address: Option<String>,
    pub website: Option<String>,
    pub contact: ContactPerson,
    pub documents: Vec<String>,

    pub tier: Option<Tier>,
    pub tier_assigned_by: Option<String>,
    pub status: PartnerStatus,
    pub l1_step: ApprovalStep,
    pub l2_step: ApprovalStep,

    pub rejection_count: u32,
    pub resubmission_count: u32,
    pub rejection: Option<RejectionInfo>,
    pub previous_rejection: Option<RejectionInfo>,
    pub on_hold: bool,
    pub hold: Option<HoldInfo>,

    pub onboarding_progress: u8,
    pub product_assignments: Vec<ProductAssignment>,
    pub history: Vec<StatusTransition>,

    pub created_by: String,
    pub created_by_role: Role,
    pub user: Option<LinkedUser>,

    pub submitted_at: DateTime<Utc>,
    pub l1_approved_at: Option<DateTime<Utc>>,
    pub l2_approved_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Optimistic concurrency token. Bumped by the store on every save.
    pub version: i64,
}

impl Partner {
    pub fn is_approved(&self) -> bool {
        self.status == PartnerStatus::Approved
    }

    pub fn is_self_registered(&self) -> bool {
        self.created_by_role == Role::Partner
    }

    pub fn is_owned_by(&self, actor_id: &str) -> bool {
        self.user.as_ref().is_some_and(|u| u.user_id == actor_id)
    }
}
