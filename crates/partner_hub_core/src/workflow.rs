//! Partner approval workflow.
//!
//! Every mutation of a [`Partner`] goes through one of the functions here.
//! Each one checks authority first, then the transition guard, then the
//! payload, and only then touches the record. Persistence and per-partner
//! serialization are the caller's job (see `service`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgramError;
use crate::partner::{
    ApprovalStep, ContactPerson, HoldInfo, LinkedUser, Partner, PartnerStatus, ProductAssignment,
    RejectionInfo, ReviewLevel, StatusTransition, StepStatus, Tier,
};
use crate::principal::{Principal, Role};
use crate::tier_rates::Product;

pub type Result<T> = std::result::Result<T, ProgramError>;

// ── Onboarding progress checkpoints ────────────────────────────

pub const PROGRESS_SUBMITTED: u8 = 20;
pub const PROGRESS_WITH_DOCUMENTS: u8 = 30;
pub const PROGRESS_WITH_TIER: u8 = 35;
pub const PROGRESS_L1_REJECTED: u8 = 25;
pub const PROGRESS_RESUBMITTED: u8 = 35;
pub const PROGRESS_L2_REJECTED: u8 = 50;
pub const PROGRESS_L1_APPROVED: u8 = 60;
pub const PROGRESS_COMPLETE: u8 = 100;

const MANAGERS: &[Role] = &[Role::Admin, Role::PartnerManager];
const L1_REVIEWERS: &[Role] = &[Role::Admin, Role::L1Approver];
const L2_REVIEWERS: &[Role] = &[Role::Admin, Role::L2Approver];
const HOLDERS: &[Role] = &[
    Role::Admin,
    Role::PartnerManager,
    Role::L1Approver,
    Role::L2Approver,
];

// ── Transition table ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowAction {
    ApproveL1,
    RejectL1,
    ApproveL2,
    RejectL2,
    Hold,
    Resume,
    Resubmit,
    RejectPermanently,
    Deactivate,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApproveL1 => "l1-approve",
            Self::RejectL1 => "l1-reject",
            Self::ApproveL2 => "l2-approve",
            Self::RejectL2 => "l2-reject",
            Self::Hold => "hold",
            Self::Resume => "resume",
            Self::Resubmit => "resubmit",
            Self::RejectPermanently => "reject-permanently",
            Self::Deactivate => "deactivate",
        }
    }
}

/// Target status for `action` from the partner's current status, or `None`
/// when the pair is not a legal transition.
pub fn next_status(partner: &Partner, action: WorkflowAction) -> Option<PartnerStatus> {
    use PartnerStatus::*;
    use WorkflowAction::*;

    match (partner.status, action) {
        (PendingL1, ApproveL1) => Some(PendingL2),
        (PendingL1, RejectL1) => Some(RejectedByL1),
        (PendingL2, ApproveL2) => Some(Approved),
        (PendingL2, RejectL2) => Some(RejectedByL2),
        (PendingL1 | PendingL2, Hold) => Some(OnHold),
        (OnHold, Resume) => partner.hold.as_ref().map(|h| h.previous_status),
        (RejectedByL1 | RejectedByL2 | OnHold, Resubmit) => Some(PendingL1),
        (PendingL1 | PendingL2 | RejectedByL1 | RejectedByL2 | OnHold, RejectPermanently) => {
            Some(Rejected)
        }
        (Approved, Deactivate) => Some(Inactive),
        _ => None,
    }
}

fn guard(partner: &Partner, action: WorkflowAction) -> Result<PartnerStatus> {
    next_status(partner, action).ok_or_else(|| {
        tracing::warn!(
            partner_id = %partner.id,
            status = %partner.status,
            action = action.as_str(),
            "illegal workflow transition"
        );
        ProgramError::transition("partner", partner.status, action.as_str())
    })
}

fn move_to(
    partner: &mut Partner,
    to: PartnerStatus,
    by: &str,
    reason: Option<String>,
    now: DateTime<Utc>,
) {
    partner.history.push(StatusTransition {
        from: Some(partner.status),
        to,
        by: by.to_string(),
        reason,
        at: now,
    });
    partner.status = to;
    partner.updated_at = now;
}

fn require_text(value: Option<String>, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProgramError::validation(format!("{field} is required"))),
    }
}

fn set_user_active(partner: &mut Partner, active: bool) {
    if let Some(user) = partner.user.as_mut() {
        user.active = active;
    }
}

// ── Commands ───────────────────────────────────────────────────

/// Registration payload shared by both creation paths.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewPartner {
    pub company_name: String,
    pub business_type: Option<String>,
    pub tax_id: Option<String>,
    pub years_in_business: Option<u32>,
    pub number_of_employees: Option<u32>,
    pub expected_monthly_volume: Option<Decimal>,
    pub business_address: Option<String>,
    pub website: Option<String>,
    pub contact_person_name: String,
    pub contact_person_email: String,
    pub contact_person_phone: Option<String>,
    #[serde(default)]
    pub documents: Vec<String>,
    /// Honoured only on manager creation.
    pub tier: Option<Tier>,
    /// Existing login to link on manager creation.
    pub user_id: Option<String>,
}

impl NewPartner {
    fn validate(&self) -> Result<()> {
        if self.company_name.trim().is_empty() {
            return Err(ProgramError::validation("company_name is required"));
        }
        if self.contact_person_name.trim().is_empty() {
            return Err(ProgramError::validation("contact_person_name is required"));
        }
        validate_email(&self.contact_person_email)
    }
}

fn validate_email(email: &str) -> Result<()> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(ProgramError::validation(
            "contact_person_email must be a valid email address",
        )),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct L1ApproveCommand {
    pub tier: Option<Tier>,
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct L2ApproveCommand {
    pub comments: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RejectCommand {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HoldCommand {
    pub reason: Option<String>,
    pub comments: Option<String>,
}

/// The only partner fields a resubmission may change.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ResubmitCommand {
    pub company_name: Option<String>,
    pub business_type: Option<String>,
    pub tax_id: Option<String>,
    pub years_in_business: Option<u32>,
    pub number_of_employees: Option<u32>,
    pub expected_monthly_volume: Option<Decimal>,
    pub business_address: Option<String>,
    pub website: Option<String>,
    pub contact_person_name: Option<String>,
    pub contact_person_email: Option<String>,
    pub contact_person_phone: Option<String>,
    pub documents: Option<Vec<String>>,
    pub tier: Option<Tier>,
}

impl ResubmitCommand {
    fn validate(&self) -> Result<()> {
        if matches!(&self.company_name, Some(n) if n.trim().is_empty()) {
            return Err(ProgramError::validation("company_name cannot be blank"));
        }
        if matches!(&self.contact_person_name, Some(n) if n.trim().is_empty()) {
            return Err(ProgramError::validation(
                "contact_person_name cannot be blank",
            ));
        }
        if let Some(email) = &self.contact_person_email {
            validate_email(email)?;
        }
        Ok(())
    }

    fn apply(self, partner: &mut Partner) {
        if let Some(v) = self.company_name {
            partner.company_name = v;
        }
        if let Some(v) = self.business_type {
            partner.business_type = Some(v);
        }
        if let Some(v) = self.tax_id {
            partner.tax_id = Some(v);
        }
        if let Some(v) = self.years_in_business {
            partner.years_in_business = Some(v);
        }
        if let Some(v) = self.number_of_employees {
            partner.number_of_employees = Some(v);
        }
        if let Some(v) = self.expected_monthly_volume {
            partner.expected_monthly_volume = Some(v);
        }
        if let Some(v) = self.business_address {
            partner.business_address = Some(v);
        }
        if let Some(v) = self.website {
            partner.website = Some(v);
        }
        if let Some(v) = self.contact_person_name {
            partner.contact.name = v;
        }
        if let Some(v) = self.contact_person_email {
            partner.contact.email = v;
        }
        if let Some(v) = self.contact_person_phone {
            partner.contact.phone = Some(v);
        }
        if let Some(v) = self.documents {
            partner.documents = v;
        }
        if let Some(v) = self.tier {
            partner.tier = Some(v);
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductOverride {
    pub product_id: Uuid,
    #[serde(default)]
    pub custom_margin: Decimal,
}

// ── Creation ───────────────────────────────────────────────────

fn initial_progress(documents: usize, tier_supplied: bool) -> u8 {
    if tier_supplied {
        PROGRESS_WITH_TIER
    } else if documents >= 2 {
        PROGRESS_WITH_DOCUMENTS
    } else {
        PROGRESS_SUBMITTED
    }
}

fn build_partner(
    input: NewPartner,
    tier: Option<Tier>,
    created_by: String,
    created_by_role: Role,
    user: Option<LinkedUser>,
    now: DateTime<Utc>,
) -> Partner {
    let progress = initial_progress(input.documents.len(), tier.is_some());
    Partner {
        id: Uuid::new_v4(),
        company_name: input.company_name.trim().to_string(),
        business_type: input.business_type,
        tax_id: input.tax_id,
        years_in_business: input.years_in_business,
        number_of_employees: input.number_of_employees,
        expected_monthly_volume: input.expected_monthly_volume,
        business_address: input.business_address,
        website: input.website,
        contact: ContactPerson {
            name: input.contact_person_name.trim().to_string(),
            email: input.contact_person_email.trim().to_string(),
            phone: input.contact_person_phone,
        },
        documents: input.documents,
        tier,
        tier_assigned_by: tier.map(|_| created_by.clone()),
        status: PartnerStatus::PendingL1,
        l1_step: ApprovalStep::pending(1),
        l2_step: ApprovalStep::pending(2),
        rejection_count: 0,
        resubmission_count: 0,
        rejection: None,
        previous_rejection: None,
        on_hold: false,
        hold: None,
        onboarding_progress: progress,
        product_assignments: Vec::new(),
        history: vec![StatusTransition {
            from: None,
            to: PartnerStatus::PendingL1,
            by: created_by.clone(),
            reason: None,
            at: now,
        }],
        created_by,
        created_by_role,
        user,
        submitted_at: now,
        l1_approved_at: None,
        l2_approved_at: None,
        approved_at: None,
        created_at: now,
        updated_at: now,
        version: 0,
    }
}

/// Public self-registration. The new login stays inactive until L2 approval
/// and any tier in the payload is ignored.
pub fn self_register(input: NewPartner, user_id: &str, now: DateTime<Utc>) -> Result<Partner> {
    input.validate()?;
    let user = LinkedUser {
        user_id: user_id.to_string(),
        active: false,
    };
    Ok(build_partner(
        input,
        None,
        user_id.to_string(),
        Role::Partner,
        Some(user),
        now,
    ))
}

/// Manager-initiated creation. A tier may be proposed up front but L1 must
/// still confirm it.
pub fn create_partner(actor: &Principal, input: NewPartner, now: DateTime<Utc>) -> Result<Partner> {
    actor.require_any(MANAGERS, "create partners")?;
    input.validate()?;
    let role = actor
        .roles
        .iter()
        .copied()
        .find(|r| MANAGERS.contains(r))
        .unwrap_or(Role::PartnerManager);
    let user = input.user_id.clone().map(|user_id| LinkedUser {
        user_id,
        active: false,
    });
    let tier = input.tier;
    Ok(build_partner(
        input,
        tier,
        actor.actor_id.clone(),
        role,
        user,
        now,
    ))
}

// ── Review transitions ─────────────────────────────────────────

pub fn approve_l1(
    partner: &mut Partner,
    actor: &Principal,
    cmd: L1ApproveCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    actor.require_any(L1_REVIEWERS, "perform L1 review")?;
    let to = guard(partner, WorkflowAction::ApproveL1)?;
    let tier = cmd
        .tier
        .ok_or_else(|| ProgramError::validation("tier must be assigned at L1 approval"))?;

    partner.tier = Some(tier);
    partner.tier_assigned_by = Some(actor.actor_id.clone());
    partner.l1_step = ApprovalStep {
        level: 1,
        status: StepStatus::Approved,
        approver_id: Some(actor.actor_id.clone()),
        decided_at: Some(now),
        comments: cmd.comments.clone(),
        rejection_reason: None,
    };
    partner.rejection = None;
    partner.l1_approved_at = Some(now);
    partner.onboarding_progress = PROGRESS_L1_APPROVED;
    move_to(partner, to, &actor.actor_id, cmd.comments, now);

    tracing::info!(partner_id = %partner.id, %tier, "L1 approved");
    Ok(())
}

fn reject(
    partner: &mut Partner,
    actor: &Principal,
    level: ReviewLevel,
    cmd: RejectCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    let (allowed, action, progress) = match level {
        ReviewLevel::L1 => (L1_REVIEWERS, WorkflowAction::RejectL1, PROGRESS_L1_REJECTED),
        ReviewLevel::L2 => (L2_REVIEWERS, WorkflowAction::RejectL2, PROGRESS_L2_REJECTED),
    };
    actor.require_any(allowed, action.as_str())?;
    let to = guard(partner, action)?;
    let reason = require_text(cmd.reason, "rejection reason")?;

    let step = ApprovalStep {
        level: if level == ReviewLevel::L1 { 1 } else { 2 },
        status: StepStatus::Rejected,
        approver_id: Some(actor.actor_id.clone()),
        decided_at: Some(now),
        comments: None,
        rejection_reason: Some(reason.clone()),
    };
    match level {
        ReviewLevel::L1 => partner.l1_step = step,
        ReviewLevel::L2 => partner.l2_step = step,
    }
    partner.rejection_count += 1;
    partner.rejection = Some(RejectionInfo {
        reason: reason.clone(),
        rejected_by: actor.actor_id.clone(),
        rejected_at: now,
        level,
    });
    partner.onboarding_progress = progress;
    if partner.is_self_registered() {
        set_user_active(partner, false);
    }
    move_to(partner, to, &actor.actor_id, Some(reason), now);

    tracing::info!(
        partner_id = %partner.id,
        level = level.as_str(),
        rejection_count = partner.rejection_count,
        "partner rejected"
    );
    Ok(())
}

pub fn reject_l1(
    partner: &mut Partner,
    actor: &Principal,
    cmd: RejectCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    reject(partner, actor, ReviewLevel::L1, cmd, now)
}

pub fn reject_l2(
    partner: &mut Partner,
    actor: &Principal,
    cmd: RejectCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    reject(partner, actor, ReviewLevel::L2, cmd, now)
}

pub fn approve_l2(
    partner: &mut Partner,
    actor: &Principal,
    cmd: L2ApproveCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    actor.require_any(L2_REVIEWERS, "perform L2 review")?;
    let to = guard(partner, WorkflowAction::ApproveL2)?;

    partner.l2_step = ApprovalStep {
        level: 2,
        status: StepStatus::Approved,
        approver_id: Some(actor.actor_id.clone()),
        decided_at: Some(now),
        comments: cmd.comments.clone(),
        rejection_reason: None,
    };
    partner.rejection = None;
    partner.l2_approved_at = Some(now);
    partner.approved_at = Some(now);
    partner.onboarding_progress = PROGRESS_COMPLETE;
    set_user_active(partner, true);
    move_to(partner, to, &actor.actor_id, cmd.comments, now);

    tracing::info!(partner_id = %partner.id, "partner approved");
    Ok(())
}

// ── Hold / resume / resubmit ───────────────────────────────────

pub fn put_on_hold(
    partner: &mut Partner,
    actor: &Principal,
    cmd: HoldCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    actor.require_any(HOLDERS, "put partners on hold")?;
    let to = guard(partner, WorkflowAction::Hold)?;
    let reason = require_text(cmd.reason, "hold reason")?;
    let feedback = cmd
        .comments
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| reason.clone());

    partner.hold = Some(HoldInfo {
        reason: reason.clone(),
        feedback_message: feedback,
        initiated_by: actor.actor_id.clone(),
        hold_date: now,
        previous_status: partner.status,
    });
    partner.on_hold = true;
    move_to(partner, to, &actor.actor_id, Some(reason), now);

    tracing::info!(partner_id = %partner.id, "partner put on hold");
    Ok(())
}

/// Return a held partner to the queue it was taken from.
pub fn resume(partner: &mut Partner, actor: &Principal, now: DateTime<Utc>) -> Result<()> {
    actor.require_any(MANAGERS, "resume held partners")?;
    let to = guard(partner, WorkflowAction::Resume)?;

    partner.hold = None;
    partner.on_hold = false;
    move_to(partner, to, &actor.actor_id, None, now);

    tracing::info!(partner_id = %partner.id, status = %to, "partner resumed");
    Ok(())
}

fn authorize_resubmit(partner: &Partner, actor: &Principal) -> Result<()> {
    if partner.is_self_registered() {
        if actor.has_role(Role::Partner) && partner.is_owned_by(&actor.actor_id) {
            return Ok(());
        }
        return Err(ProgramError::Forbidden(format!(
            "{} may not resubmit a partner registered by another user",
            actor.actor_id
        )));
    }
    actor.require_any(MANAGERS, "resubmit partners")
}

/// Send a rejected or held partner back to L1. Both review steps restart.
pub fn resubmit(
    partner: &mut Partner,
    actor: &Principal,
    cmd: ResubmitCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    authorize_resubmit(partner, actor)?;
    let to = guard(partner, WorkflowAction::Resubmit)?;
    cmd.validate()?;

    cmd.apply(partner);
    partner.l1_step = ApprovalStep::pending(1);
    partner.l2_step = ApprovalStep::pending(2);
    if let Some(previous) = partner.rejection.take() {
        partner.previous_rejection = Some(previous);
    }
    partner.hold = None;
    partner.on_hold = false;
    partner.resubmission_count += 1;
    partner.onboarding_progress = PROGRESS_RESUBMITTED;
    partner.submitted_at = now;
    move_to(partner, to, &actor.actor_id, None, now);

    tracing::info!(
        partner_id = %partner.id,
        resubmission_count = partner.resubmission_count,
        "partner resubmitted"
    );
    Ok(())
}

// ── Out-of-band admin actions ──────────────────────────────────

pub fn reject_permanently(
    partner: &mut Partner,
    actor: &Principal,
    cmd: RejectCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    actor.require_any(MANAGERS, "permanently reject partners")?;
    let to = guard(partner, WorkflowAction::RejectPermanently)?;
    let reason = require_text(cmd.reason, "rejection reason")?;

    partner.hold = None;
    partner.on_hold = false;
    set_user_active(partner, false);
    move_to(partner, to, &actor.actor_id, Some(reason), now);

    tracing::info!(partner_id = %partner.id, "partner permanently rejected");
    Ok(())
}

pub fn deactivate(
    partner: &mut Partner,
    actor: &Principal,
    cmd: RejectCommand,
    now: DateTime<Utc>,
) -> Result<()> {
    actor.require_any(MANAGERS, "deactivate partners")?;
    let to = guard(partner, WorkflowAction::Deactivate)?;
    let reason = require_text(cmd.reason, "deactivation reason")?;

    set_user_active(partner, false);
    move_to(partner, to, &actor.actor_id, Some(reason), now);

    tracing::info!(partner_id = %partner.id, "partner deactivated");
    Ok(())
}

/// Attach products with per-partner margins. `products` must line up with
/// `overrides` by id; unknown ids are rejected by the caller.
pub fn assign_products(
    partner: &mut Partner,
    actor: &Principal,
    overrides: &[ProductOverride],
    products: &[Product],
    now: DateTime<Utc>,
) -> Result<()> {
    actor.require_any(MANAGERS, "assign products")?;
    if !partner.is_approved() {
        return Err(ProgramError::transition(
            "partner",
            partner.status,
            "assign-products",
        ));
    }
    if overrides.is_empty() {
        return Err(ProgramError::validation("at least one product is required"));
    }

    for o in overrides {
        let product = products
            .iter()
            .find(|p| p.id == o.product_id)
            .ok_or_else(|| ProgramError::not_found("product", o.product_id))?;
        let final_rate = product.base_commission_rate + o.custom_margin;
        if final_rate < Decimal::ZERO || final_rate > Decimal::ONE_HUNDRED {
            return Err(ProgramError::validation(format!(
                "final rate for {} must be between 0 and 100",
                product.name
            )));
        }
        let assignment = ProductAssignment {
            product_id: product.id,
            custom_margin: o.custom_margin,
            final_rate,
            assigned_by: actor.actor_id.clone(),
            assigned_at: now,
        };
        match partner
            .product_assignments
            .iter_mut()
            .find(|a| a.product_id == product.id)
        {
            Some(existing) => *existing = assignment,
            None => partner.product_assignments.push(assignment),
        }
    }
    partner.onboarding_progress = PROGRESS_COMPLETE;
    partner.updated_at = now;

    tracing::info!(
        partner_id = %partner.id,
        products = overrides.len(),
        "products assigned"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Principal {
        Principal::in_process("mgr-1", vec![Role::PartnerManager])
    }

    fn l1() -> Principal {
        Principal::in_process("l1-1", vec![Role::L1Approver])
    }

    fn l2() -> Principal {
        Principal::in_process("l2-1", vec![Role::L2Approver])
    }

    fn input() -> NewPartner {
        NewPartner {
            company_name: "Acme Resellers".into(),
            contact_person_name: "Dana Ortiz".into(),
            contact_person_email: "dana@acme.test".into(),
            ..Default::default()
        }
    }

    fn fresh() -> Partner {
        create_partner(&manager(), input(), Utc::now()).unwrap()
    }

    fn approve_both(p: &mut Partner, tier: Tier) {
        let cmd = L1ApproveCommand {
            tier: Some(tier),
            comments: None,
        };
        approve_l1(p, &l1(), cmd, Utc::now()).unwrap();
        approve_l2(p, &l2(), L2ApproveCommand::default(), Utc::now()).unwrap();
    }

    fn reason(r: &str) -> RejectCommand {
        RejectCommand {
            reason: Some(r.into()),
        }
    }

    #[test]
    fn fresh_partner_is_pending_l1() {
        let p = fresh();
        assert_eq!(p.status, PartnerStatus::PendingL1);
        assert_eq!(p.onboarding_progress, PROGRESS_SUBMITTED);
        assert_eq!(p.l1_step.status, StepStatus::Pending);
        assert_eq!(p.l2_step.status, StepStatus::Pending);
    }

    #[test]
    fn creation_requires_contact_fields() {
        let mut bad = input();
        bad.contact_person_email = "not-an-email".into();
        let err = create_partner(&manager(), bad, Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Validation(_)));

        let mut bad = input();
        bad.company_name = "  ".into();
        assert!(create_partner(&manager(), bad, Utc::now()).is_err());
    }

    #[test]
    fn creation_progress_reflects_documents_and_tier() {
        let mut with_docs = input();
        with_docs.documents = vec!["w9.pdf".into(), "license.pdf".into()];
        let p = create_partner(&manager(), with_docs, Utc::now()).unwrap();
        assert_eq!(p.onboarding_progress, PROGRESS_WITH_DOCUMENTS);

        let mut with_tier = input();
        with_tier.tier = Some(Tier::Silver);
        let p = create_partner(&manager(), with_tier, Utc::now()).unwrap();
        assert_eq!(p.onboarding_progress, PROGRESS_WITH_TIER);
        assert_eq!(p.tier, Some(Tier::Silver));
    }

    #[test]
    fn creator_role_is_the_managing_role() {
        let actor = Principal::in_process("mgr-2", vec![Role::Finance, Role::PartnerManager]);
        let p = create_partner(&actor, input(), Utc::now()).unwrap();
        assert_eq!(p.created_by_role, Role::PartnerManager);
    }

    #[test]
    fn self_registration_ignores_tier_and_links_inactive_user() {
        let mut i = input();
        i.tier = Some(Tier::Platinum);
        let p = self_register(i, "user-9", Utc::now()).unwrap();
        assert_eq!(p.tier, None);
        assert_eq!(p.created_by_role, Role::Partner);
        assert_eq!(
            p.user,
            Some(LinkedUser {
                user_id: "user-9".into(),
                active: false
            })
        );
    }

    #[test]
    fn l2_approve_on_fresh_partner_is_state_conflict() {
        let mut p = fresh();
        let err = approve_l2(&mut p, &l2(), L2ApproveCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
        assert_eq!(p.status, PartnerStatus::PendingL1);
    }

    #[test]
    fn full_approval_sets_tier_and_progress() {
        let mut p = fresh();
        approve_both(&mut p, Tier::Gold);
        assert_eq!(p.status, PartnerStatus::Approved);
        assert_eq!(p.tier, Some(Tier::Gold));
        assert_eq!(p.tier_assigned_by.as_deref(), Some("l1-1"));
        assert_eq!(p.onboarding_progress, 100);
        assert!(p.approved_at.is_some());
        assert_eq!(p.history.len(), 3);
    }

    #[test]
    fn l1_approve_requires_tier_even_when_preset() {
        let mut i = input();
        i.tier = Some(Tier::Gold);
        let mut p = create_partner(&manager(), i, Utc::now()).unwrap();
        let err = approve_l1(&mut p, &l1(), L1ApproveCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Validation(_)));
        assert_eq!(p.status, PartnerStatus::PendingL1);
    }

    #[test]
    fn wrong_role_is_forbidden_before_state_check() {
        let mut p = fresh();
        let before = p.clone();
        // L2 approver hitting L1 on a partner that is in the right state
        let cmd = L1ApproveCommand {
            tier: Some(Tier::Gold),
            comments: None,
        };
        let err = approve_l1(&mut p, &l2(), cmd, Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Forbidden(_)));

        // L1 approver hitting L2 on a partner in the wrong state
        let err = approve_l2(&mut p, &l1(), L2ApproveCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Forbidden(_)));
        assert_eq!(p, before);
    }

    #[test]
    fn rejection_requires_reason_and_counts() {
        let mut p = fresh();
        let err = reject_l1(&mut p, &l1(), RejectCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Validation(_)));
        assert_eq!(p.rejection_count, 0);

        reject_l1(&mut p, &l1(), reason("missing W-9"), Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::RejectedByL1);
        assert_eq!(p.rejection_count, 1);
        assert_eq!(p.l1_step.rejection_reason.as_deref(), Some("missing W-9"));
        assert_eq!(p.rejection.as_ref().map(|r| r.level), Some(ReviewLevel::L1));
        assert_eq!(p.onboarding_progress, PROGRESS_L1_REJECTED);
    }

    #[test]
    fn rejecting_self_registered_partner_deactivates_login() {
        let mut p = self_register(input(), "user-3", Utc::now()).unwrap();
        p.user.as_mut().unwrap().active = true;
        reject_l1(&mut p, &l1(), reason("incomplete"), Utc::now()).unwrap();
        assert!(!p.user.unwrap().active);
    }

    #[test]
    fn resubmit_resets_both_steps_after_l2_rejection() {
        let mut p = fresh();
        let cmd = L1ApproveCommand {
            tier: Some(Tier::Silver),
            comments: None,
        };
        approve_l1(&mut p, &l1(), cmd, Utc::now()).unwrap();
        reject_l2(&mut p, &l2(), reason("bad references"), Utc::now()).unwrap();
        assert_eq!(p.l1_step.status, StepStatus::Approved);

        let amend = ResubmitCommand {
            website: Some("https://acme.test".into()),
            ..Default::default()
        };
        resubmit(&mut p, &manager(), amend, Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::PendingL1);
        assert_eq!(p.l1_step, ApprovalStep::pending(1));
        assert_eq!(p.l2_step, ApprovalStep::pending(2));
        assert_eq!(p.resubmission_count, 1);
        assert_eq!(p.website.as_deref(), Some("https://acme.test"));
        assert!(p.rejection.is_none());
        assert_eq!(
            p.previous_rejection.as_ref().map(|r| r.level),
            Some(ReviewLevel::L2)
        );
    }

    #[test]
    fn resubmit_from_pending_is_state_conflict() {
        let mut p = fresh();
        let err = resubmit(&mut p, &manager(), ResubmitCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
        assert_eq!(p.resubmission_count, 0);
    }

    #[test]
    fn self_registered_partner_resubmits_only_as_owner() {
        let mut p = self_register(input(), "user-5", Utc::now()).unwrap();
        reject_l1(&mut p, &l1(), reason("blurry scan"), Utc::now()).unwrap();

        let stranger = Principal::in_process("user-6", vec![Role::Partner]);
        let err = resubmit(&mut p, &stranger, ResubmitCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Forbidden(_)));
        let err = resubmit(&mut p, &manager(), ResubmitCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Forbidden(_)));

        let owner = Principal::in_process("user-5", vec![Role::Partner]);
        resubmit(&mut p, &owner, ResubmitCommand::default(), Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::PendingL1);
    }

    #[test]
    fn hold_remembers_queue_and_resume_returns_to_it() {
        let mut p = fresh();
        let cmd = L1ApproveCommand {
            tier: Some(Tier::Bronze),
            comments: None,
        };
        approve_l1(&mut p, &l1(), cmd, Utc::now()).unwrap();

        let hold = HoldCommand {
            reason: Some("need updated bank letter".into()),
            comments: None,
        };
        put_on_hold(&mut p, &l2(), hold, Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::OnHold);
        assert!(p.on_hold);
        let info = p.hold.clone().unwrap();
        assert_eq!(info.previous_status, PartnerStatus::PendingL2);
        assert_eq!(info.feedback_message, "need updated bank letter");

        resume(&mut p, &manager(), Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::PendingL2);
        assert!(!p.on_hold);
        assert_eq!(p.l1_step.status, StepStatus::Approved);
    }

    #[test]
    fn hold_requires_reason() {
        let mut p = fresh();
        let err = put_on_hold(&mut p, &manager(), HoldCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::Validation(_)));
    }

    #[test]
    fn approved_partner_cannot_be_held() {
        let mut p = fresh();
        approve_both(&mut p, Tier::Gold);
        let hold = HoldCommand {
            reason: Some("audit".into()),
            comments: None,
        };
        let err = put_on_hold(&mut p, &manager(), hold, Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
    }

    #[test]
    fn deactivate_only_from_approved() {
        let mut p = fresh();
        assert!(deactivate(&mut p, &manager(), reason("fraud"), Utc::now()).is_err());
        approve_both(&mut p, Tier::Gold);
        deactivate(&mut p, &manager(), reason("fraud"), Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::Inactive);
    }

    #[test]
    fn reject_permanently_is_terminal() {
        let mut p = fresh();
        reject_permanently(&mut p, &manager(), reason("duplicate"), Utc::now()).unwrap();
        assert_eq!(p.status, PartnerStatus::Rejected);
        let err = resubmit(&mut p, &manager(), ResubmitCommand::default(), Utc::now()).unwrap_err();
        assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
    }

    #[test]
    fn assign_products_computes_final_rate() {
        let mut p = fresh();
        let product = Product::new("Router X", rust_decimal::Decimal::new(5, 0));
        let overrides = vec![ProductOverride {
            product_id: product.id,
            custom_margin: rust_decimal::Decimal::new(25, 1),
        }];
        let err = assign_products(&mut p, &manager(), &overrides, &[product.clone()], Utc::now())
            .unwrap_err();
        assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));

        approve_both(&mut p, Tier::Silver);
        assign_products(&mut p, &manager(), &overrides, &[product.clone()], Utc::now()).unwrap();
        let o = p
            .product_assignments
            .iter()
            .find(|a| a.product_id == product.id)
            .unwrap();
        assert_eq!(o.final_rate, rust_decimal::Decimal::new(75, 1));
    }
}
