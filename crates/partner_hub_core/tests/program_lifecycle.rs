//! End-to-end program scenarios over the in-memory store.
//!
//! Run with: cargo test -p partner_hub_core --test program_lifecycle

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use partner_hub_core::assignment::{AssignmentStatus, NewAssignment};
use partner_hub_core::commission::{CommissionStatus, CreditShare};
use partner_hub_core::memory::MemoryStore;
use partner_hub_core::milestone::{MilestoneStatus, MilestoneType, NewMilestone, RewardType};
use partner_hub_core::partner::{Partner, PartnerStatus, Tier};
use partner_hub_core::payout::{NewPayoutBatch, PayoutStatus};
use partner_hub_core::sale::NewSale;
use partner_hub_core::service::ReconcileRequest;
use partner_hub_core::spiff::{IncentiveType, NewSpiff, SpiffStatus, SpiffTargeting};
use partner_hub_core::tier_rates::{NewProduct, Product};
use partner_hub_core::workflow::{
    L1ApproveCommand, L2ApproveCommand, NewPartner, ProductOverride, RejectCommand,
};
use partner_hub_core::{Principal, ProgramError, ProgramService, ProgramServiceImpl, Role};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

// ── Fixtures ───────────────────────────────────────────────────

fn admin() -> Principal {
    Principal::in_process("admin-1", vec![Role::Admin])
}

fn finance() -> Principal {
    Principal::in_process("fin-1", vec![Role::Finance])
}

fn service() -> Arc<ProgramServiceImpl> {
    Arc::new(ProgramServiceImpl::from_store(Arc::new(MemoryStore::new())))
}

fn mid_year() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

async fn approved_partner(svc: &ProgramServiceImpl, tier: Tier) -> Partner {
    let input = NewPartner {
        company_name: "Contoso Channel".into(),
        contact_person_name: "Riley Chen".into(),
        contact_person_email: "riley@contoso.test".into(),
        ..Default::default()
    };
    let p = svc.create_partner(&admin(), input).await.unwrap();
    let cmd = L1ApproveCommand {
        tier: Some(tier),
        comments: Some("checked".into()),
    };
    svc.approve_l1(&admin(), p.id, cmd).await.unwrap();
    svc.approve_l2(&admin(), p.id, L2ApproveCommand::default())
        .await
        .unwrap()
}

async fn product(svc: &ProgramServiceImpl, gold_rate: Decimal) -> Product {
    let input = NewProduct {
        name: "Edge Router".into(),
        base_commission_rate: dec!(5),
        tier_commissions: [(Tier::Gold, gold_rate), (Tier::Silver, dec!(6))].into(),
    };
    svc.create_product(&finance(), input).await.unwrap()
}

async fn gold_spiff(svc: &ProgramServiceImpl, product_id: Uuid) {
    let input = NewSpiff {
        name: "Summer push".into(),
        description: None,
        start_date: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        end_date: Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap(),
        incentive_type: IncentiveType::Fixed,
        incentive_amount: dec!(20),
        targeting: SpiffTargeting::Tiers([Tier::Gold].into()),
        target_products: [product_id].into(),
        status: SpiffStatus::Active,
    };
    svc.create_spiff(&finance(), input).await.unwrap();
}

async fn assignment(
    svc: &ProgramServiceImpl,
    partner_id: Uuid,
    product_id: Uuid,
    target_quantity: Decimal,
) -> Uuid {
    let input = NewAssignment {
        partner_id,
        product_ids: [product_id].into(),
        spiff_id: None,
        target_quantity: Some(target_quantity),
        target_revenue: None,
        start_date: None,
        end_date: None,
        notes: None,
    };
    svc.create_assignment(&admin(), input).await.unwrap().id
}

fn sale(partner_id: Uuid, product_id: Uuid, quantity: u32, unit_price: Decimal) -> NewSale {
    NewSale {
        partner_id,
        product_id,
        quantity,
        unit_price,
        sale_date: mid_year(),
        customer_name: Some("Fabrikam".into()),
    }
}

// ── Commission & spiff ─────────────────────────────────────────

#[tokio::test]
async fn gold_sale_with_fixed_spiff_end_to_end() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    gold_spiff(&svc, product.id).await;
    let assignment_id = assignment(&svc, partner.id, product.id, dec!(10)).await;

    let receipt = svc
        .log_sale(&admin(), sale(partner.id, product.id, 5, dec!(100.00)))
        .await
        .unwrap();
    let tx = &receipt.record.transaction;
    assert_eq!(tx.total_amount, dec!(500.00));
    assert_eq!(tx.commission_amount, dec!(50.00));
    assert_eq!(tx.spiff_bonus, dec!(100.00));
    assert_eq!(tx.total_commission, dec!(150.00));
    assert_eq!(tx.assignment_id, Some(assignment_id));
    assert_eq!(receipt.record.commission_status, CommissionStatus::Pending);
    assert_eq!(receipt.record.lines.len(), 1);

    let a = receipt.outcome.assignment.as_ref().unwrap();
    assert_eq!(a.actual_quantity, dec!(5));
    assert_eq!(a.actual_revenue, dec!(500.00));
    assert_eq!(a.completion_percentage, dec!(50));
}

#[tokio::test]
async fn sale_one_day_after_spiff_end_gets_no_bonus() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    gold_spiff(&svc, product.id).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;

    let mut late = sale(partner.id, product.id, 5, dec!(100.00));
    late.sale_date = Utc.with_ymd_and_hms(2025, 6, 30, 23, 59, 59).unwrap() + Duration::days(1);
    let receipt = svc.log_sale(&admin(), late).await.unwrap();
    assert_eq!(receipt.record.transaction.spiff_bonus, Decimal::ZERO);
    assert_eq!(receipt.record.transaction.total_commission, dec!(50.00));
}

#[tokio::test]
async fn silver_partner_gets_tier_rate_but_not_gold_spiff() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Silver).await;
    let product = product(&svc, dec!(10)).await;
    gold_spiff(&svc, product.id).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;

    let receipt = svc
        .log_sale(&admin(), sale(partner.id, product.id, 2, dec!(99.99)))
        .await
        .unwrap();
    let tx = receipt.record.transaction;
    assert_eq!(tx.total_amount, dec!(199.98));
    // 199.98 × 6% = 11.9988
    assert_eq!(tx.commission_amount, dec!(12.00));
    assert_eq!(tx.spiff_bonus, Decimal::ZERO);
}

#[tokio::test]
async fn assigned_margin_does_not_reprice_sales() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    let overrides = vec![ProductOverride {
        product_id: product.id,
        custom_margin: Decimal::ZERO,
    }];
    let partner = svc
        .assign_products(&admin(), partner.id, overrides)
        .await
        .unwrap();
    assert_eq!(partner.product_assignments[0].final_rate, dec!(5));
    assignment(&svc, partner.id, product.id, dec!(10)).await;

    let receipt = svc
        .log_sale(&admin(), sale(partner.id, product.id, 5, dec!(100)))
        .await
        .unwrap();
    let tx = receipt.record.transaction;
    assert_eq!(tx.commission_rate, dec!(10));
    assert_eq!(tx.commission_amount, dec!(50.00));
}

#[tokio::test]
async fn oversized_sale_is_a_validation_error() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    let id = assignment(&svc, partner.id, product.id, dec!(10)).await;

    let err = svc
        .log_sale(&admin(), sale(partner.id, product.id, 4, Decimal::MAX / dec!(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Validation(_)));
    assert_eq!(err.http_status(), 400);

    let view = svc.get_assignment(id).await.unwrap();
    assert_eq!(view.assignment.actual_quantity, Decimal::ZERO);
}

#[tokio::test]
async fn sale_preconditions() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;

    let err = svc
        .log_sale(&admin(), sale(partner.id, product.id, 1, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Validation(_)));
    assert_eq!(err.http_status(), 400);

    let err = svc
        .log_sale(&admin(), sale(partner.id, Uuid::new_v4(), 1, dec!(10)))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    let err = svc
        .log_sale(&admin(), sale(Uuid::new_v4(), product.id, 1, dec!(10)))
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 404);

    let pending = svc
        .create_partner(
            &admin(),
            NewPartner {
                company_name: "Pending Co".into(),
                contact_person_name: "Jo".into(),
                contact_person_email: "jo@pending.test".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let err = svc
        .log_sale(&admin(), sale(pending.id, product.id, 1, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn completed_assignment_no_longer_accepts_sales() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    let id = assignment(&svc, partner.id, product.id, dec!(10)).await;
    svc.set_assignment_status(&admin(), id, AssignmentStatus::Completed)
        .await
        .unwrap();

    let err = svc
        .log_sale(&admin(), sale(partner.id, product.id, 1, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Validation(_)));
}

#[tokio::test]
async fn partner_may_log_only_its_own_sales() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;

    let outsider = Principal::in_process("someone-else", vec![Role::Partner]);
    let err = svc
        .log_sale(&outsider, sale(partner.id, product.id, 1, dec!(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Forbidden(_)));
}

// ── Progress & milestones ──────────────────────────────────────

#[tokio::test]
async fn completion_exceeds_100_and_milestone_is_write_once() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    let id = assignment(&svc, partner.id, product.id, dec!(10)).await;
    let milestone = svc
        .create_milestone(
            &admin(),
            NewMilestone {
                name: "Ten units".into(),
                description: None,
                threshold: dec!(10),
                milestone_type: MilestoneType::Quantity,
                reward_amount: dec!(100),
                reward_type: RewardType::Cash,
            },
        )
        .await
        .unwrap();

    let first = svc
        .log_sale(&admin(), sale(partner.id, product.id, 10, dec!(50)))
        .await
        .unwrap();
    let progress = &first.outcome.milestones[0];
    assert_eq!(progress.milestone_id, milestone.id);
    assert_eq!(progress.status, MilestoneStatus::Achieved);
    let achieved_at = progress.achieved_at.unwrap();

    let second = svc
        .log_sale(&admin(), sale(partner.id, product.id, 4, dec!(50)))
        .await
        .unwrap();
    assert_eq!(second.outcome.milestones[0].achieved_at, Some(achieved_at));
    assert_eq!(second.outcome.milestones[0].percentage_complete, dec!(140));

    let view = svc.get_assignment(id).await.unwrap();
    assert_eq!(view.assignment.completion_percentage, dec!(140));
    assert_eq!(view.milestones.len(), 1);
    assert_eq!(view.milestones[0].achieved_at, Some(achieved_at));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sales_do_not_lose_increments() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    let id = assignment(&svc, partner.id, product.id, dec!(100)).await;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let svc = svc.clone();
        let s = sale(partner.id, product.id, 2, dec!(10.00));
        handles.push(tokio::spawn(async move { svc.log_sale(&admin(), s).await }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let view = svc.get_assignment(id).await.unwrap();
    assert_eq!(view.assignment.actual_quantity, dec!(50));
    assert_eq!(view.assignment.actual_revenue, dec!(500.00));
    assert_eq!(view.assignment.completion_percentage, dec!(50));
}

// ── Workflow serialization ─────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_l1_approvals_advance_once() {
    let svc = service();
    let p = svc
        .create_partner(
            &admin(),
            NewPartner {
                company_name: "Race Co".into(),
                contact_person_name: "Ari".into(),
                contact_person_email: "ari@race.test".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let svc = svc.clone();
        let id = p.id;
        handles.push(tokio::spawn(async move {
            let approver = Principal::in_process(format!("l1-{i}"), vec![Role::L1Approver]);
            let cmd = L1ApproveCommand {
                tier: Some(Tier::Gold),
                comments: None,
            };
            svc.approve_l1(&approver, id, cmd).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(ProgramError::Conflict(_) | ProgramError::InvalidStateTransition { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);

    let stored = svc.get_partner(p.id).await.unwrap();
    assert_eq!(stored.status, PartnerStatus::PendingL2);
    let l1_moves = stored
        .history
        .iter()
        .filter(|t| t.to == PartnerStatus::PendingL2)
        .count();
    assert_eq!(l1_moves, 1);
}

// ── Credit split ───────────────────────────────────────────────

fn share(user: &str, pct: Decimal) -> CreditShare {
    CreditShare {
        user_id: user.into(),
        credit_percent: pct,
        role: "sales_rep".into(),
    }
}

#[tokio::test]
async fn credit_split_replaces_previous_rows() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;
    let tx = svc
        .log_sale(&admin(), sale(partner.id, product.id, 5, dec!(100)))
        .await
        .unwrap()
        .record
        .transaction;

    let err = svc
        .split_credit(&finance(), tx.id, vec![share("u1", dec!(70)), share("u2", dec!(20))])
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Validation(_)));
    assert_eq!(svc.get_sale(tx.id).await.unwrap().lines.len(), 1);

    let split = svc
        .split_credit(&finance(), tx.id, vec![share("u1", dec!(70)), share("u2", dec!(30))])
        .await
        .unwrap();
    assert_eq!(split.lines.len(), 2);
    assert_eq!(split.lines[0].total_commission, dec!(35.00));
    assert_eq!(split.lines[1].total_commission, dec!(15.00));

    let resplit = svc
        .split_credit(
            &finance(),
            tx.id,
            vec![
                share("u3", dec!(50)),
                share("u4", dec!(25)),
                share("u5", dec!(25)),
            ],
        )
        .await
        .unwrap();
    assert_eq!(resplit.lines.len(), 3);
    let stored = svc.get_sale(tx.id).await.unwrap();
    let beneficiaries: Vec<&str> = stored
        .lines
        .iter()
        .map(|l| l.beneficiary_id.as_str())
        .collect();
    assert_eq!(beneficiaries, vec!["u3", "u4", "u5"]);
    assert_eq!(stored.transaction.total_commission, dec!(50.00));
}

#[tokio::test]
async fn credit_split_after_approval_is_state_conflict() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;
    let tx = svc
        .log_sale(&admin(), sale(partner.id, product.id, 1, dec!(100)))
        .await
        .unwrap()
        .record
        .transaction;
    svc.approve_commission(&finance(), tx.id).await.unwrap();

    let err = svc
        .split_credit(&finance(), tx.id, vec![share("u1", dec!(100))])
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
}

// ── Commission approval ────────────────────────────────────────

#[tokio::test]
async fn commission_status_is_append_only() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;
    let tx = svc
        .log_sale(&admin(), sale(partner.id, product.id, 1, dec!(100)))
        .await
        .unwrap()
        .record
        .transaction;

    let err = svc
        .approve_commission(&partner_manager(), tx.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Forbidden(_)));

    let err = svc
        .reject_commission(&finance(), tx.id, RejectCommand::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Validation(_)));

    let rejected = svc
        .reject_commission(
            &finance(),
            tx.id,
            RejectCommand {
                reason: Some("duplicate order".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(rejected.commission_status, CommissionStatus::Rejected);
    assert_eq!(
        rejected.lines[0].rejection_reason.as_deref(),
        Some("duplicate order")
    );

    let err = svc.approve_commission(&finance(), tx.id).await.unwrap_err();
    assert!(matches!(err, ProgramError::InvalidStateTransition { .. }));
}

fn partner_manager() -> Principal {
    Principal::in_process("pm-1", vec![Role::PartnerManager])
}

#[tokio::test]
async fn bulk_approve_skips_settled_transactions() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(10)).await;
    let mut ids = Vec::new();
    for _ in 0..3 {
        let r = svc
            .log_sale(&admin(), sale(partner.id, product.id, 1, dec!(100)))
            .await
            .unwrap();
        ids.push(r.record.transaction.id);
    }
    svc.approve_commission(&finance(), ids[0]).await.unwrap();

    let missing = Uuid::new_v4();
    let mut request = ids.clone();
    request.push(missing);
    let result = svc
        .bulk_approve_commissions(&finance(), request)
        .await
        .unwrap();
    assert_eq!(result.approved, vec![ids[1], ids[2]]);
    assert_eq!(result.skipped, vec![ids[0], missing]);
}

// ── Payouts ────────────────────────────────────────────────────

#[tokio::test]
async fn payout_batch_pays_approved_lines_and_reconciles() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(1000)).await;

    // 100 × 100.00 at 10% = 1000.00
    let approved = svc
        .log_sale(&admin(), sale(partner.id, product.id, 100, dec!(100.00)))
        .await
        .unwrap()
        .record
        .transaction;
    svc.approve_commission(&finance(), approved.id).await.unwrap();
    // still pending: must not be swept up
    let pending = svc
        .log_sale(&admin(), sale(partner.id, product.id, 1, dec!(100.00)))
        .await
        .unwrap()
        .record
        .transaction;

    let request = NewPayoutBatch {
        beneficiary_ids: vec![partner.id.to_string()],
        period_start: mid_year() - Duration::days(1),
        period_end: mid_year() + Duration::days(1),
        currency: "USD".into(),
        adjustments: None,
        deductions: None,
    };
    let batch = svc
        .create_payout_batch(&finance(), request.clone())
        .await
        .unwrap();
    assert_eq!(batch.total_amount, dec!(1000.00));
    assert_eq!(batch.net_payout, dec!(1000.00));
    assert_eq!(batch.line_ids.len(), 1);

    let paid = svc.get_sale(approved.id).await.unwrap();
    assert_eq!(paid.commission_status, CommissionStatus::Paid);
    assert_eq!(paid.lines[0].payout_batch_id, Some(batch.id));
    assert_eq!(
        svc.get_sale(pending.id).await.unwrap().commission_status,
        CommissionStatus::Pending
    );

    let err = svc
        .create_payout_batch(&finance(), request)
        .await
        .unwrap_err();
    assert!(matches!(err, ProgramError::Validation(_)));

    let matched = svc
        .reconcile_payout(
            &finance(),
            batch.id,
            ReconcileRequest {
                actual_amount: dec!(1000.005),
            },
        )
        .await
        .unwrap();
    assert_eq!(matched.status, PayoutStatus::Matched);

    let off = svc
        .reconcile_payout(
            &finance(),
            batch.id,
            ReconcileRequest {
                actual_amount: dec!(1000.02),
            },
        )
        .await
        .unwrap();
    assert_eq!(off.status, PayoutStatus::VarianceFound);
    assert_eq!(off.variance, Some(dec!(0.02)));
    assert_eq!(
        svc.get_payout_batch(batch.id).await.unwrap().net_payout,
        dec!(1000.00)
    );
}

#[tokio::test]
async fn payout_converts_currency_on_split_lines() {
    let svc = service();
    let partner = approved_partner(&svc, Tier::Gold).await;
    let product = product(&svc, dec!(10)).await;
    assignment(&svc, partner.id, product.id, dec!(1000)).await;
    let tx = svc
        .log_sale(&admin(), sale(partner.id, product.id, 10, dec!(100)))
        .await
        .unwrap()
        .record
        .transaction;
    svc.split_credit(&finance(), tx.id, vec![share("rep-a", dec!(60)), share("rep-b", dec!(40))])
        .await
        .unwrap();
    svc.approve_commission(&finance(), tx.id).await.unwrap();

    let batch = svc
        .create_payout_batch(
            &finance(),
            NewPayoutBatch {
                beneficiary_ids: vec!["rep-a".into()],
                period_start: mid_year() - Duration::days(1),
                period_end: mid_year(),
                currency: "GBP".into(),
                adjustments: Some(dec!(5)),
                deductions: Some(dec!(1)),
            },
        )
        .await
        .unwrap();
    // (60.00 + 5 − 1) × 0.79 = 50.56
    assert_eq!(batch.total_amount, dec!(60.00));
    assert_eq!(batch.net_payout, dec!(50.56));

    let record = svc.get_sale(tx.id).await.unwrap();
    assert_eq!(record.commission_status, CommissionStatus::Approved);
    let rep_b = record
        .lines
        .iter()
        .find(|l| l.beneficiary_id == "rep-b")
        .unwrap();
    assert_eq!(rep_b.status, CommissionStatus::Approved);
}
