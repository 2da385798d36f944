//! ProgramService - the orchestration layer over the pure engines.
//!
//! Holds the store ports as `Arc<dyn Port>` so the same logic runs against
//! Postgres or [`MemoryStore`](crate::memory::MemoryStore). Every mutating
//! call takes the caller's [`Principal`] explicitly.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::assignment::{AssignmentStatus, FulfillmentAssignment, NewAssignment};
use crate::audit::TracingAuditSink;
use crate::commission::{self, CommissionEvent, CommissionStatus, CreditShare};
use crate::error::ProgramError;
use crate::milestone::{Milestone, MilestoneProgress, NewMilestone};
use crate::partner::Partner;
use crate::payout::{ExchangeRateTable, NewPayoutBatch, PayoutBatch, PayoutDraft};
use crate::ports::{
    AuditEntry, AuditSink, CatalogStore, FulfillmentStore, PartnerStore, PayoutStore, SaleOutcome,
    SaleStore,
};
use crate::principal::{Principal, Role};
use crate::sale::{NewSale, SaleRecord};
use crate::spiff::{self, NewSpiff, Spiff, SpiffStatus};
use crate::tier_rates::{self, NewProduct, Product};
use crate::workflow::{
    self, HoldCommand, L1ApproveCommand, L2ApproveCommand, NewPartner, ProductOverride,
    RejectCommand, ResubmitCommand,
};

pub type Result<T> = std::result::Result<T, ProgramError>;

const CATALOG_ADMINS: &[Role] = &[Role::Admin, Role::Finance];
const PROGRAM_MANAGERS: &[Role] = &[Role::Admin, Role::PartnerManager];
const SALES_LOGGERS: &[Role] = &[Role::Admin, Role::PartnerManager, Role::Finance];
const COMMISSION_APPROVERS: &[Role] = &[Role::Admin, Role::Finance];
const CREDIT_SPLITTERS: &[Role] = &[Role::Admin, Role::PartnerManager, Role::Finance];
const PAYOUT_OPERATORS: &[Role] = &[Role::Admin, Role::Finance];

// ── Response shapes ───────────────────────────────────────────

/// Result of logging a sale: the priced transaction plus the aggregates it moved.
#[derive(Debug, Clone, Serialize)]
pub struct SaleReceipt {
    #[serde(flatten)]
    pub record: SaleRecord,
    #[serde(flatten)]
    pub outcome: SaleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpiffView {
    #[serde(flatten)]
    pub spiff: Spiff,
    pub effective_status: SpiffStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: FulfillmentAssignment,
    pub milestones: Vec<MilestoneProgress>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkApproveResult {
    pub approved: Vec<Uuid>,
    pub skipped: Vec<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileRequest {
    pub actual_amount: Decimal,
}

// ── ProgramService trait ──────────────────────────────────────

#[async_trait]
pub trait ProgramService: Send + Sync {
    // Partner onboarding
    async fn self_register(&self, input: NewPartner) -> Result<Partner>;
    async fn create_partner(&self, principal: &Principal, input: NewPartner) -> Result<Partner>;
    async fn get_partner(&self, id: Uuid) -> Result<Partner>;
    async fn approve_l1(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: L1ApproveCommand,
    ) -> Result<Partner>;
    async fn reject_l1(&self, principal: &Principal, id: Uuid, cmd: RejectCommand)
        -> Result<Partner>;
    async fn approve_l2(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: L2ApproveCommand,
    ) -> Result<Partner>;
    async fn reject_l2(&self, principal: &Principal, id: Uuid, cmd: RejectCommand)
        -> Result<Partner>;
    async fn put_on_hold(&self, principal: &Principal, id: Uuid, cmd: HoldCommand)
        -> Result<Partner>;
    async fn resume(&self, principal: &Principal, id: Uuid) -> Result<Partner>;
    async fn resubmit(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: ResubmitCommand,
    ) -> Result<Partner>;
    async fn reject_permanently(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: RejectCommand,
    ) -> Result<Partner>;
    async fn deactivate(&self, principal: &Principal, id: Uuid, cmd: RejectCommand)
        -> Result<Partner>;
    async fn assign_products(
        &self,
        principal: &Principal,
        id: Uuid,
        overrides: Vec<ProductOverride>,
    ) -> Result<Partner>;

    // Catalogue
    async fn create_product(&self, principal: &Principal, input: NewProduct) -> Result<Product>;
    async fn create_spiff(&self, principal: &Principal, input: NewSpiff) -> Result<SpiffView>;
    async fn get_spiff(&self, id: Uuid) -> Result<SpiffView>;

    // Fulfillment
    async fn create_assignment(
        &self,
        principal: &Principal,
        input: NewAssignment,
    ) -> Result<FulfillmentAssignment>;
    async fn set_assignment_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<FulfillmentAssignment>;
    async fn get_assignment(&self, id: Uuid) -> Result<AssignmentView>;
    async fn create_milestone(&self, principal: &Principal, input: NewMilestone)
        -> Result<Milestone>;

    // Sales & commissions
    async fn log_sale(&self, principal: &Principal, sale: NewSale) -> Result<SaleReceipt>;
    async fn get_sale(&self, id: Uuid) -> Result<SaleRecord>;
    async fn approve_commission(&self, principal: &Principal, transaction_id: Uuid)
        -> Result<SaleRecord>;
    async fn reject_commission(
        &self,
        principal: &Principal,
        transaction_id: Uuid,
        cmd: RejectCommand,
    ) -> Result<SaleRecord>;
    async fn bulk_approve_commissions(
        &self,
        principal: &Principal,
        transaction_ids: Vec<Uuid>,
    ) -> Result<BulkApproveResult>;
    async fn split_credit(
        &self,
        principal: &Principal,
        transaction_id: Uuid,
        shares: Vec<CreditShare>,
    ) -> Result<SaleRecord>;

    // Payouts
    async fn create_payout_batch(
        &self,
        principal: &Principal,
        req: NewPayoutBatch,
    ) -> Result<PayoutBatch>;
    async fn reconcile_payout(
        &self,
        principal: &Principal,
        batch_id: Uuid,
        req: ReconcileRequest,
    ) -> Result<PayoutBatch>;
    async fn get_payout_batch(&self, id: Uuid) -> Result<PayoutBatch>;
}

// ── ProgramServiceImpl ────────────────────────────────────────

pub struct ProgramServiceImpl {
    pub partners: Arc<dyn PartnerStore>,
    pub catalog: Arc<dyn CatalogStore>,
    pub fulfillment: Arc<dyn FulfillmentStore>,
    pub sales: Arc<dyn SaleStore>,
    pub payouts: Arc<dyn PayoutStore>,
    pub audit: Arc<dyn AuditSink>,
    pub exchange_rates: ExchangeRateTable,
}

impl ProgramServiceImpl {
    pub fn new(
        partners: Arc<dyn PartnerStore>,
        catalog: Arc<dyn CatalogStore>,
        fulfillment: Arc<dyn FulfillmentStore>,
        sales: Arc<dyn SaleStore>,
        payouts: Arc<dyn PayoutStore>,
    ) -> Self {
        Self {
            partners,
            catalog,
            fulfillment,
            sales,
            payouts,
            audit: Arc::new(TracingAuditSink),
            exchange_rates: ExchangeRateTable::default(),
        }
    }

    /// Wire every port to one backing store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PartnerStore + CatalogStore + FulfillmentStore + SaleStore + PayoutStore + 'static,
    {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store,
        )
    }

    /// Set the audit sink (builder pattern).
    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Set the currency table used for payouts (builder pattern).
    pub fn with_exchange_rates(mut self, rates: ExchangeRateTable) -> Self {
        self.exchange_rates = rates;
        self
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn require_partner(&self, id: Uuid) -> Result<Partner> {
        self.partners
            .load_partner(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("partner", id))
    }

    async fn require_product(&self, id: Uuid) -> Result<Product> {
        self.catalog
            .load_product(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("product", id))
    }

    async fn require_sale(&self, id: Uuid) -> Result<SaleRecord> {
        let tx = self
            .sales
            .load_sale(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("transaction", id))?;
        let lines = self.sales.load_lines(id).await?;
        Ok(SaleRecord::new(tx, lines))
    }

    /// Audit failures are logged, never surfaced: the mutation has already
    /// been committed by the time we get here.
    async fn audit<B: Serialize, A: Serialize>(
        &self,
        principal: &Principal,
        action: &str,
        resource_type: &'static str,
        resource_id: impl ToString,
        before: Option<&B>,
        after: Option<&A>,
    ) {
        let entry = AuditEntry {
            actor_id: principal.actor_id.clone(),
            action: action.to_string(),
            resource_type,
            resource_id: resource_id.to_string(),
            before: before.and_then(|b| serde_json::to_value(b).ok()),
            after: after.and_then(|a| serde_json::to_value(a).ok()),
            at: self.now(),
        };
        if let Err(e) = self.audit.record(&entry).await {
            tracing::warn!(error = %e, action, "failed to record audit entry");
        }
    }

    /// Load, transition, save with a version check. Two concurrent callers
    /// racing on the same partner cannot both succeed: the loser gets
    /// `Conflict` and nothing it computed is persisted.
    async fn transition<F>(
        &self,
        principal: &Principal,
        id: Uuid,
        action: &str,
        apply: F,
    ) -> Result<Partner>
    where
        F: FnOnce(&mut Partner, DateTime<Utc>) -> Result<()> + Send,
    {
        let before = self.require_partner(id).await?;
        let mut partner = before.clone();
        apply(&mut partner, self.now())?;
        partner.version = self.partners.save_partner(&partner).await?;
        self.audit(
            principal,
            action,
            "partner",
            id,
            Some(&before.status),
            Some(&partner.status),
        )
        .await;
        Ok(partner)
    }
}

#[async_trait]
impl ProgramService for ProgramServiceImpl {
    // ── Partner onboarding ────────────────────────────────────

    async fn self_register(&self, input: NewPartner) -> Result<Partner> {
        let user_id = Uuid::new_v4().to_string();
        let partner = workflow::self_register(input, &user_id, self.now())?;
        self.partners.insert_partner(&partner).await?;
        let registrant = Principal::in_process(user_id, vec![Role::Partner]);
        self.audit(
            &registrant,
            "self-register",
            "partner",
            partner.id,
            None::<&()>,
            Some(&partner.status),
        )
        .await;
        tracing::info!(partner_id = %partner.id, "partner self-registered");
        Ok(partner)
    }

    async fn create_partner(&self, principal: &Principal, input: NewPartner) -> Result<Partner> {
        let partner = workflow::create_partner(principal, input, self.now())?;
        self.partners.insert_partner(&partner).await?;
        self.audit(
            principal,
            "create",
            "partner",
            partner.id,
            None::<&()>,
            Some(&partner.status),
        )
        .await;
        tracing::info!(partner_id = %partner.id, "partner created");
        Ok(partner)
    }

    async fn get_partner(&self, id: Uuid) -> Result<Partner> {
        self.require_partner(id).await
    }

    async fn approve_l1(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: L1ApproveCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "l1-approve", |p, now| {
            workflow::approve_l1(p, principal, cmd, now)
        })
        .await
    }

    async fn reject_l1(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: RejectCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "l1-reject", |p, now| {
            workflow::reject_l1(p, principal, cmd, now)
        })
        .await
    }

    async fn approve_l2(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: L2ApproveCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "l2-approve", |p, now| {
            workflow::approve_l2(p, principal, cmd, now)
        })
        .await
    }

    async fn reject_l2(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: RejectCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "l2-reject", |p, now| {
            workflow::reject_l2(p, principal, cmd, now)
        })
        .await
    }

    async fn put_on_hold(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: HoldCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "hold", |p, now| {
            workflow::put_on_hold(p, principal, cmd, now)
        })
        .await
    }

    async fn resume(&self, principal: &Principal, id: Uuid) -> Result<Partner> {
        self.transition(principal, id, "resume", |p, now| {
            workflow::resume(p, principal, now)
        })
        .await
    }

    async fn resubmit(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: ResubmitCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "resubmit", |p, now| {
            workflow::resubmit(p, principal, cmd, now)
        })
        .await
    }

    async fn reject_permanently(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: RejectCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "reject-permanently", |p, now| {
            workflow::reject_permanently(p, principal, cmd, now)
        })
        .await
    }

    async fn deactivate(
        &self,
        principal: &Principal,
        id: Uuid,
        cmd: RejectCommand,
    ) -> Result<Partner> {
        self.transition(principal, id, "deactivate", |p, now| {
            workflow::deactivate(p, principal, cmd, now)
        })
        .await
    }

    async fn assign_products(
        &self,
        principal: &Principal,
        id: Uuid,
        overrides: Vec<ProductOverride>,
    ) -> Result<Partner> {
        principal.require_any(PROGRAM_MANAGERS, "assign products")?;
        let mut products = Vec::with_capacity(overrides.len());
        for o in &overrides {
            products.push(self.require_product(o.product_id).await?);
        }
        self.transition(principal, id, "assign-products", |p, now| {
            workflow::assign_products(p, principal, &overrides, &products, now)
        })
        .await
    }

    // ── Catalogue ─────────────────────────────────────────────

    async fn create_product(&self, principal: &Principal, input: NewProduct) -> Result<Product> {
        principal.require_any(CATALOG_ADMINS, "manage products")?;
        let product = input.into_product(self.now())?;
        self.catalog.insert_product(&product).await?;
        self.audit(
            principal,
            "create",
            "product",
            product.id,
            None::<&()>,
            Some(&product),
        )
        .await;
        Ok(product)
    }

    async fn create_spiff(&self, principal: &Principal, input: NewSpiff) -> Result<SpiffView> {
        principal.require_any(CATALOG_ADMINS, "manage spiffs")?;
        let now = self.now();
        let spiff = input.into_spiff(&principal.actor_id, now)?;
        for product_id in &spiff.target_products {
            self.require_product(*product_id).await?;
        }
        self.catalog.insert_spiff(&spiff).await?;
        self.audit(principal, "create", "spiff", spiff.id, None::<&()>, Some(&spiff))
            .await;
        tracing::info!(spiff_id = %spiff.id, "spiff created");
        Ok(SpiffView {
            effective_status: spiff.effective_status(now),
            spiff,
        })
    }

    async fn get_spiff(&self, id: Uuid) -> Result<SpiffView> {
        let spiff = self
            .catalog
            .load_spiff(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("spiff", id))?;
        Ok(SpiffView {
            effective_status: spiff.effective_status(self.now()),
            spiff,
        })
    }

    // ── Fulfillment ───────────────────────────────────────────

    async fn create_assignment(
        &self,
        principal: &Principal,
        input: NewAssignment,
    ) -> Result<FulfillmentAssignment> {
        principal.require_any(PROGRAM_MANAGERS, "create assignments")?;
        let partner = self.require_partner(input.partner_id).await?;
        if !partner.is_approved() {
            return Err(ProgramError::transition(
                "partner",
                partner.status,
                "create-assignment",
            ));
        }
        for product_id in &input.product_ids {
            self.require_product(*product_id).await?;
        }
        if let Some(spiff_id) = input.spiff_id {
            if self.catalog.load_spiff(spiff_id).await?.is_none() {
                return Err(ProgramError::not_found("spiff", spiff_id));
            }
        }
        let assignment = input.into_assignment(&principal.actor_id, self.now())?;
        self.fulfillment.insert_assignment(&assignment).await?;
        self.audit(
            principal,
            "create",
            "assignment",
            assignment.id,
            None::<&()>,
            Some(&assignment),
        )
        .await;
        Ok(assignment)
    }

    async fn set_assignment_status(
        &self,
        principal: &Principal,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<FulfillmentAssignment> {
        principal.require_any(PROGRAM_MANAGERS, "update assignments")?;
        let before = self
            .fulfillment
            .load_assignment(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("assignment", id))?;
        let after = self.fulfillment.set_assignment_status(id, status).await?;
        self.audit(
            principal,
            "set-status",
            "assignment",
            id,
            Some(&before.status),
            Some(&after.status),
        )
        .await;
        Ok(after)
    }

    async fn get_assignment(&self, id: Uuid) -> Result<AssignmentView> {
        let assignment = self
            .fulfillment
            .load_assignment(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("assignment", id))?;
        let milestones = self.fulfillment.progress_for_assignment(id).await?;
        Ok(AssignmentView {
            assignment,
            milestones,
        })
    }

    async fn create_milestone(
        &self,
        principal: &Principal,
        input: NewMilestone,
    ) -> Result<Milestone> {
        principal.require_any(PROGRAM_MANAGERS, "create milestones")?;
        let milestone = input.into_milestone(&principal.actor_id, self.now())?;
        self.fulfillment.insert_milestone(&milestone).await?;
        self.audit(
            principal,
            "create",
            "milestone",
            milestone.id,
            None::<&()>,
            Some(&milestone),
        )
        .await;
        Ok(milestone)
    }

    // ── Sales & commissions ───────────────────────────────────

    async fn log_sale(&self, principal: &Principal, sale: NewSale) -> Result<SaleReceipt> {
        let partner = self.require_partner(sale.partner_id).await?;
        let own_sale = principal.has_role(Role::Partner) && partner.is_owned_by(&principal.actor_id);
        if !own_sale {
            principal.require_any(SALES_LOGGERS, "log sales")?;
        }
        if !partner.is_approved() {
            return Err(ProgramError::transition(
                "partner",
                partner.status,
                "log-sale",
            ));
        }
        let product = self.require_product(sale.product_id).await?;
        let assignment = self
            .fulfillment
            .find_active_assignment(partner.id, product.id)
            .await?
            .ok_or_else(|| {
                ProgramError::validation(format!(
                    "no active assignment covers product {} for partner {}",
                    product.id, partner.id
                ))
            })?;

        let rate = tier_rates::resolve_rate(&product, partner.tier);
        let candidates = self.catalog.active_spiffs_for_product(product.id).await?;
        let breakdown = commission::calculate(sale.quantity, sale.unit_price, rate, |gross| {
            spiff::resolve_awards(
                &candidates,
                partner.id,
                partner.tier,
                product.id,
                sale.sale_date,
                sale.quantity,
                gross,
            )
        })?;

        let now = self.now();
        let tx = commission::build_transaction(
            sale,
            Some(assignment.id),
            breakdown,
            &principal.actor_id,
            now,
        );
        let line = commission::initial_line(&tx);
        let milestones = self.fulfillment.list_milestones().await?;
        let outcome = self.sales.record_sale(&tx, &line, &milestones, now).await?;

        tracing::info!(
            transaction_id = %tx.id,
            partner_id = %tx.partner_id,
            total_commission = %tx.total_commission,
            "sale logged"
        );
        self.audit(principal, "log-sale", "transaction", tx.id, None::<&()>, Some(&tx))
            .await;
        Ok(SaleReceipt {
            record: SaleRecord::new(tx, vec![line]),
            outcome,
        })
    }

    async fn get_sale(&self, id: Uuid) -> Result<SaleRecord> {
        self.require_sale(id).await
    }

    async fn approve_commission(
        &self,
        principal: &Principal,
        transaction_id: Uuid,
    ) -> Result<SaleRecord> {
        principal.require_any(COMMISSION_APPROVERS, "approve commissions")?;
        let record = self.require_sale(transaction_id).await?;
        let lines = self
            .sales
            .transition_commission(
                transaction_id,
                CommissionEvent::Approve,
                &principal.actor_id,
                None,
            )
            .await?;
        self.audit(
            principal,
            "approve",
            "commission",
            transaction_id,
            Some(&record.commission_status),
            Some(&CommissionStatus::Approved),
        )
        .await;
        Ok(SaleRecord::new(record.transaction, lines))
    }

    async fn reject_commission(
        &self,
        principal: &Principal,
        transaction_id: Uuid,
        cmd: RejectCommand,
    ) -> Result<SaleRecord> {
        principal.require_any(COMMISSION_APPROVERS, "reject commissions")?;
        let record = self.require_sale(transaction_id).await?;
        let reason = cmd
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ProgramError::validation("rejection reason is required"))?;
        let lines = self
            .sales
            .transition_commission(
                transaction_id,
                CommissionEvent::Reject,
                &principal.actor_id,
                Some(&reason),
            )
            .await?;
        self.audit(
            principal,
            "reject",
            "commission",
            transaction_id,
            Some(&record.commission_status),
            Some(&CommissionStatus::Rejected),
        )
        .await;
        Ok(SaleRecord::new(record.transaction, lines))
    }

    async fn bulk_approve_commissions(
        &self,
        principal: &Principal,
        transaction_ids: Vec<Uuid>,
    ) -> Result<BulkApproveResult> {
        principal.require_any(COMMISSION_APPROVERS, "approve commissions")?;
        let mut result = BulkApproveResult::default();
        for id in transaction_ids {
            match self
                .sales
                .transition_commission(id, CommissionEvent::Approve, &principal.actor_id, None)
                .await
            {
                Ok(_) => result.approved.push(id),
                Err(ProgramError::InvalidStateTransition { .. } | ProgramError::NotFound { .. }) => {
                    result.skipped.push(id)
                }
                Err(e) => return Err(e),
            }
        }
        tracing::info!(
            approved = result.approved.len(),
            skipped = result.skipped.len(),
            "bulk commission approval"
        );
        self.audit(
            principal,
            "bulk-approve",
            "commission",
            "bulk",
            None::<&()>,
            Some(&result),
        )
        .await;
        Ok(result)
    }

    async fn split_credit(
        &self,
        principal: &Principal,
        transaction_id: Uuid,
        shares: Vec<CreditShare>,
    ) -> Result<SaleRecord> {
        principal.require_any(CREDIT_SPLITTERS, "split commission credit")?;
        let before = self.require_sale(transaction_id).await?;
        let lines = commission::split_lines(&before.transaction, &shares, self.now())?;
        self.sales
            .replace_commission_lines(transaction_id, &lines)
            .await?;
        tracing::info!(
            transaction_id = %transaction_id,
            shares = lines.len(),
            "commission credit split"
        );
        self.audit(
            principal,
            "credit-split",
            "commission",
            transaction_id,
            Some(&before.lines),
            Some(&lines),
        )
        .await;
        Ok(SaleRecord::new(before.transaction, lines))
    }

    // ── Payouts ───────────────────────────────────────────────

    async fn create_payout_batch(
        &self,
        principal: &Principal,
        req: NewPayoutBatch,
    ) -> Result<PayoutBatch> {
        principal.require_any(PAYOUT_OPERATORS, "create payout batches")?;
        let draft = PayoutDraft::prepare(req, &self.exchange_rates, &principal.actor_id, self.now())?;
        let batch = self.payouts.settle_payout_batch(&draft).await?;
        tracing::info!(
            batch_id = %batch.id,
            lines = batch.line_ids.len(),
            net_payout = %batch.net_payout,
            currency = %batch.currency,
            "payout batch settled"
        );
        self.audit(
            principal,
            "create",
            "payout_batch",
            batch.id,
            None::<&()>,
            Some(&batch),
        )
        .await;
        Ok(batch)
    }

    async fn reconcile_payout(
        &self,
        principal: &Principal,
        batch_id: Uuid,
        req: ReconcileRequest,
    ) -> Result<PayoutBatch> {
        principal.require_any(PAYOUT_OPERATORS, "reconcile payouts")?;
        let mut batch = self.get_payout_batch(batch_id).await?;
        let before = batch.status;
        let status = batch.reconcile(req.actual_amount, &principal.actor_id, self.now());
        self.payouts.save_reconciliation(&batch).await?;
        tracing::info!(
            batch_id = %batch_id,
            status = status.as_str(),
            variance = ?batch.variance,
            "payout reconciled"
        );
        self.audit(
            principal,
            "reconcile",
            "payout_batch",
            batch_id,
            Some(&before),
            Some(&status),
        )
        .await;
        Ok(batch)
    }

    async fn get_payout_batch(&self, id: Uuid) -> Result<PayoutBatch> {
        self.payouts
            .load_payout_batch(id)
            .await?
            .ok_or_else(|| ProgramError::not_found("payout batch", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::recording::RecordingAuditSink;
    use crate::memory::MemoryStore;
    use crate::partner::{PartnerStatus, Tier};

    fn service() -> (ProgramServiceImpl, Arc<RecordingAuditSink>) {
        let audit = Arc::new(RecordingAuditSink::default());
        let svc = ProgramServiceImpl::from_store(Arc::new(MemoryStore::new()))
            .with_audit(audit.clone());
        (svc, audit)
    }

    fn manager() -> Principal {
        Principal::in_process("mgr-1", vec![Role::PartnerManager])
    }

    fn input() -> NewPartner {
        NewPartner {
            company_name: "Northwind".into(),
            contact_person_name: "Sam Lee".into(),
            contact_person_email: "sam@northwind.test".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn transitions_bump_version_and_audit() {
        let (svc, audit) = service();
        let p = svc.create_partner(&manager(), input()).await.unwrap();
        assert_eq!(p.version, 0);

        let l1 = Principal::in_process("l1", vec![Role::L1Approver]);
        let cmd = L1ApproveCommand {
            tier: Some(Tier::Gold),
            comments: None,
        };
        let p = svc.approve_l1(&l1, p.id, cmd).await.unwrap();
        assert_eq!(p.version, 1);
        assert_eq!(p.status, PartnerStatus::PendingL2);

        let entries = audit.entries.lock().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].action, "l1-approve");
    }

    #[tokio::test]
    async fn stale_save_is_conflict() {
        let (svc, _) = service();
        let p = svc.create_partner(&manager(), input()).await.unwrap();
        let mut stale = svc.get_partner(p.id).await.unwrap();

        let l1 = Principal::in_process("l1", vec![Role::L1Approver]);
        let cmd = L1ApproveCommand {
            tier: Some(Tier::Gold),
            comments: None,
        };
        svc.approve_l1(&l1, p.id, cmd.clone()).await.unwrap();

        workflow::approve_l1(&mut stale, &l1, cmd, Utc::now()).unwrap();
        let err = svc.partners.save_partner(&stale).await.unwrap_err();
        assert!(matches!(err, ProgramError::Conflict(_)));
    }

    #[tokio::test]
    async fn forbidden_leaves_no_audit_trail() {
        let (svc, audit) = service();
        let p = svc.create_partner(&manager(), input()).await.unwrap();
        let finance = Principal::in_process("fin", vec![Role::Finance]);
        let err = svc
            .reject_l1(
                &finance,
                p.id,
                RejectCommand {
                    reason: Some("no".into()),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 403);
        assert_eq!(audit.entries.lock().unwrap().len(), 1);
        assert_eq!(
            svc.get_partner(p.id).await.unwrap().status,
            PartnerStatus::PendingL1
        );
    }

    #[tokio::test]
    async fn unknown_partner_is_not_found() {
        let (svc, _) = service();
        let l1 = Principal::in_process("l1", vec![Role::L1Approver]);
        let err = svc
            .approve_l1(&l1, Uuid::new_v4(), L1ApproveCommand::default())
            .await
            .unwrap_err();
        assert_eq!(err.http_status(), 404);
    }
}
