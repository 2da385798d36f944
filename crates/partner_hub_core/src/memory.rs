//! In-memory implementation of every store port.
//!
//! One mutex guards all state, so each port call is trivially atomic. Used by
//! tests and by the server when no database is configured.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::assignment::{AssignmentStatus, FulfillmentAssignment};
use crate::commission::{transition_lines, CommissionEvent, CommissionLine, CommissionStatus};
use crate::error::ProgramError;
use crate::milestone::{self, Milestone, MilestoneProgress};
use crate::partner::Partner;
use crate::payout::{PayoutBatch, PayoutDraft};
use crate::ports::{
    CatalogStore, FulfillmentStore, PartnerStore, PayoutStore, Result, SaleOutcome, SaleStore,
};
use crate::sale::SaleTransaction;
use crate::spiff::{Spiff, SpiffStatus};
use crate::tier_rates::Product;

#[derive(Default)]
struct State {
    partners: HashMap<Uuid, Partner>,
    products: HashMap<Uuid, Product>,
    spiffs: HashMap<Uuid, Spiff>,
    assignments: HashMap<Uuid, FulfillmentAssignment>,
    milestones: Vec<Milestone>,
    /// Keyed by (milestone, assignment); the partner is implied by the assignment.
    progress: HashMap<(Uuid, Uuid), MilestoneProgress>,
    sales: HashMap<Uuid, SaleTransaction>,
    lines: HashMap<Uuid, Vec<CommissionLine>>,
    payouts: HashMap<Uuid, PayoutBatch>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

// ── PartnerStore ──────────────────────────────────────────────

#[async_trait]
impl PartnerStore for MemoryStore {
    async fn insert_partner(&self, partner: &Partner) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.partners.contains_key(&partner.id) {
            return Err(ProgramError::Conflict(format!(
                "partner {} already exists",
                partner.id
            )));
        }
        state.partners.insert(partner.id, partner.clone());
        Ok(())
    }

    async fn load_partner(&self, id: Uuid) -> Result<Option<Partner>> {
        Ok(self.state.lock().await.partners.get(&id).cloned())
    }

    async fn save_partner(&self, partner: &Partner) -> Result<i64> {
        let mut state = self.state.lock().await;
        let stored = state
            .partners
            .get_mut(&partner.id)
            .ok_or_else(|| ProgramError::not_found("partner", partner.id))?;
        if stored.version != partner.version {
            return Err(ProgramError::Conflict(format!(
                "partner {} was modified concurrently",
                partner.id
            )));
        }
        let mut next = partner.clone();
        next.version += 1;
        let version = next.version;
        *stored = next;
        Ok(version)
    }
}

// ── CatalogStore ──────────────────────────────────────────────

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn insert_product(&self, product: &Product) -> Result<()> {
        self.state
            .lock()
            .await
            .products
            .insert(product.id, product.clone());
        Ok(())
    }

    async fn load_product(&self, id: Uuid) -> Result<Option<Product>> {
        Ok(self.state.lock().await.products.get(&id).cloned())
    }

    async fn insert_spiff(&self, spiff: &Spiff) -> Result<()> {
        self.state
            .lock()
            .await
            .spiffs
            .insert(spiff.id, spiff.clone());
        Ok(())
    }

    async fn load_spiff(&self, id: Uuid) -> Result<Option<Spiff>> {
        Ok(self.state.lock().await.spiffs.get(&id).cloned())
    }

    async fn active_spiffs_for_product(&self, product_id: Uuid) -> Result<Vec<Spiff>> {
        let state = self.state.lock().await;
        let mut spiffs: Vec<Spiff> = state
            .spiffs
            .values()
            .filter(|s| s.status == SpiffStatus::Active && s.target_products.contains(&product_id))
            .cloned()
            .collect();
        spiffs.sort_by_key(|s| s.created_at);
        Ok(spiffs)
    }
}

// ── FulfillmentStore ──────────────────────────────────────────

#[async_trait]
impl FulfillmentStore for MemoryStore {
    async fn insert_assignment(&self, assignment: &FulfillmentAssignment) -> Result<()> {
        self.state
            .lock()
            .await
            .assignments
            .insert(assignment.id, assignment.clone());
        Ok(())
    }

    async fn load_assignment(&self, id: Uuid) -> Result<Option<FulfillmentAssignment>> {
        Ok(self.state.lock().await.assignments.get(&id).cloned())
    }

    async fn set_assignment_status(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<FulfillmentAssignment> {
        let mut state = self.state.lock().await;
        let assignment = state
            .assignments
            .get_mut(&id)
            .ok_or_else(|| ProgramError::not_found("assignment", id))?;
        assignment.status = status;
        assignment.updated_at = Utc::now();
        Ok(assignment.clone())
    }

    async fn find_active_assignment(
        &self,
        partner_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<FulfillmentAssignment>> {
        let state = self.state.lock().await;
        Ok(state
            .assignments
            .values()
            .filter(|a| a.partner_id == partner_id && a.covers(product_id))
            .min_by_key(|a| a.created_at)
            .cloned())
    }

    async fn insert_milestone(&self, milestone: &Milestone) -> Result<()> {
        self.state.lock().await.milestones.push(milestone.clone());
        Ok(())
    }

    async fn list_milestones(&self) -> Result<Vec<Milestone>> {
        Ok(self.state.lock().await.milestones.clone())
    }

    async fn progress_for_assignment(&self, assignment_id: Uuid) -> Result<Vec<MilestoneProgress>> {
        let state = self.state.lock().await;
        let mut rows: Vec<MilestoneProgress> = state
            .progress
            .values()
            .filter(|p| p.assignment_id == assignment_id)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.milestone_id);
        Ok(rows)
    }
}

// ── SaleStore ─────────────────────────────────────────────────

#[async_trait]
impl SaleStore for MemoryStore {
    async fn record_sale(
        &self,
        tx: &SaleTransaction,
        line: &CommissionLine,
        milestones: &[Milestone],
        now: DateTime<Utc>,
    ) -> Result<SaleOutcome> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.sales.contains_key(&tx.id) {
            return Err(ProgramError::Conflict(format!(
                "transaction {} already recorded",
                tx.id
            )));
        }

        // Validate everything before the first write so a failure leaves no trace.
        let assignment = match tx.assignment_id {
            Some(id) => {
                let mut a = state
                    .assignments
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| ProgramError::not_found("assignment", id))?;
                if a.status != AssignmentStatus::Active {
                    return Err(ProgramError::validation(format!(
                        "assignment {id} is no longer active"
                    )));
                }
                a.apply_sale(tx.quantity, tx.total_amount, now);
                Some(a)
            }
            None => None,
        };

        let mut evaluated = Vec::new();
        if let Some(a) = &assignment {
            for m in milestones {
                let existing = state.progress.get(&(m.id, a.id));
                evaluated.push(milestone::evaluate(m, a, existing, now));
            }
            state.assignments.insert(a.id, a.clone());
        }
        for p in &evaluated {
            state
                .progress
                .insert((p.milestone_id, p.assignment_id), p.clone());
        }
        state.sales.insert(tx.id, tx.clone());
        state.lines.insert(tx.id, vec![line.clone()]);

        Ok(SaleOutcome {
            assignment,
            milestones: evaluated,
        })
    }

    async fn load_sale(&self, id: Uuid) -> Result<Option<SaleTransaction>> {
        Ok(self.state.lock().await.sales.get(&id).cloned())
    }

    async fn load_lines(&self, transaction_id: Uuid) -> Result<Vec<CommissionLine>> {
        Ok(self
            .state
            .lock()
            .await
            .lines
            .get(&transaction_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition_commission(
        &self,
        transaction_id: Uuid,
        event: CommissionEvent,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Vec<CommissionLine>> {
        let mut state = self.state.lock().await;
        let lines = state
            .lines
            .get_mut(&transaction_id)
            .ok_or_else(|| ProgramError::not_found("transaction", transaction_id))?;
        let mut next = lines.clone();
        transition_lines(&mut next, event, actor, reason)?;
        *lines = next.clone();
        Ok(next)
    }

    async fn replace_commission_lines(
        &self,
        transaction_id: Uuid,
        lines: &[CommissionLine],
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let current = state
            .lines
            .get_mut(&transaction_id)
            .ok_or_else(|| ProgramError::not_found("transaction", transaction_id))?;
        if let Some(settled) = current
            .iter()
            .find(|l| l.status != CommissionStatus::Pending)
        {
            return Err(ProgramError::transition(
                "commission",
                settled.status,
                "credit-split",
            ));
        }
        *current = lines.to_vec();
        Ok(())
    }
}

// ── PayoutStore ───────────────────────────────────────────────

#[async_trait]
impl PayoutStore for MemoryStore {
    async fn settle_payout_batch(&self, draft: &PayoutDraft) -> Result<PayoutBatch> {
        let mut state = self.state.lock().await;
        let mut selected: Vec<CommissionLine> = state
            .lines
            .values()
            .flatten()
            .filter(|l| draft.selection.selects(l))
            .cloned()
            .collect();
        selected.sort_by_key(|l| (l.sale_date, l.id));
        let batch = draft.finalize(&selected)?;

        for line in state.lines.values_mut().flatten() {
            if batch.line_ids.contains(&line.id) {
                line.status = CommissionStatus::Paid;
                line.payout_batch_id = Some(batch.id);
                line.paid_at = Some(draft.created_at);
            }
        }
        state.payouts.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn load_payout_batch(&self, id: Uuid) -> Result<Option<PayoutBatch>> {
        Ok(self.state.lock().await.payouts.get(&id).cloned())
    }

    async fn save_reconciliation(&self, batch: &PayoutBatch) -> Result<()> {
        let mut state = self.state.lock().await;
        let stored = state
            .payouts
            .get_mut(&batch.id)
            .ok_or_else(|| ProgramError::not_found("payout batch", batch.id))?;
        stored.status = batch.status;
        stored.actual_amount = batch.actual_amount;
        stored.variance = batch.variance;
        stored.reconciled_by = batch.reconciled_by.clone();
        stored.reconciled_at = batch.reconciled_at;
        Ok(())
    }
}
