//! Port traits the program service runs against.
//!
//! Every multi-row unit of work the invariants depend on is a single port
//! call, so an adapter can wrap it in one transaction (Postgres) or one lock
//! scope (memory). The service never stitches those units together itself.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::assignment::{AssignmentStatus, FulfillmentAssignment};
use crate::commission::{CommissionEvent, CommissionLine};
use crate::error::ProgramError;
use crate::milestone::{Milestone, MilestoneProgress};
use crate::partner::Partner;
use crate::payout::{PayoutBatch, PayoutDraft};
use crate::sale::SaleTransaction;
use crate::spiff::Spiff;
use crate::tier_rates::Product;

pub type Result<T> = std::result::Result<T, ProgramError>;

// ── Partners ──────────────────────────────────────────────────

#[async_trait]
pub trait PartnerStore: Send + Sync {
    async fn insert_partner(&self, partner: &Partner) -> Result<()>;
    async fn load_partner(&self, id: Uuid) -> Result<Option<Partner>>;

    /// Persist `partner` only if the stored version still equals
    /// `partner.version`. Returns the new version, or `Conflict` when another
    /// writer got there first.
    async fn save_partner(&self, partner: &Partner) -> Result<i64>;
}

// ── Catalogue ─────────────────────────────────────────────────

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn insert_product(&self, product: &Product) -> Result<()>;
    async fn load_product(&self, id: Uuid) -> Result<Option<Product>>;
    async fn insert_spiff(&self, spiff: &Spiff) -> Result<()>;
    async fn load_spiff(&self, id: Uuid) -> Result<Option<Spiff>>;

    /// Active spiffs whose target products include `product_id`.
    async fn active_spiffs_for_product(&self, product_id: Uuid) -> Result<Vec<Spiff>>;
}

// ── Fulfillment ───────────────────────────────────────────────

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    async fn insert_assignment(&self, assignment: &FulfillmentAssignment) -> Result<()>;
    async fn load_assignment(&self, id: Uuid) -> Result<Option<FulfillmentAssignment>>;
    async fn set_assignment_status(
        &self,
        id: Uuid,
        status: AssignmentStatus,
    ) -> Result<FulfillmentAssignment>;

    /// Oldest active assignment of `partner_id` whose product set includes
    /// `product_id`.
    async fn find_active_assignment(
        &self,
        partner_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<FulfillmentAssignment>>;

    async fn insert_milestone(&self, milestone: &Milestone) -> Result<()>;
    async fn list_milestones(&self) -> Result<Vec<Milestone>>;
    async fn progress_for_assignment(&self, assignment_id: Uuid) -> Result<Vec<MilestoneProgress>>;
}

// ── Sales & commissions ───────────────────────────────────────

/// Aggregates as they stand right after a sale was recorded.
#[derive(Debug, Clone, Serialize)]
pub struct SaleOutcome {
    pub assignment: Option<FulfillmentAssignment>,
    pub milestones: Vec<MilestoneProgress>,
}

#[async_trait]
pub trait SaleStore: Send + Sync {
    /// One unit: insert the transaction and its first commission line, add
    /// the sale to the assignment aggregates with an atomic increment, and
    /// re-evaluate `milestones` against the new aggregates.
    async fn record_sale(
        &self,
        tx: &SaleTransaction,
        line: &CommissionLine,
        milestones: &[Milestone],
        now: DateTime<Utc>,
    ) -> Result<SaleOutcome>;

    async fn load_sale(&self, id: Uuid) -> Result<Option<SaleTransaction>>;
    async fn load_lines(&self, transaction_id: Uuid) -> Result<Vec<CommissionLine>>;

    /// Apply `event` to every line of the transaction, all or nothing.
    async fn transition_commission(
        &self,
        transaction_id: Uuid,
        event: CommissionEvent,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Vec<CommissionLine>>;

    /// Swap the transaction's lines for `lines` in one step. Fails with a
    /// state conflict if any existing line has left `pending`. Readers see
    /// either the old set or the new one.
    async fn replace_commission_lines(
        &self,
        transaction_id: Uuid,
        lines: &[CommissionLine],
    ) -> Result<()>;
}

// ── Payouts ───────────────────────────────────────────────────

#[async_trait]
pub trait PayoutStore: Send + Sync {
    /// Select the lines matching `draft.selection`, close the batch over them
    /// via [`PayoutDraft::finalize`], mark them paid and insert the batch.
    async fn settle_payout_batch(&self, draft: &PayoutDraft) -> Result<PayoutBatch>;
    async fn load_payout_batch(&self, id: Uuid) -> Result<Option<PayoutBatch>>;
    async fn save_reconciliation(&self, batch: &PayoutBatch) -> Result<()>;
}

// ── Audit ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub actor_id: String,
    pub action: String,
    pub resource_type: &'static str,
    pub resource_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

/// Where audit records go. Persistence lives outside this crate.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &AuditEntry) -> Result<()>;
}
