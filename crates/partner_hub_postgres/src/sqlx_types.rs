//! Row structs with `sqlx::FromRow`, converted into the pure core types.
//!
//! Decimal columns arrive as TEXT and are parsed here; a value that does not
//! parse is a corrupted row and surfaces as `Internal`.

use std::collections::BTreeMap;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use partner_hub_core::assignment::{AssignmentStatus, FulfillmentAssignment};
use partner_hub_core::commission::{CommissionLine, CommissionStatus};
use partner_hub_core::error::ProgramError;
use partner_hub_core::milestone::{Milestone, MilestoneProgress, MilestoneStatus};
use partner_hub_core::partner::{Partner, Tier};
use partner_hub_core::payout::{PayoutBatch, PayoutStatus};
use partner_hub_core::sale::SaleTransaction;
use partner_hub_core::spiff::{Spiff, SpiffAward};
use partner_hub_core::tier_rates::{Product, RateSource};

type Result<T> = std::result::Result<T, ProgramError>;

pub(crate) fn dec(column: &str, raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| ProgramError::Internal(anyhow!("bad decimal in {column}: {raw:?}: {e}")))
}

fn opt_dec(column: &str, raw: Option<String>) -> Result<Option<Decimal>> {
    raw.map(|r| dec(column, &r)).transpose()
}

fn json<T: DeserializeOwned>(column: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| ProgramError::Internal(anyhow!("bad JSON in {column}: {e}")))
}

/// Serialise a value for a JSONB column.
pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ProgramError::Internal(anyhow!(e)))
}

// ── Partners & catalogue ──────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct PgPartnerRow {
    pub body: serde_json::Value,
    pub version: i64,
}

impl TryFrom<PgPartnerRow> for Partner {
    type Error = ProgramError;

    fn try_from(row: PgPartnerRow) -> Result<Self> {
        let mut partner: Partner = json("partners.body", row.body)?;
        // The column is authoritative.
        partner.version = row.version;
        Ok(partner)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgProductRow {
    pub id: Uuid,
    pub name: String,
    pub base_commission_rate: String,
    pub tier_commissions: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgProductRow> for Product {
    type Error = ProgramError;

    fn try_from(row: PgProductRow) -> Result<Self> {
        let tier_commissions: BTreeMap<Tier, Decimal> =
            json("products.tier_commissions", row.tier_commissions)?;
        Ok(Product {
            id: row.id,
            name: row.name,
            base_commission_rate: dec("base_commission_rate", &row.base_commission_rate)?,
            tier_commissions,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgBodyRow {
    pub body: serde_json::Value,
}

impl TryFrom<PgBodyRow> for Spiff {
    type Error = ProgramError;

    fn try_from(row: PgBodyRow) -> Result<Self> {
        json("spiffs.body", row.body)
    }
}

impl TryFrom<PgBodyRow> for Milestone {
    type Error = ProgramError;

    fn try_from(row: PgBodyRow) -> Result<Self> {
        json("milestones.body", row.body)
    }
}

// ── Fulfillment ───────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct PgAssignmentRow {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub product_ids: Vec<Uuid>,
    pub spiff_id: Option<Uuid>,
    pub target_quantity: Option<String>,
    pub target_revenue: Option<String>,
    pub actual_quantity: String,
    pub actual_revenue: String,
    pub completion_percentage: String,
    pub status: String,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgAssignmentRow> for FulfillmentAssignment {
    type Error = ProgramError;

    fn try_from(row: PgAssignmentRow) -> Result<Self> {
        Ok(FulfillmentAssignment {
            id: row.id,
            partner_id: row.partner_id,
            product_ids: row.product_ids.into_iter().collect(),
            spiff_id: row.spiff_id,
            target_quantity: opt_dec("target_quantity", row.target_quantity)?,
            target_revenue: opt_dec("target_revenue", row.target_revenue)?,
            actual_quantity: dec("actual_quantity", &row.actual_quantity)?,
            actual_revenue: dec("actual_revenue", &row.actual_revenue)?,
            completion_percentage: dec("completion_percentage", &row.completion_percentage)?,
            status: AssignmentStatus::try_from(row.status)?,
            start_date: row.start_date,
            end_date: row.end_date,
            notes: row.notes,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgProgressRow {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub milestone_id: Uuid,
    pub assignment_id: Uuid,
    pub current_value: String,
    pub percentage_complete: String,
    pub status: String,
    pub achieved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<PgProgressRow> for MilestoneProgress {
    type Error = ProgramError;

    fn try_from(row: PgProgressRow) -> Result<Self> {
        Ok(MilestoneProgress {
            id: row.id,
            partner_id: row.partner_id,
            milestone_id: row.milestone_id,
            assignment_id: row.assignment_id,
            current_value: dec("current_value", &row.current_value)?,
            percentage_complete: dec("percentage_complete", &row.percentage_complete)?,
            status: MilestoneStatus::try_from(row.status)?,
            achieved_at: row.achieved_at,
            updated_at: row.updated_at,
        })
    }
}

// ── Sales & commission lines ──────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct PgSaleRow {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub product_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub quantity: i32,
    pub unit_price: String,
    pub total_amount: String,
    pub commission_rate: String,
    pub rate_source: String,
    pub commission_amount: String,
    pub spiff_bonus: String,
    pub total_commission: String,
    pub spiff_awards: serde_json::Value,
    pub sale_date: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub logged_by: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgSaleRow> for SaleTransaction {
    type Error = ProgramError;

    fn try_from(row: PgSaleRow) -> Result<Self> {
        let quantity = u32::try_from(row.quantity)
            .map_err(|_| ProgramError::Internal(anyhow!("negative quantity on sale {}", row.id)))?;
        let rate_source = RateSource::parse(&row.rate_source).ok_or_else(|| {
            ProgramError::Internal(anyhow!("unknown rate source: {}", row.rate_source))
        })?;
        let spiff_awards: Vec<SpiffAward> = json("sales.spiff_awards", row.spiff_awards)?;
        Ok(SaleTransaction {
            id: row.id,
            partner_id: row.partner_id,
            product_id: row.product_id,
            assignment_id: row.assignment_id,
            quantity,
            unit_price: dec("unit_price", &row.unit_price)?,
            total_amount: dec("total_amount", &row.total_amount)?,
            commission_rate: dec("commission_rate", &row.commission_rate)?,
            rate_source,
            commission_amount: dec("commission_amount", &row.commission_amount)?,
            spiff_bonus: dec("spiff_bonus", &row.spiff_bonus)?,
            total_commission: dec("total_commission", &row.total_commission)?,
            spiff_awards,
            sale_date: row.sale_date,
            customer_name: row.customer_name,
            logged_by: row.logged_by,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct PgLineRow {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub beneficiary_id: String,
    pub role: String,
    pub credit_percent: String,
    pub commission_amount: String,
    pub spiff_bonus: String,
    pub total_commission: String,
    pub status: String,
    pub decided_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub payout_batch_id: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub sale_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgLineRow> for CommissionLine {
    type Error = ProgramError;

    fn try_from(row: PgLineRow) -> Result<Self> {
        Ok(CommissionLine {
            id: row.id,
            transaction_id: row.transaction_id,
            beneficiary_id: row.beneficiary_id,
            role: row.role,
            credit_percent: dec("credit_percent", &row.credit_percent)?,
            commission_amount: dec("commission_amount", &row.commission_amount)?,
            spiff_bonus: dec("spiff_bonus", &row.spiff_bonus)?,
            total_commission: dec("total_commission", &row.total_commission)?,
            status: CommissionStatus::try_from(row.status)?,
            decided_by: row.decided_by,
            rejection_reason: row.rejection_reason,
            payout_batch_id: row.payout_batch_id,
            paid_at: row.paid_at,
            sale_date: row.sale_date,
            created_at: row.created_at,
        })
    }
}

// ── Payouts ───────────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct PgPayoutRow {
    pub id: Uuid,
    pub beneficiary_ids: Vec<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub line_ids: Vec<Uuid>,
    pub total_amount: String,
    pub adjustments: String,
    pub deductions: String,
    pub currency: String,
    pub exchange_rate: String,
    pub net_payout: String,
    pub status: String,
    pub actual_amount: Option<String>,
    pub variance: Option<String>,
    pub reconciled_by: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<PgPayoutRow> for PayoutBatch {
    type Error = ProgramError;

    fn try_from(row: PgPayoutRow) -> Result<Self> {
        Ok(PayoutBatch {
            id: row.id,
            beneficiary_ids: row.beneficiary_ids,
            period_start: row.period_start,
            period_end: row.period_end,
            line_ids: row.line_ids,
            total_amount: dec("total_amount", &row.total_amount)?,
            adjustments: dec("adjustments", &row.adjustments)?,
            deductions: dec("deductions", &row.deductions)?,
            currency: row.currency,
            exchange_rate: dec("exchange_rate", &row.exchange_rate)?,
            net_payout: dec("net_payout", &row.net_payout)?,
            status: PayoutStatus::try_from(row.status)?,
            actual_amount: opt_dec("actual_amount", row.actual_amount)?,
            variance: opt_dec("variance", row.variance)?,
            reconciled_by: row.reconciled_by,
            reconciled_at: row.reconciled_at,
            created_by: row.created_by,
            created_at: row.created_at,
        })
    }
}
