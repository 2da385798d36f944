//! Commission calculation, commission-line lifecycle and credit splits.
//!
//! Amounts stay unrounded through every multiplication and are rounded
//! half-up to the currency minor unit only when a persisted value is
//! produced. `total_commission` is always the sum of the two rounded parts,
//! so the stored row satisfies `total = base + bonus` exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProgramError;
use crate::money::{checked_product, checked_sum, percent_of, round_currency};
use crate::sale::{NewSale, SaleTransaction};
use crate::spiff::SpiffAward;
use crate::tier_rates::ResolvedRate;

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionEvent {
    Approve,
    Reject,
    Pay,
}

impl CommissionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
            Self::Pay => "pay",
        }
    }
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Paid => "paid",
        }
    }

    /// `pending → approved → paid`, or `pending → rejected`. Nothing else.
    pub fn next(self, event: CommissionEvent) -> Option<Self> {
        match (self, event) {
            (Self::Pending, CommissionEvent::Approve) => Some(Self::Approved),
            (Self::Pending, CommissionEvent::Reject) => Some(Self::Rejected),
            (Self::Approved, CommissionEvent::Pay) => Some(Self::Paid),
            _ => None,
        }
    }

    /// Roll a transaction's line statuses into one. A transaction reads as
    /// `paid` only when every line is paid; otherwise the least advanced
    /// non-rejected status wins.
    pub fn summarize(statuses: impl IntoIterator<Item = Self>) -> Self {
        let mut any = false;
        let mut all_rejected = true;
        let mut lowest = Self::Paid;
        for s in statuses {
            any = true;
            if s == Self::Rejected {
                continue;
            }
            all_rejected = false;
            lowest = match (lowest, s) {
                (_, Self::Pending) | (Self::Pending, _) => Self::Pending,
                (_, Self::Approved) | (Self::Approved, _) => Self::Approved,
                _ => Self::Paid,
            };
        }
        match (any, all_rejected) {
            (false, _) => Self::Pending,
            (true, true) => Self::Rejected,
            (true, false) => lowest,
        }
    }
}

impl std::fmt::Display for CommissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for CommissionStatus {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "paid" => Ok(Self::Paid),
            other => Err(ProgramError::validation(format!(
                "unknown commission status: {other}"
            ))),
        }
    }
}

// ── Calculation ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommissionBreakdown {
    pub total_amount: Decimal,
    pub rate: ResolvedRate,
    pub commission_amount: Decimal,
    pub spiff_bonus: Decimal,
    pub total_commission: Decimal,
    pub awards: Vec<SpiffAward>,
}

/// Price a sale: `total = unit_price × quantity`, base commission at `rate`,
/// plus every stacked spiff award. `awards_for` receives the unrounded gross.
pub fn calculate<F>(
    quantity: u32,
    unit_price: Decimal,
    rate: ResolvedRate,
    awards_for: F,
) -> Result<CommissionBreakdown, ProgramError>
where
    F: FnOnce(Decimal) -> Result<Vec<SpiffAward>, ProgramError>,
{
    if quantity == 0 {
        return Err(ProgramError::validation("quantity must be greater than 0"));
    }
    if unit_price < Decimal::ZERO {
        return Err(ProgramError::validation("unit_price cannot be negative"));
    }

    let gross = checked_product(unit_price, Decimal::from(quantity))?;
    let base = percent_of(gross, rate.percent)?;
    let awards = awards_for(gross)?;
    let bonus = awards
        .iter()
        .try_fold(Decimal::ZERO, |acc, a| checked_sum(acc, a.bonus))?;

    let commission_amount = round_currency(base);
    let spiff_bonus = round_currency(bonus);
    let breakdown = CommissionBreakdown {
        total_amount: round_currency(gross),
        rate,
        commission_amount,
        spiff_bonus,
        total_commission: checked_sum(commission_amount, spiff_bonus)?,
        awards,
    };
    tracing::debug!(
        total_amount = %breakdown.total_amount,
        rate = %rate.percent,
        commission = %breakdown.commission_amount,
        bonus = %breakdown.spiff_bonus,
        "commission calculated"
    );
    Ok(breakdown)
}

/// Materialise an immutable transaction from a priced sale.
pub fn build_transaction(
    sale: NewSale,
    assignment_id: Option<Uuid>,
    breakdown: CommissionBreakdown,
    logged_by: &str,
    now: DateTime<Utc>,
) -> SaleTransaction {
    SaleTransaction {
        id: Uuid::new_v4(),
        partner_id: sale.partner_id,
        product_id: sale.product_id,
        assignment_id,
        quantity: sale.quantity,
        unit_price: sale.unit_price,
        total_amount: breakdown.total_amount,
        commission_rate: breakdown.rate.percent,
        rate_source: breakdown.rate.source,
        commission_amount: breakdown.commission_amount,
        spiff_bonus: breakdown.spiff_bonus,
        total_commission: breakdown.total_commission,
        spiff_awards: breakdown.awards,
        sale_date: sale.sale_date,
        customer_name: sale.customer_name,
        logged_by: logged_by.to_string(),
        created_at: now,
    }
}

// ── Commission lines ───────────────────────────────────────────

/// One payable share of a transaction's commission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommissionLine {
    pub id: Uuid,
    pub transaction_id: Uuid,
    /// Partner id for the default line, user id for split shares.
    pub beneficiary_id: String,
    pub role: String,
    pub credit_percent: Decimal,
    pub commission_amount: Decimal,
    pub spiff_bonus: Decimal,
    pub total_commission: Decimal,
    pub status: CommissionStatus,
    pub decided_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub payout_batch_id: Option<Uuid>,
    pub paid_at: Option<DateTime<Utc>>,
    pub sale_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

pub const DEFAULT_LINE_ROLE: &str = "partner";

/// The single full-credit line every new transaction starts with.
pub fn initial_line(tx: &SaleTransaction) -> CommissionLine {
    CommissionLine {
        id: Uuid::new_v4(),
        transaction_id: tx.id,
        beneficiary_id: tx.partner_id.to_string(),
        role: DEFAULT_LINE_ROLE.to_string(),
        credit_percent: Decimal::ONE_HUNDRED,
        commission_amount: tx.commission_amount,
        spiff_bonus: tx.spiff_bonus,
        total_commission: tx.total_commission,
        status: CommissionStatus::Pending,
        decided_by: None,
        rejection_reason: None,
        payout_batch_id: None,
        paid_at: None,
        sale_date: tx.sale_date,
        created_at: tx.created_at,
    }
}

/// Apply `event` to every line or to none of them.
pub fn transition_lines(
    lines: &mut [CommissionLine],
    event: CommissionEvent,
    actor: &str,
    reason: Option<&str>,
) -> Result<(), ProgramError> {
    if lines.is_empty() {
        return Err(ProgramError::validation(
            "transaction has no commission lines",
        ));
    }
    let mut targets = Vec::with_capacity(lines.len());
    for line in lines.iter() {
        let to = line.status.next(event).ok_or_else(|| {
            ProgramError::transition("commission", line.status, event.as_str())
        })?;
        targets.push(to);
    }
    for (line, to) in lines.iter_mut().zip(targets) {
        line.status = to;
        line.decided_by = Some(actor.to_string());
        if event == CommissionEvent::Reject {
            line.rejection_reason = reason.map(str::to_string);
        }
    }
    Ok(())
}

// ── Credit split ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CreditShare {
    pub user_id: String,
    pub credit_percent: Decimal,
    pub role: String,
}

/// Shares must be non-empty, individually positive and sum to exactly 100.
pub fn validate_split(shares: &[CreditShare]) -> Result<(), ProgramError> {
    if shares.is_empty() {
        return Err(ProgramError::validation(
            "at least one credit assignment is required",
        ));
    }
    for s in shares {
        if s.user_id.trim().is_empty() {
            return Err(ProgramError::validation("credit user_id is required"));
        }
        if s.credit_percent <= Decimal::ZERO || s.credit_percent > Decimal::ONE_HUNDRED {
            return Err(ProgramError::validation(format!(
                "credit_percent for {} must be in (0, 100]",
                s.user_id
            )));
        }
    }
    let total: Decimal = shares.iter().map(|s| s.credit_percent).sum();
    if total != Decimal::ONE_HUNDRED {
        return Err(ProgramError::validation(format!(
            "credit percentages must total 100, got {total}"
        )));
    }
    Ok(())
}

/// Regenerate the lines of `tx` for a new split. The result replaces, never
/// extends, whatever lines the transaction had before.
pub fn split_lines(
    tx: &SaleTransaction,
    shares: &[CreditShare],
    now: DateTime<Utc>,
) -> Result<Vec<CommissionLine>, ProgramError> {
    validate_split(shares)?;
    shares
        .iter()
        .map(|s| {
            let commission_amount = round_currency(percent_of(tx.commission_amount, s.credit_percent)?);
            let spiff_bonus = round_currency(percent_of(tx.spiff_bonus, s.credit_percent)?);
            Ok(CommissionLine {
                id: Uuid::new_v4(),
                transaction_id: tx.id,
                beneficiary_id: s.user_id.trim().to_string(),
                role: s.role.clone(),
                credit_percent: s.credit_percent,
                commission_amount,
                spiff_bonus,
                total_commission: commission_amount + spiff_bonus,
                status: CommissionStatus::Pending,
                decided_by: None,
                rejection_reason: None,
                payout_batch_id: None,
                paid_at: None,
                sale_date: tx.sale_date,
                created_at: now,
            })
        })
        .collect()
}
