use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commission::{CommissionLine, CommissionStatus};
use crate::spiff::SpiffAward;
use crate::tier_rates::RateSource;

/// Sale as submitted by a partner or manager.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewSale {
    pub partner_id: Uuid,
    pub product_id: Uuid,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub sale_date: DateTime<Utc>,
    pub customer_name: Option<String>,
}

/// A priced sale. Amounts are written once and never mutated; a correction
/// is a new transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaleTransaction {
    pub id: Uuid,
    pub partner_id: Uuid,
    pub product_id: Uuid,
    pub assignment_id: Option<Uuid>,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub total_amount: Decimal,
    pub commission_rate: Decimal,
    pub rate_source: RateSource,
    pub commission_amount: Decimal,
    pub spiff_bonus: Decimal,
    pub total_commission: Decimal,
    pub spiff_awards: Vec<SpiffAward>,
    pub sale_date: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub logged_by: String,
    pub created_at: DateTime<Utc>,
}

/// A transaction with its current commission rows.
#[derive(Debug, Clone, Serialize)]
pub struct SaleRecord {
    pub transaction: SaleTransaction,
    pub lines: Vec<CommissionLine>,
    pub commission_status: CommissionStatus,
}

impl SaleRecord {
    pub fn new(transaction: SaleTransaction, lines: Vec<CommissionLine>) -> Self {
        let commission_status = CommissionStatus::summarize(lines.iter().map(|l| l.status));
        Self {
            transaction,
            lines,
            commission_status,
        }
    }
}
