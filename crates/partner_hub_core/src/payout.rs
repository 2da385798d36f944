//! Payout batches, currency conversion and reconciliation.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commission::{CommissionLine, CommissionStatus};
use crate::error::ProgramError;
use crate::money::{checked_product, checked_sum, round_currency};

// ── Exchange rates ─────────────────────────────────────────────

/// USD-based conversion factors keyed by ISO currency code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExchangeRateTable {
    rates: BTreeMap<String, Decimal>,
}

impl Default for ExchangeRateTable {
    fn default() -> Self {
        let rates = [
            ("USD", Decimal::new(100, 2)),
            ("EUR", Decimal::new(92, 2)),
            ("GBP", Decimal::new(79, 2)),
            ("INR", Decimal::new(8312, 2)),
            ("CAD", Decimal::new(136, 2)),
        ]
        .into_iter()
        .map(|(code, rate)| (code.to_string(), rate))
        .collect();
        Self { rates }
    }
}

impl ExchangeRateTable {
    pub fn new(rates: BTreeMap<String, Decimal>) -> Self {
        let rates = rates
            .into_iter()
            .map(|(code, rate)| (code.to_ascii_uppercase(), rate))
            .collect();
        Self { rates }
    }

    /// Parse a `CODE: rate` YAML mapping.
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let rates: BTreeMap<String, Decimal> =
            serde_yaml::from_str(yaml).context("invalid exchange rate table")?;
        if let Some((code, _)) = rates.iter().find(|(_, r)| **r <= Decimal::ZERO) {
            anyhow::bail!("exchange rate for {code} must be positive");
        }
        Ok(Self::new(rates))
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("reading exchange rates from {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn rate(&self, currency: &str) -> Result<Decimal, ProgramError> {
        self.rates
            .get(&currency.to_ascii_uppercase())
            .copied()
            .ok_or_else(|| ProgramError::validation(format!("unsupported currency: {currency}")))
    }
}

// ── Batches ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    Processed,
    Matched,
    VarianceFound,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Matched => "matched",
            Self::VarianceFound => "variance_found",
        }
    }
}

impl TryFrom<String> for PayoutStatus {
    type Error = ProgramError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.as_str() {
            "processed" => Ok(Self::Processed),
            "matched" => Ok(Self::Matched),
            "variance_found" => Ok(Self::VarianceFound),
            other => Err(ProgramError::validation(format!(
                "unknown payout status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewPayoutBatch {
    pub beneficiary_ids: Vec<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub adjustments: Option<Decimal>,
    pub deductions: Option<Decimal>,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Which commission lines a batch sweeps up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutSelection {
    pub beneficiary_ids: Vec<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

impl PayoutSelection {
    pub fn selects(&self, line: &CommissionLine) -> bool {
        line.status == CommissionStatus::Approved
            && line.payout_batch_id.is_none()
            && self.period_start <= line.sale_date
            && line.sale_date <= self.period_end
            && self.beneficiary_ids.iter().any(|b| *b == line.beneficiary_id)
    }
}

/// Everything needed to close a batch except the lines themselves, which
/// the store selects and marks paid in one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutDraft {
    pub batch_id: Uuid,
    pub selection: PayoutSelection,
    pub currency: String,
    pub exchange_rate: Decimal,
    pub adjustments: Decimal,
    pub deductions: Decimal,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl PayoutDraft {
    pub fn prepare(
        req: NewPayoutBatch,
        rates: &ExchangeRateTable,
        created_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, ProgramError> {
        let beneficiary_ids: Vec<String> = req
            .beneficiary_ids
            .into_iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if beneficiary_ids.is_empty() {
            return Err(ProgramError::validation(
                "at least one partner or user id is required",
            ));
        }
        if req.period_start > req.period_end {
            return Err(ProgramError::validation(
                "period_start must not be after period_end",
            ));
        }
        let adjustments = req.adjustments.unwrap_or_default();
        let deductions = req.deductions.unwrap_or_default();
        if adjustments < Decimal::ZERO || deductions < Decimal::ZERO {
            return Err(ProgramError::validation(
                "adjustments and deductions cannot be negative",
            ));
        }
        let currency = req.currency.trim().to_ascii_uppercase();
        let exchange_rate = rates.rate(&currency)?;
        Ok(Self {
            batch_id: Uuid::new_v4(),
            selection: PayoutSelection {
                beneficiary_ids,
                period_start: req.period_start,
                period_end: req.period_end,
            },
            currency,
            exchange_rate,
            adjustments,
            deductions,
            created_by: created_by.to_string(),
            created_at: now,
        })
    }

    /// Close the batch over the selected lines.
    /// `net = (total + adjustments − deductions) × rate`, rounded half-up.
    pub fn finalize(&self, lines: &[CommissionLine]) -> Result<PayoutBatch, ProgramError> {
        if lines.is_empty() {
            return Err(ProgramError::validation(
                "no approved commissions found for payout",
            ));
        }
        let total_amount = lines
            .iter()
            .try_fold(Decimal::ZERO, |acc, l| checked_sum(acc, l.total_commission))?;
        let gross = checked_sum(total_amount, self.adjustments)?.saturating_sub(self.deductions);
        let net = checked_product(gross, self.exchange_rate)?;
        Ok(PayoutBatch {
            id: self.batch_id,
            beneficiary_ids: self.selection.beneficiary_ids.clone(),
            period_start: self.selection.period_start,
            period_end: self.selection.period_end,
            line_ids: lines.iter().map(|l| l.id).collect(),
            total_amount,
            adjustments: self.adjustments,
            deductions: self.deductions,
            currency: self.currency.clone(),
            exchange_rate: self.exchange_rate,
            net_payout: round_currency(net),
            status: PayoutStatus::Processed,
            actual_amount: None,
            variance: None,
            reconciled_by: None,
            reconciled_at: None,
            created_by: self.created_by.clone(),
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub id: Uuid,
    pub beneficiary_ids: Vec<String>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub line_ids: Vec<Uuid>,
    pub total_amount: Decimal,
    pub adjustments: Decimal,
    pub deductions: Decimal,
    pub currency: String,
    pub exchange_rate: Decimal,
    /// Expected amount. Reconciliation never rewrites it.
    pub net_payout: Decimal,
    pub status: PayoutStatus,
    pub actual_amount: Option<Decimal>,
    pub variance: Option<Decimal>,
    pub reconciled_by: Option<String>,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

// ── Reconciliation ─────────────────────────────────────────────

/// One minor currency unit.
pub const RECONCILIATION_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Classify an externally reported amount against the expected one.
pub fn classify(expected: Decimal, actual: Decimal) -> (PayoutStatus, Decimal) {
    let variance = expected.saturating_sub(actual).abs();
    let status = if variance < RECONCILIATION_TOLERANCE {
        PayoutStatus::Matched
    } else {
        PayoutStatus::VarianceFound
    };
    (status, variance)
}

impl PayoutBatch {
    pub fn reconcile(&mut self, actual: Decimal, actor: &str, now: DateTime<Utc>) -> PayoutStatus {
        let (status, variance) = classify(self.net_payout, actual);
        self.status = status;
        self.actual_amount = Some(actual);
        self.variance = Some(variance);
        self.reconciled_by = Some(actor.to_string());
        self.reconciled_at = Some(now);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn line(beneficiary: &str, total: Decimal, sale_date: DateTime<Utc>) -> CommissionLine {
        CommissionLine {
            id: Uuid::new_v4(),
            transaction_id: Uuid::new_v4(),
            beneficiary_id: beneficiary.into(),
            role: "partner".into(),
            credit_percent: dec!(100),
            commission_amount: total,
            spiff_bonus: Decimal::ZERO,
            total_commission: total,
            status: CommissionStatus::Approved,
            decided_by: None,
            rejection_reason: None,
            payout_batch_id: None,
            paid_at: None,
            sale_date,
            created_at: sale_date,
        }
    }

    fn request(currency: &str) -> NewPayoutBatch {
        let now = Utc::now();
        NewPayoutBatch {
            beneficiary_ids: vec!["p1".into()],
            period_start: now - Duration::days(30),
            period_end: now,
            currency: currency.into(),
            adjustments: Some(dec!(10)),
            deductions: Some(dec!(5)),
        }
    }

    #[test]
    fn reconciliation_tolerance() {
        assert_eq!(classify(dec!(1000.00), dec!(1000.005)).0, PayoutStatus::Matched);
        assert_eq!(
            classify(dec!(1000.00), dec!(1000.02)).0,
            PayoutStatus::VarianceFound
        );
        assert_eq!(classify(dec!(1000.00), dec!(1000.01)).0, PayoutStatus::VarianceFound);
    }

    #[test]
    fn reconcile_keeps_expected_amount() {
        let draft = PayoutDraft::prepare(request("USD"), &ExchangeRateTable::default(), "fin", Utc::now())
            .unwrap();
        let mut batch = draft.finalize(&[line("p1", dec!(995), Utc::now())]).unwrap();
        assert_eq!(batch.net_payout, dec!(1000.00));
        assert_eq!(batch.reconcile(dec!(990), "fin", Utc::now()), PayoutStatus::VarianceFound);
        assert_eq!(batch.net_payout, dec!(1000.00));
        assert_eq!(batch.variance, Some(dec!(10)));
    }

    #[test]
    fn converts_net_with_rate() {
        let draft = PayoutDraft::prepare(request("eur"), &ExchangeRateTable::default(), "fin", Utc::now())
            .unwrap();
        assert_eq!(draft.currency, "EUR");
        let batch = draft
            .finalize(&[line("p1", dec!(100), Utc::now()), line("p1", dec!(33.33), Utc::now())])
            .unwrap();
        assert_eq!(batch.total_amount, dec!(133.33));
        // (133.33 + 10 − 5) × 0.92 = 127.2636
        assert_eq!(batch.net_payout, dec!(127.26));
    }

    #[test]
    fn oversized_adjustment_is_a_validation_error() {
        let mut req = request("USD");
        req.adjustments = Some(Decimal::MAX);
        let draft = PayoutDraft::prepare(req, &ExchangeRateTable::default(), "fin", Utc::now())
            .unwrap();
        let err = draft.finalize(&[line("p1", dec!(100), Utc::now())]).unwrap_err();
        assert!(matches!(err, ProgramError::Validation(_)));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let err = PayoutDraft::prepare(request("XYZ"), &ExchangeRateTable::default(), "fin", Utc::now())
            .unwrap_err();
        assert!(matches!(err, ProgramError::Validation(_)));
    }

    #[test]
    fn empty_selection_is_rejected() {
        let draft = PayoutDraft::prepare(request("USD"), &ExchangeRateTable::default(), "fin", Utc::now())
            .unwrap();
        assert!(matches!(draft.finalize(&[]), Err(ProgramError::Validation(_))));
    }

    #[test]
    fn selection_filters_status_period_and_beneficiary() {
        let now = Utc::now();
        let sel = PayoutSelection {
            beneficiary_ids: vec!["p1".into()],
            period_start: now - Duration::days(7),
            period_end: now,
        };
        assert!(sel.selects(&line("p1", dec!(1), now - Duration::days(1))));
        assert!(!sel.selects(&line("p2", dec!(1), now - Duration::days(1))));
        assert!(!sel.selects(&line("p1", dec!(1), now - Duration::days(8))));
        let mut pending = line("p1", dec!(1), now);
        pending.status = CommissionStatus::Pending;
        assert!(!sel.selects(&pending));
    }

    #[test]
    fn rates_load_from_yaml() {
        let table = ExchangeRateTable::from_yaml_str("usd: 1.0\nJPY: 151.2\n").unwrap();
        assert_eq!(table.rate("JPY").unwrap(), dec!(151.2));
        assert_eq!(table.rate("USD").unwrap(), dec!(1.0));
        assert!(table.rate("EUR").is_err());
        assert!(ExchangeRateTable::from_yaml_str("USD: 0").is_err());
    }
}
