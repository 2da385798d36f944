//! Fixed-point helpers for currency and percentage values.
//!
//! Everything monetary is a [`Decimal`]. Intermediate results keep full
//! precision; only persisted values go through [`round_currency`].

use rust_decimal::prelude::*;
use rust_decimal::RoundingStrategy;

use crate::error::ProgramError;

/// Minor-unit precision for every supported currency.
pub const CURRENCY_SCALE: u32 = 2;

/// Precision kept on persisted percentages.
pub const PERCENT_SCALE: u32 = 4;

/// Round half-up (away from zero at the midpoint) to two places.
pub fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_percent(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(PERCENT_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

fn out_of_range() -> ProgramError {
    ProgramError::validation("amount out of range")
}

/// `a × b`, or a validation error when the product does not fit a `Decimal`.
pub fn checked_product(a: Decimal, b: Decimal) -> Result<Decimal, ProgramError> {
    a.checked_mul(b).ok_or_else(out_of_range)
}

pub fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal, ProgramError> {
    a.checked_add(b).ok_or_else(out_of_range)
}

/// `amount × percent / 100`, unrounded.
pub fn percent_of(amount: Decimal, percent: Decimal) -> Result<Decimal, ProgramError> {
    checked_product(amount, percent)?
        .checked_div(Decimal::ONE_HUNDRED)
        .ok_or_else(out_of_range)
}

/// `part / whole × 100`, or zero when `whole` is not positive. Saturates at
/// `Decimal::MAX` instead of overflowing.
pub fn ratio_percent(part: Decimal, whole: Decimal) -> Decimal {
    if whole <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    part.checked_div(whole)
        .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::MAX)
}
