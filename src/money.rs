//! Money handling
//!
//! All balances and amounts are fixed-point decimals with scale 2. Every
//! amount that enters the system goes through [`validate_amount`]; every
//! arithmetic result goes through [`quantize`] before persistence.

use rust_decimal::Decimal;

use crate::error::WalletError;

/// Fixed scale for all monetary values.
pub const SCALE: u32 = 2;

/// Zero with the canonical scale.
pub fn zero() -> Decimal {
    Decimal::new(0, SCALE)
}

/// Normalize a decimal to the canonical scale.
///
/// Assumes the value is already representable at scale 2; callers that
/// accept external input must run [`validate_amount`] first.
pub fn quantize(value: Decimal) -> Decimal {
    let mut v = value;
    v.rescale(SCALE);
    v
}

/// Validate a client-supplied amount: strictly positive, at most 2 decimal
/// places. Returns the amount normalized to scale 2.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, WalletError> {
    if amount <= Decimal::ZERO {
        return Err(WalletError::InvalidAmount);
    }
    if amount.round_dp(SCALE) != amount {
        return Err(WalletError::InvalidAmount);
    }
    Ok(quantize(amount))
}

/// Validate an optional daily withdrawal limit: `None` clears the limit,
/// `Some` must be strictly positive.
pub fn validate_limit(limit: Option<Decimal>) -> Result<Option<Decimal>, WalletError> {
    match limit {
        None => Ok(None),
        Some(l) => validate_amount(l).map(Some),
    }
}
