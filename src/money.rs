//! Money Conversion Module
//!
//! Converts a user-entered local amount into the settlement currency and
//! scales crypto amounts to the asset's smallest on-chain unit.
//!
//! ## Rules
//! - Exchange rates are quoted as local units per one settlement unit
//!   (e.g. 130 KES per USD), so `settlement = local / rate`.
//! - Fiat results round to 2 places, crypto results to 8, half away from zero.
//! - The applied rate is rounded to the same precision and then used for the
//!   division, so `amount` and `rate` always agree with each other.
//! - Nothing is truncated silently: a result that rounds to zero is an error.
//!
//! ```rust
//! use multirail::money::{Precision, to_settlement};
//! use rust_decimal::Decimal;
//!
//! let c = to_settlement(Decimal::from(1000), Decimal::from(130), Precision::Fiat).unwrap();
//! assert_eq!(c.amount.to_string(), "7.69");
//! ```

use rust_decimal::RoundingStrategy;
use rust_decimal::prelude::*;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("partner {0} has no configured local currency")]
    NoLocalCurrency(String),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Exchange rate must be positive")]
    InvalidRate,

    #[error("Converted amount rounds to zero")]
    Underflow,

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Precision overflow: amount has more than {max} decimal places")]
    PrecisionOverflow { max: u32 },
}

// ============================================================================
// Settlement conversion
// ============================================================================

/// Rounding precision of the settlement side of a conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precision {
    Fiat,
    Crypto,
}

impl Precision {
    pub fn scale(self) -> u32 {
        match self {
            Precision::Fiat => 2,
            Precision::Crypto => 8,
        }
    }

    fn round(self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(self.scale(), RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Result of converting a local amount into the settlement currency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conversion {
    /// Settlement-currency amount, rounded
    pub amount: Decimal,
    /// Rate actually applied, rounded
    pub rate: Decimal,
}

/// Convert `local_amount` at `rate` (local units per settlement unit)
pub fn to_settlement(
    local_amount: Decimal,
    rate: Decimal,
    precision: Precision,
) -> Result<Conversion, ConversionError> {
    if local_amount <= Decimal::ZERO {
        return Err(ConversionError::InvalidAmount);
    }
    let rate = precision.round(rate);
    if rate <= Decimal::ZERO {
        return Err(ConversionError::InvalidRate);
    }

    let raw = local_amount
        .checked_div(rate)
        .ok_or(ConversionError::Overflow)?;
    let amount = precision.round(raw);
    if amount.is_zero() {
        return Err(ConversionError::Underflow);
    }

    Ok(Conversion { amount, rate })
}

/// Same-currency "conversion": rate 1, amount rounded to `precision`
pub fn identity(amount: Decimal, precision: Precision) -> Result<Conversion, ConversionError> {
    to_settlement(amount, Decimal::ONE, precision)
}

// ============================================================================
// Smallest on-chain unit
// ============================================================================

/// Scale a crypto amount to the asset's smallest unit (wei, sun, lamports, sats)
///
/// Fails if the amount carries more precision than the asset supports.
pub fn to_smallest_unit(amount: Decimal, decimals: u32) -> Result<u128, ConversionError> {
    if amount <= Decimal::ZERO {
        return Err(ConversionError::InvalidAmount);
    }
    if decimals > 19 {
        return Err(ConversionError::Overflow);
    }

    let multiplier = Decimal::from(10u64.pow(decimals));
    let scaled = amount
        .checked_mul(multiplier)
        .ok_or(ConversionError::Overflow)?;

    // Should not have fractional part after scaling
    if !scaled.fract().is_zero() {
        return Err(ConversionError::PrecisionOverflow { max: decimals });
    }

    scaled.to_u128().ok_or(ConversionError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_kes_to_usd() {
        let c = to_settlement(dec("1000"), dec("130"), Precision::Fiat).unwrap();
        assert_eq!(c.amount, dec("7.69"));
        assert_eq!(c.rate, dec("130"));
    }

    #[test]
    fn test_midpoint_rounds_away_from_zero() {
        // 0.125 / 1 -> 0.13
        let c = identity(dec("0.125"), Precision::Fiat).unwrap();
        assert_eq!(c.amount, dec("0.13"));
    }

    #[test]
    fn test_rate_is_rounded_before_use() {
        // 0.915 rounds to 0.92; 100 / 0.92 = 108.695... -> 108.70
        let c = to_settlement(dec("100"), dec("0.915"), Precision::Fiat).unwrap();
        assert_eq!(c.rate, dec("0.92"));
        assert_eq!(c.amount, dec("108.70"));
    }

    #[test]
    fn test_crypto_precision() {
        let c = identity(dec("0.123456789"), Precision::Crypto).unwrap();
        assert_eq!(c.amount, dec("0.12345679"));
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert_eq!(
            to_settlement(Decimal::ZERO, dec("130"), Precision::Fiat),
            Err(ConversionError::InvalidAmount)
        );
        assert_eq!(
            to_settlement(dec("10"), Decimal::ZERO, Precision::Fiat),
            Err(ConversionError::InvalidRate)
        );
        // 0.001 rounds to a zero rate at fiat precision
        assert_eq!(
            to_settlement(dec("10"), dec("0.001"), Precision::Fiat),
            Err(ConversionError::InvalidRate)
        );
        assert_eq!(
            to_settlement(dec("0.1"), dec("130"), Precision::Fiat),
            Err(ConversionError::Underflow)
        );
    }

    #[test]
    fn test_smallest_unit() {
        assert_eq!(to_smallest_unit(dec("1.5"), 8).unwrap(), 150_000_000);
        assert_eq!(
            to_smallest_unit(dec("0.05"), 18).unwrap(),
            50_000_000_000_000_000
        );
        assert_eq!(to_smallest_unit(dec("12.345678"), 6).unwrap(), 12_345_678);
    }

    #[test]
    fn test_smallest_unit_precision_overflow() {
        assert_eq!(
            to_smallest_unit(dec("1.1234567"), 6),
            Err(ConversionError::PrecisionOverflow { max: 6 })
        );
        assert_eq!(
            to_smallest_unit(Decimal::ZERO, 8),
            Err(ConversionError::InvalidAmount)
        );
    }
}
