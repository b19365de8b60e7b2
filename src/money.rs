//! Money helpers
//!
//! All monetary values move through the system as `rust_decimal::Decimal`
//! and are rounded half-up to 2 decimal places at every mutation boundary.
//! All rounding MUST go through this module so distribution legs sum exactly.

use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use thiserror::Error;

/// Monetary scale used across accounts, orders and the ledger
pub const MONEY_SCALE: u32 = 2;

/// Money parsing/validation errors
#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

/// Round a value to the monetary scale (2 decimals, half-up)
#[inline]
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Apply a rate to an amount and round to the monetary scale
#[inline]
pub fn apply_rate(amount: Decimal, rate: Decimal) -> Decimal {
    round2(amount * rate)
}

/// Parse a client/config amount string into a positive 2-decimal value
///
/// # Errors
/// * `InvalidFormat` - not a decimal number
/// * `InvalidAmount` - zero or negative, or more than 2 decimal places
pub fn parse_amount(amount_str: &str) -> Result<Decimal, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    let value = Decimal::from_str(amount_str)
        .map_err(|e| MoneyError::InvalidFormat(e.to_string()))?;

    if value <= Decimal::ZERO {
        return Err(MoneyError::InvalidAmount);
    }
    if value.scale() > MONEY_SCALE {
        return Err(MoneyError::InvalidFormat(format!(
            "more than {} decimal places: {}",
            MONEY_SCALE, amount_str
        )));
    }

    Ok(round2(value))
}

/// Clamp a configured rate into `[0, 1]`, logging when the input was out of range
pub fn clamp_rate(name: &str, rate: Decimal) -> Decimal {
    if rate < Decimal::ZERO {
        tracing::warn!(rate = %rate, "{} below 0, clamping to 0", name);
        Decimal::ZERO
    } else if rate > Decimal::ONE {
        tracing::warn!(rate = %rate, "{} above 1, clamping to 1", name);
        Decimal::ONE
    } else {
        rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_round2_half_up() {
        assert_eq!(round2(dec("23.455")), dec("23.46"));
        assert_eq!(round2(dec("23.454")), dec("23.45"));
        assert_eq!(round2(dec("23.4")), dec("23.4"));
        assert_eq!(round2(dec("-0.005")), dec("-0.01"));
    }

    #[test]
    fn test_apply_rate() {
        // 47 * 0.5 = 23.5
        assert_eq!(apply_rate(dec("47"), dec("0.5")), dec("23.5"));
        // 0.03 * 0.33 = 0.0099 -> 0.01
        assert_eq!(apply_rate(dec("0.03"), dec("0.33")), dec("0.01"));
    }

    #[test]
    fn test_parse_amount_valid() {
        assert_eq!(parse_amount("150").unwrap(), dec("150"));
        assert_eq!(parse_amount(" 99.95 ").unwrap(), dec("99.95"));
    }

    #[test]
    fn test_parse_amount_rejects_bad_input() {
        assert!(parse_amount("").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount("0").is_err());
        assert!(parse_amount("-5").is_err());
        assert!(parse_amount("1.999").is_err());
    }

    #[test]
    fn test_clamp_rate() {
        assert_eq!(clamp_rate("x", dec("0.5")), dec("0.5"));
        assert_eq!(clamp_rate("x", dec("-0.1")), Decimal::ZERO);
        assert_eq!(clamp_rate("x", dec("1.5")), Decimal::ONE);
    }
}
