//! Human-readable price parsing.
//!
//! Operators configure prices the way people read them (`"0.003"` USDC). The
//! payment protocol only ever carries atomic token units (`3000`). This module
//! converts between the two without floating point.

use alloy_primitives::U256;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// A non-negative decimal currency amount, e.g. `0.003`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MoneyAmount(Decimal);

/// Errors produced while parsing or scaling a [`MoneyAmount`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyAmountError {
    /// The input is not a decimal number.
    #[error("invalid amount format: {0}")]
    InvalidFormat(String),
    /// The input is below zero.
    #[error("amount must not be negative: {0}")]
    Negative(String),
    /// The amount has more fractional digits than the token supports.
    #[error("amount {amount} has more than {decimals} decimal places")]
    TooPrecise {
        /// The offending amount.
        amount: String,
        /// Token decimals.
        decimals: u8,
    },
}

impl MoneyAmount {
    /// Scales the amount into the token's smallest unit.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyAmountError::TooPrecise`] when the amount cannot be
    /// represented exactly with `decimals` fractional digits.
    pub fn to_atomic(&self, decimals: u8) -> Result<U256, MoneyAmountError> {
        let too_precise = || MoneyAmountError::TooPrecise {
            amount: self.0.to_string(),
            decimals,
        };
        let normalized = self.0.normalize();
        if normalized.scale() > u32::from(decimals) {
            return Err(too_precise());
        }
        let mantissa = U256::from(normalized.mantissa().unsigned_abs());
        let shift = u32::from(decimals) - normalized.scale();
        let factor = U256::from(10u8).pow(U256::from(shift));
        mantissa.checked_mul(factor).ok_or_else(too_precise)
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('$').replace('_', "");
        let decimal = Decimal::from_str(&trimmed)
            .map_err(|_| MoneyAmountError::InvalidFormat(s.to_owned()))?;
        if decimal.is_sign_negative() && !decimal.is_zero() {
            return Err(MoneyAmountError::Negative(s.to_owned()));
        }
        Ok(Self(decimal))
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
