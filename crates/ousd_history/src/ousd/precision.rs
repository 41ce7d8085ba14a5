//! Fixed significant-digit arithmetic for credits and balances.

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrecisionError {
    #[error("arithmetic overflow")]
    Overflow,
    #[error("division by zero")]
    DivisionByZero,
}

/// Arithmetic context: every result is truncated to `significant_digits`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Precision {
    pub significant_digits: u32,
}

impl Precision {
    /// 18 significant digits, truncating. Matches the token's 18 decimals.
    pub const ON_CHAIN: Precision = Precision {
        significant_digits: 18,
    };

    pub fn round(self, value: Decimal) -> Decimal {
        value
            .round_sf_with_strategy(self.significant_digits, RoundingStrategy::ToZero)
            .map(|d| d.normalize())
            .unwrap_or(value)
    }

    pub fn add(self, a: Decimal, b: Decimal) -> Result<Decimal, PrecisionError> {
        a.checked_add(b)
            .map(|v| self.round(v))
            .ok_or(PrecisionError::Overflow)
    }

    pub fn sub(self, a: Decimal, b: Decimal) -> Result<Decimal, PrecisionError> {
        a.checked_sub(b)
            .map(|v| self.round(v))
            .ok_or(PrecisionError::Overflow)
    }

    pub fn mul(self, a: Decimal, b: Decimal) -> Result<Decimal, PrecisionError> {
        a.checked_mul(b)
            .map(|v| self.round(v))
            .ok_or(PrecisionError::Overflow)
    }

    pub fn div(self, a: Decimal, b: Decimal) -> Result<Decimal, PrecisionError> {
        if b.is_zero() {
            return Err(PrecisionError::DivisionByZero);
        }
        a.checked_div(b)
            .map(|v| self.round(v))
            .ok_or(PrecisionError::Overflow)
    }
}

impl Default for Precision {
    fn default() -> Self {
        Self::ON_CHAIN
    }
}
