//! Fixed-point monetary values.
//!
//! All amounts are integer minor units (e.g. cents) tagged with a currency
//! code. No floating-point representation exists anywhere in the core;
//! arithmetic is checked and mixing currencies is an error.

use core::cmp::Ordering;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value_object::ValueObject;

/// Currency code (ISO-4217 style, e.g. "USD", "EUR").
///
/// Uppercase ASCII alphabetic, 2..=8 characters. Stored inline to keep
/// `Money` `Copy`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency {
    code: [u8; 8],
    len: u8,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("currency code '{0}' is not 2..=8 uppercase ASCII letters")]
    InvalidCurrency(String),

    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: Currency, right: Currency },

    #[error("amount overflow")]
    Overflow,
}

impl Currency {
    pub fn new(code: &str) -> Result<Self, MoneyError> {
        let bytes = code.as_bytes();
        if bytes.len() < 2
            || bytes.len() > 8
            || !bytes.iter().all(|b| b.is_ascii_uppercase())
        {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        let mut buf = [0u8; 8];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            code: buf,
            len: bytes.len() as u8,
        })
    }

    pub fn as_str(&self) -> &str {
        // Invariant upheld by `new`: code[..len] is ASCII.
        core::str::from_utf8(&self.code[..self.len as usize]).unwrap_or("???")
    }
}

impl core::fmt::Display for Currency {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.as_str().to_string()
    }
}

/// Fixed-point monetary value: integer minor units + currency.
///
/// Negative amounts are representable (used for debit deltas); whether a
/// negative value is *permitted* is the caller's business rule, not this
/// type's.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor_units: i64,
    currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub fn new(minor_units: i64, currency: Currency) -> Self {
        Self {
            minor_units,
            currency,
        }
    }

    pub fn zero(currency: Currency) -> Self {
        Self::new(0, currency)
    }

    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    pub fn is_negative(&self) -> bool {
        self.minor_units < 0
    }

    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    fn ensure_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency,
                right: other.currency,
            });
        }
        Ok(())
    }

    pub fn checked_add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let minor = self
            .minor_units
            .checked_add(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    pub fn checked_sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.ensure_same_currency(other)?;
        let minor = self
            .minor_units
            .checked_sub(other.minor_units)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    pub fn negate(&self) -> Result<Money, MoneyError> {
        let minor = self.minor_units.checked_neg().ok_or(MoneyError::Overflow)?;
        Ok(Money::new(minor, self.currency))
    }

    /// Compare two amounts of the same currency.
    pub fn compare(&self, other: &Money) -> Result<Ordering, MoneyError> {
        self.ensure_same_currency(other)?;
        Ok(self.minor_units.cmp(&other.minor_units))
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.minor_units, self.currency)
    }
}
