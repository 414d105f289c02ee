//! Money and currency value objects.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when constructing or combining money values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MoneyError {
    /// The amount is negative, too precise or out of range.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// The currency code is not three ASCII letters.
    #[error("Invalid currency code: '{0}'")]
    InvalidCurrency(String),
}

/// Non-negative money amount stored in minor units (e.g. cents).
///
/// Amounts never go below zero; arithmetic that would produce a negative
/// value or overflow returns an error instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Money {
    minor_units: i64,
}

impl Money {
    /// Number of decimal places carried by an amount.
    pub const SCALE: u32 = 2;

    /// Creates an amount from minor units (e.g. 1234 = 12.34).
    pub fn from_minor_units(minor_units: i64) -> Result<Self, MoneyError> {
        if minor_units < 0 {
            return Err(MoneyError::InvalidAmount(format!(
                "{minor_units} minor units is negative"
            )));
        }
        Ok(Self { minor_units })
    }

    /// Creates an amount from a decimal value with at most two fractional
    /// digits.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::InvalidAmount(format!("{value} is negative")));
        }

        let normalized = value.normalize();
        if normalized.scale() > Self::SCALE {
            return Err(MoneyError::InvalidAmount(format!(
                "{value} has more than {} decimal places",
                Self::SCALE
            )));
        }

        let minor = (normalized * Decimal::from(100)).trunc();
        let minor_units = i64::try_from(minor)
            .map_err(|_| MoneyError::InvalidAmount(format!("{value} is out of range")))?;
        Self::from_minor_units(minor_units)
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { minor_units: 0 }
    }

    /// Returns the amount in minor units.
    pub fn minor_units(&self) -> i64 {
        self.minor_units
    }

    /// Returns the whole major unit portion.
    pub fn major_units(&self) -> i64 {
        self.minor_units / 100
    }

    /// Returns the minor unit remainder after major units.
    pub fn minor_part(&self) -> i64 {
        self.minor_units % 100
    }

    /// Returns the amount as a decimal with two fractional digits.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor_units, Self::SCALE)
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.minor_units == 0
    }

    /// Returns true if the amount is greater than zero.
    pub fn is_positive(&self) -> bool {
        self.minor_units > 0
    }

    /// Adds another amount.
    pub fn checked_add(&self, other: Money) -> Result<Self, MoneyError> {
        self.minor_units
            .checked_add(other.minor_units)
            .ok_or_else(|| MoneyError::InvalidAmount("addition overflowed".to_string()))
            .and_then(Self::from_minor_units)
    }

    /// Subtracts another amount. Fails if the result would be negative.
    pub fn checked_sub(&self, other: Money) -> Result<Self, MoneyError> {
        if other.minor_units > self.minor_units {
            return Err(MoneyError::InvalidAmount(format!(
                "{self} - {other} would be negative"
            )));
        }
        Self::from_minor_units(self.minor_units - other.minor_units)
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<i64> for Money {
    type Error = MoneyError;

    fn try_from(minor_units: i64) -> Result<Self, Self::Error> {
        Self::from_minor_units(minor_units)
    }
}

impl From<Money> for i64 {
    fn from(money: Money) -> Self {
        money.minor_units
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}", self.major_units(), self.minor_part())
    }
}

/// ISO-4217 style currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Creates a currency from a three-letter code, case-insensitively.
    pub fn new(code: impl AsRef<str>) -> Result<Self, MoneyError> {
        let code = code.as_ref().trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(MoneyError::InvalidCurrency(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// Returns the currency code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = MoneyError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        Self::new(code)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}
