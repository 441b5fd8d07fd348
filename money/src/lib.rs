#![deny(clippy::print_stdout, clippy::print_stderr)]

//! Exact-decimal, currency-checked monetary arithmetic.
//!
//! `Money` never touches binary floating point: amounts are backed by
//! [`rust_decimal::Decimal`], a fixed-point decimal with up to 28-29
//! significant digits. Every arithmetic operator that combines two amounts
//! requires identical currencies and returns a `Result` rather than panicking.

use std::cmp::Ordering;
use std::fmt;

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub type MoneyResult<T> = Result<T, MoneyError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("unknown currency code: {0}")]
    UnknownCurrency(String),
    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch { expected: Currency, found: Currency },
    #[error("division by zero")]
    DivisionByZero,
    #[error("arithmetic overflow")]
    Overflow,
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}

/// A closed registry of the currencies the core understands. Unknown ISO
/// 4217 codes are rejected rather than accepted with a guessed exponent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Jpy,
    Chf,
    Cad,
    Aud,
    Nzd,
}

impl Currency {
    pub const ALL: [Currency; 8] = [
        Currency::Usd,
        Currency::Eur,
        Currency::Gbp,
        Currency::Jpy,
        Currency::Chf,
        Currency::Cad,
        Currency::Aud,
        Currency::Nzd,
    ];

    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Jpy => "JPY",
            Currency::Chf => "CHF",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
            Currency::Nzd => "NZD",
        }
    }

    /// Number of digits after the decimal point a minor unit occupies.
    /// JPY has no minor unit; the rest in this registry use 2.
    #[must_use]
    pub fn minor_unit_exponent(self) -> u32 {
        match self {
            Currency::Jpy => 0,
            _ => 2,
        }
    }

    pub fn from_code(code: &str) -> MoneyResult<Self> {
        Self::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| MoneyError::UnknownCurrency(code.to_string()))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for Currency {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.code())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = String::deserialize(deserializer)?;
        Currency::from_code(&code).map_err(serde::de::Error::custom)
    }
}

/// Rounding mode a caller may request for [`Money::div_rounded`]. The default
/// used by [`Money::div`] and [`Money::round_to_minor_units`] is `HalfEven`
/// (banker's rounding), matching the core's default everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundingMode {
    HalfEven,
    HalfUp,
    HalfDown,
    Up,
    Down,
    Ceiling,
    Floor,
}

impl RoundingMode {
    fn into_strategy(self) -> RoundingStrategy {
        match self {
            RoundingMode::HalfEven => RoundingStrategy::MidpointNearestEven,
            RoundingMode::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            RoundingMode::HalfDown => RoundingStrategy::MidpointTowardZero,
            RoundingMode::Up => RoundingStrategy::AwayFromZero,
            RoundingMode::Down => RoundingStrategy::ToZero,
            RoundingMode::Ceiling => RoundingStrategy::ToPositiveInfinity,
            RoundingMode::Floor => RoundingStrategy::ToNegativeInfinity,
        }
    }
}

/// An immutable, currency-tagged decimal amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    /// Full configured precision is preserved; `rust_decimal::Decimal` has
    /// no NaN/infinity representation, so construction only rejects a scale
    /// beyond the library's supported range.
    pub fn new(amount: Decimal, currency: Currency) -> MoneyResult<Self> {
        if amount.scale() > 28 {
            return Err(MoneyError::InvalidAmount(format!(
                "scale {} exceeds supported precision",
                amount.scale()
            )));
        }
        Ok(Money { amount, currency })
    }

    #[must_use]
    pub fn zero(currency: Currency) -> Self {
        Money {
            amount: Decimal::ZERO,
            currency,
        }
    }

    #[must_use]
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    #[must_use]
    pub fn currency(&self) -> Currency {
        self.currency
    }

    fn require_same_currency(&self, other: &Money) -> MoneyResult<()> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }

    pub fn add(&self, other: &Money) -> MoneyResult<Money> {
        self.require_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    pub fn sub(&self, other: &Money) -> MoneyResult<Money> {
        self.require_same_currency(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    pub fn mul(&self, scalar: Decimal) -> MoneyResult<Money> {
        let amount = self
            .amount
            .checked_mul(scalar)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    /// Divides using the default `HalfEven` rounding mode, matching the
    /// core's banker's-rounding default for every rounding boundary.
    pub fn div(&self, scalar: Decimal) -> MoneyResult<Money> {
        self.div_rounded(scalar, RoundingMode::HalfEven)
    }

    pub fn div_rounded(&self, scalar: Decimal, mode: RoundingMode) -> MoneyResult<Money> {
        if scalar.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }
        let raw = self.amount.checked_div(scalar).ok_or(MoneyError::Overflow)?;
        let scale = self.amount.scale().max(raw.scale());
        let amount = raw.round_dp_with_strategy(scale, mode.into_strategy());
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.amount.is_sign_positive() && !self.amount.is_zero()
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.amount.is_sign_negative() && !self.amount.is_zero()
    }

    /// Snaps to the currency's minor-unit precision using `HalfEven`
    /// rounding. Idempotent: rounding an already-rounded amount is a no-op.
    #[must_use]
    pub fn round_to_minor_units(&self) -> Money {
        let dp = self.currency.minor_unit_exponent();
        Money {
            amount: self
                .amount
                .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven),
            currency: self.currency,
        }
    }

    pub fn checked_cmp(&self, other: &Money) -> MoneyResult<Ordering> {
        self.require_same_currency(other)?;
        Ok(self.amount.cmp(&other.amount))
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.currency == other.currency && self.amount == other.amount
    }
}

impl Eq for Money {}

/// Comparisons between different currencies are incomparable (`None`)
/// rather than panicking, matching the operator contract's "fail" wording
/// in a way idiomatic to `Ord`/`PartialOrd`.
impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        Some(self.amount.cmp(&other.amount))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dp = self.currency.minor_unit_exponent();
        let rounded = self
            .amount
            .round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven);
        write!(f, "{:.*} {}", dp as usize, rounded, self.currency.code())
    }
}
