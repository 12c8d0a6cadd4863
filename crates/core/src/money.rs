//! Exact fixed-point money arithmetic.
//!
//! All currency amounts carry exactly 2 fractional digits and are held as
//! integer cents. `Money` intentionally implements **none** of the arithmetic
//! operator traits; every money-bearing computation must route through
//! [`Money::round2`], [`Money::add`] and [`Money::subtract`] so that native
//! floating point never touches a stored amount.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error raised by money construction or arithmetic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MoneyError {
    /// Input was NaN or infinite.
    #[error("money value must be finite")]
    NotFinite,

    /// The result does not fit in the cent representation.
    #[error("money arithmetic overflow")]
    Overflow,
}

/// A currency amount with exactly 2 fractional digits.
///
/// Serialized as integer cents (`#[serde(transparent)]`).
#[derive(
    Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Round a raw floating-point amount to 2 decimals, half-up.
    ///
    /// Rejects NaN and infinite inputs. Halves round away from zero, so
    /// `round2(10.005)` is `10.01` and `round2(-10.005)` is `-10.01`. A small
    /// relative nudge compensates for binary representation error: `10.005`
    /// is stored by the machine as `10.00499…`, and must still round up.
    pub fn round2(value: f64) -> Result<Self, MoneyError> {
        if !value.is_finite() {
            return Err(MoneyError::NotFinite);
        }

        let scaled = value * 100.0;
        let nudge = scaled.abs() * f64::EPSILON * 8.0;
        let adjusted = if scaled.is_sign_negative() {
            scaled - nudge
        } else {
            scaled + nudge
        };

        let cents = adjusted.round();
        if cents < i64::MIN as f64 || cents > i64::MAX as f64 {
            return Err(MoneyError::Overflow);
        }

        Ok(Self(cents as i64))
    }

    /// Exact addition on integer cents.
    pub fn add(self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_add(other.0).map(Money).ok_or(MoneyError::Overflow)
    }

    /// Exact subtraction on integer cents.
    pub fn subtract(self, other: Money) -> Result<Money, MoneyError> {
        self.0.checked_sub(other.0).map(Money).ok_or(MoneyError::Overflow)
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// GST component amounts, each independently rounded to 2 digits.
///
/// Components are rounded **before** summation; `total()` then uses exact
/// addition. This matches the tax-report requirement that component figures
/// printed per line agree with the summed totals.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakup {
    pub cgst: Money,
    pub sgst: Money,
    pub igst: Money,
}

impl TaxBreakup {
    pub const ZERO: TaxBreakup = TaxBreakup {
        cgst: Money::ZERO,
        sgst: Money::ZERO,
        igst: Money::ZERO,
    };

    /// Build from raw per-component amounts, rounding each independently.
    pub fn from_raw(cgst: f64, sgst: f64, igst: f64) -> Result<Self, MoneyError> {
        Ok(Self {
            cgst: Money::round2(cgst)?,
            sgst: Money::round2(sgst)?,
            igst: Money::round2(igst)?,
        })
    }

    /// Sum of the pre-rounded components.
    pub fn total(&self) -> Result<Money, MoneyError> {
        self.cgst.add(self.sgst)?.add(self.igst)
    }

    pub fn is_zero(&self) -> bool {
        self.cgst.is_zero() && self.sgst.is_zero() && self.igst.is_zero()
    }
}
