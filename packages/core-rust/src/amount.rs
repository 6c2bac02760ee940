//! Fixed-point monetary amounts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A monetary value in the minor units of some currency.
///
/// The scale is supplied by the currency's precision: with precision 2 the
/// amount `Amount::from_minor(1050)` reads as `10.50`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    #[must_use]
    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    /// Builds an amount from whole major units at the given precision.
    /// Returns `None` on overflow.
    #[must_use]
    pub fn from_major(major: i64, precision: u8) -> Option<Self> {
        10i64
            .checked_pow(u32::from(precision))
            .and_then(|scale| major.checked_mul(scale))
            .map(Self)
    }

    #[must_use]
    pub const fn minor(self) -> i64 {
        self.0
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    #[must_use]
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Renders the amount with `precision` fractional digits.
    #[must_use]
    pub fn format(self, precision: u8) -> String {
        if precision == 0 {
            return self.0.to_string();
        }
        let abs = u128::from(self.0.unsigned_abs());
        // Past 10^38 the scale exceeds any i64, so everything is fractional.
        let (whole, fraction) = match 10u128.checked_pow(u32::from(precision)) {
            Some(scale) => (abs / scale, abs % scale),
            None => (0, abs),
        };
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{sign}{whole}.{fraction:0width$}", width = usize::from(precision))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
