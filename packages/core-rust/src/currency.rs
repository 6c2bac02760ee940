//! Currencies published by an economy provider.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;

/// Largest precision whose scale still fits in an [`Amount`].
pub const MAX_PRECISION: u8 = 18;

/// A unit of value. Immutable once published by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    /// Stable identifier used in every operation (e.g., `"coins"`).
    pub identifier: String,
    pub display_singular: String,
    pub display_plural: String,
    /// Number of fractional digits represented by one minor unit.
    pub precision: u8,
    /// Value of one major unit of this currency expressed in the base unit.
    pub conversion_rate: OrderedFloat<f64>,
    pub primary: bool,
}

impl Currency {
    /// Creates a non-primary currency with a conversion rate of 1.
    pub fn new(
        identifier: impl Into<String>,
        display_singular: impl Into<String>,
        display_plural: impl Into<String>,
        precision: u8,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_singular: display_singular.into(),
            display_plural: display_plural.into(),
            precision,
            conversion_rate: OrderedFloat(1.0),
            primary: false,
        }
    }

    #[must_use]
    pub fn with_conversion_rate(mut self, rate: f64) -> Self {
        self.conversion_rate = OrderedFloat(rate);
        self
    }

    #[must_use]
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Formats an amount as e.g. `"10.50 coins"` or `"1.00 coin"`.
    #[must_use]
    pub fn display(&self, amount: Amount) -> String {
        let scale = 10i64.checked_pow(u32::from(self.precision));
        let name = if scale == Some(amount.minor()) {
            &self.display_singular
        } else {
            &self.display_plural
        };
        format!("{} {}", amount.format(self.precision), name)
    }
}

/// Errors detected when assembling a provider's currency set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencySetError {
    #[error("a provider must publish at least one currency")]
    Empty,
    #[error("no currency is marked primary")]
    NoPrimary,
    #[error("more than one primary currency: {first} and {second}")]
    MultiplePrimaries { first: String, second: String },
    #[error("duplicate currency identifier: {0}")]
    DuplicateIdentifier(String),
    #[error("currency {identifier} has precision {precision} (max {max})", max = MAX_PRECISION)]
    PrecisionTooLarge { identifier: String, precision: u8 },
}

/// Non-empty set of currencies with exactly one primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencySet {
    by_id: BTreeMap<String, Currency>,
    primary: String,
}

impl CurrencySet {
    /// Validates and builds the set.
    ///
    /// # Errors
    ///
    /// Returns [`CurrencySetError`] if the list is empty, contains duplicate
    /// identifiers, or does not have exactly one primary currency.
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> Result<Self, CurrencySetError> {
        let mut by_id = BTreeMap::new();
        let mut primary: Option<String> = None;

        for currency in currencies {
            if currency.precision > MAX_PRECISION {
                return Err(CurrencySetError::PrecisionTooLarge {
                    identifier: currency.identifier,
                    precision: currency.precision,
                });
            }
            if currency.primary {
                if let Some(first) = &primary {
                    return Err(CurrencySetError::MultiplePrimaries {
                        first: first.clone(),
                        second: currency.identifier,
                    });
                }
                primary = Some(currency.identifier.clone());
            }
            let id = currency.identifier.clone();
            if by_id.insert(id.clone(), currency).is_some() {
                return Err(CurrencySetError::DuplicateIdentifier(id));
            }
        }

        if by_id.is_empty() {
            return Err(CurrencySetError::Empty);
        }
        let primary = primary.ok_or(CurrencySetError::NoPrimary)?;
        Ok(Self { by_id, primary })
    }

    #[must_use]
    pub fn primary(&self) -> &Currency {
        &self.by_id[&self.primary]
    }

    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<&Currency> {
        self.by_id.get(identifier)
    }

    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.by_id.contains_key(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Currency> {
        self.by_id.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
