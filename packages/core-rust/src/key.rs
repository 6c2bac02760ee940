//! Capability identity and provider priority.
//!
//! A [`ServiceKey`] names a capability contract and pins the Rust type that
//! implementations of that contract must have. Consumers normally work with
//! the typed [`Capability`] handle instead of building keys by hand.

use std::any::TypeId;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Immutable identity of a capability contract.
///
/// Two keys are equal only when both the name and the contract type match, so
/// a registration can never be resolved as the wrong trait object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    name: &'static str,
    contract: TypeId,
}

impl ServiceKey {
    /// Returns the capability name (e.g., `"economy"`).
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Typed handle for a capability whose implementations are `Arc<T>`.
///
/// `T` is usually a trait object, e.g. `Capability<dyn EconomyProvider>`.
pub struct Capability<T: ?Sized + 'static> {
    name: &'static str,
    _contract: PhantomData<fn() -> Box<T>>,
}

impl<T: ?Sized + 'static> Capability<T> {
    /// Declares a capability with the given name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _contract: PhantomData,
        }
    }

    /// Returns the capability name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the registry key for this capability.
    #[must_use]
    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            name: self.name,
            contract: TypeId::of::<T>(),
        }
    }
}

impl<T: ?Sized + 'static> Clone for Capability<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized + 'static> Copy for Capability<T> {}

impl<T: ?Sized + 'static> fmt::Debug for Capability<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Capability").field(&self.name).finish()
    }
}

/// Declared priority of a registration. Higher variants win resolution.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

impl Priority {
    /// All priorities in ascending order.
    pub const ALL: [Priority; 5] = [
        Priority::Lowest,
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Highest,
    ];

    /// Lowercase name used in configuration files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Lowest => "lowest",
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Highest => "highest",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string names no [`Priority`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority '{input}' (expected one of: lowest, low, normal, high, highest)")]
pub struct ParsePriorityError {
    pub input: String,
}

impl FromStr for Priority {
    type Err = ParsePriorityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Priority::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParsePriorityError {
                input: s.to_string(),
            })
    }
}
