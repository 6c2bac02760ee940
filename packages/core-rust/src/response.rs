//! Response envelope returned by every economy operation.
//!
//! Expected negative outcomes (insufficient funds, unknown account, no
//! provider, ...) are [`Response::failure`] values carrying an
//! [`EconomyFailure`], never panics or `Err` propagation through the caller.
//! Reading the value of a failed response is a bug in the caller and panics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::account::AccountId;
use crate::amount::Amount;

/// Reason attached to a failed [`Response`]. `Display` is the human-readable text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EconomyFailure {
    #[error("insufficient funds in {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Amount,
        requested: Amount,
    },
    #[error("amount must be positive, got {amount}")]
    NegativeAmount { amount: Amount },
    #[error("account {0} does not exist")]
    AccountNotFound(AccountId),
    #[error("account {0} already exists")]
    AccountAlreadyExists(AccountId),
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
    #[error("unknown currency '{0}'")]
    UnknownCurrency(String),
    #[error("no economy provider is registered")]
    ProviderAbsent,
    #[error("the economy provider changed since this account handle was obtained")]
    StaleAccountHandle,
    #[error("balance of {account} would overflow")]
    BalanceOverflow { account: AccountId },
    #[error("operation timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("provider fault: {0}")]
    ProviderFault(String),
    #[error("operation was dropped before completing")]
    Dropped,
    #[error("{0}")]
    Other(String),
}

/// Discriminant of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseKind {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome<T> {
    Success(T),
    Failure(EconomyFailure),
}

/// Result of an asynchronous economy operation.
///
/// Exactly one of value or reason is present. Only [`Response::success`]
/// and [`Response::failure`] construct one.
#[derive(Clone, PartialEq, Eq)]
pub struct Response<T> {
    outcome: Outcome<T>,
}

impl<T> Response<T> {
    pub fn success(value: T) -> Self {
        Self {
            outcome: Outcome::Success(value),
        }
    }

    pub fn failure(reason: impl Into<EconomyFailure>) -> Self {
        Self {
            outcome: Outcome::Failure(reason.into()),
        }
    }

    pub fn kind(&self) -> ResponseKind {
        match self.outcome {
            Outcome::Success(_) => ResponseKind::Success,
            Outcome::Failure(_) => ResponseKind::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind() == ResponseKind::Success
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    /// Borrows the success value.
    ///
    /// # Panics
    ///
    /// Panics if the response is a failure. Branch on [`Response::kind`] first.
    pub fn value(&self) -> &T {
        match &self.outcome {
            Outcome::Success(v) => v,
            Outcome::Failure(reason) => {
                panic!("value() called on a failed economy response: {reason}")
            }
        }
    }

    /// Consumes the response and returns the success value.
    ///
    /// # Panics
    ///
    /// Panics if the response is a failure.
    pub fn into_value(self) -> T {
        match self.outcome {
            Outcome::Success(v) => v,
            Outcome::Failure(reason) => {
                panic!("into_value() called on a failed economy response: {reason}")
            }
        }
    }

    pub fn reason(&self) -> Option<&EconomyFailure> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(reason) => Some(reason),
        }
    }

    /// Converts into a `Result` for `?`-style composition.
    ///
    /// # Errors
    ///
    /// Returns the failure reason if the response is a failure.
    pub fn into_result(self) -> Result<T, EconomyFailure> {
        match self.outcome {
            Outcome::Success(v) => Ok(v),
            Outcome::Failure(reason) => Err(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self.outcome {
            Outcome::Success(v) => Response::success(f(v)),
            Outcome::Failure(reason) => Response::failure(reason),
        }
    }

    pub fn and_then<U>(self, f: impl FnOnce(T) -> Response<U>) -> Response<U> {
        match self.outcome {
            Outcome::Success(v) => f(v),
            Outcome::Failure(reason) => Response::failure(reason),
        }
    }
}

impl<T> From<Result<T, EconomyFailure>> for Response<T> {
    fn from(result: Result<T, EconomyFailure>) -> Self {
        match result {
            Ok(v) => Response::success(v),
            Err(reason) => Response::failure(reason),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Response<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Success(v) => f.debug_tuple("Success").field(v).finish(),
            Outcome::Failure(reason) => f.debug_tuple("Failure").field(reason).finish(),
        }
    }
}
