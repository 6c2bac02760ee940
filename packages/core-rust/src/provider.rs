//! The contract economy providers implement.
//!
//! Providers own account state and persistence. Consumers never call these
//! methods directly: the host dispatcher validates inputs, marshals each call
//! onto the context the provider nominates, and wraps the outcome in a
//! [`Response`](crate::Response).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::account::{Account, AccountId, TransactionCause};
use crate::amount::Amount;
use crate::currency::CurrencySet;
use crate::key::Capability;
use crate::response::EconomyFailure;

/// Capability under which economy providers register.
pub const ECONOMY: Capability<dyn EconomyProvider> = Capability::new("economy");

/// Outcome of a provider call before it is wrapped into a `Response`.
pub type ProviderResult<T> = Result<T, EconomyFailure>;

/// Optional features a provider declares up front.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProviderCapabilities {
    /// Accounts keyed by [`AccountId::NonPlayer`] are supported.
    pub non_player_accounts: bool,
    /// Currencies other than the primary one may be used.
    pub multi_currency: bool,
    /// Withdrawals may take a balance below zero.
    pub negative_balances: bool,
}

/// Execution context a provider requires its calls to run on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionContext {
    /// The host's single privileged context for shared state.
    Primary,
    /// Any background worker context.
    #[default]
    Worker,
}

/// An economy implementation.
///
/// Inputs arrive pre-validated: amounts are positive, currency identifiers
/// exist in [`EconomyProvider::currencies`], and capability checks have
/// passed. Providers are still responsible for business rules that depend on
/// their state, such as [`EconomyFailure::InsufficientFunds`], and for
/// serializing operations on the same account.
#[async_trait]
pub trait EconomyProvider: Send + Sync + 'static {
    fn capabilities(&self) -> ProviderCapabilities;

    /// Context every call on this provider must run on.
    fn execution_context(&self) -> ExecutionContext {
        ExecutionContext::Worker
    }

    fn currencies(&self) -> &CurrencySet;

    async fn account_exists(&self, id: &AccountId) -> ProviderResult<bool>;

    /// Fails with [`EconomyFailure::AccountAlreadyExists`] if present.
    async fn create_account(&self, id: &AccountId, name: Option<&str>) -> ProviderResult<Account>;

    /// Fails with [`EconomyFailure::AccountNotFound`] if absent.
    async fn account(&self, id: &AccountId) -> ProviderResult<Account>;

    async fn account_ids(&self) -> ProviderResult<Vec<AccountId>>;

    async fn balance(&self, id: &AccountId, currency: &str) -> ProviderResult<Amount>;

    /// Adds `amount` and returns the new balance.
    async fn deposit(
        &self,
        id: &AccountId,
        currency: &str,
        amount: Amount,
        cause: &TransactionCause,
    ) -> ProviderResult<Amount>;

    /// Subtracts `amount` and returns the new balance.
    async fn withdraw(
        &self,
        id: &AccountId,
        currency: &str,
        amount: Amount,
        cause: &TransactionCause,
    ) -> ProviderResult<Amount>;
}
