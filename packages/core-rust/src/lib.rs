//! Coffer Core: capability keys, plugin versions, the response envelope, and
//! the account/currency model shared by economy providers and consumers.

pub mod account;
pub mod amount;
pub mod currency;
pub mod key;
pub mod provider;
pub mod response;
pub mod version;

pub use account::{Account, AccountId, Initiator, TransactionCause};
pub use amount::Amount;
pub use currency::{Currency, CurrencySet, CurrencySetError, MAX_PRECISION};
pub use key::{Capability, ParsePriorityError, Priority, ServiceKey};
pub use provider::{
    EconomyProvider, ExecutionContext, ProviderCapabilities, ProviderResult, ECONOMY,
};
pub use response::{EconomyFailure, Response, ResponseKind};
pub use version::{PluginVersion, VersionComparison, VersionKind};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
