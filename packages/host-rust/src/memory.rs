//! In-memory [`EconomyProvider`] backed by [`DashMap`].
//!
//! Balances live only as long as the value does. Useful as a default
//! provider for hosts without persistence and as the provider tests run
//! against.

use async_trait::async_trait;
use coffer_core::{
    Account, AccountId, Amount, CurrencySet, EconomyFailure, EconomyProvider, ExecutionContext,
    ProviderCapabilities, ProviderResult, TransactionCause,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Concurrent in-memory economy.
///
/// Each mutation holds the account's shard lock for the duration of the
/// update, so concurrent deposits and withdrawals on one account never lose
/// writes.
pub struct MemoryEconomy {
    currencies: CurrencySet,
    capabilities: ProviderCapabilities,
    context: ExecutionContext,
    accounts: DashMap<AccountId, Account>,
}

impl MemoryEconomy {
    /// Creates an empty economy that supports non-player accounts and, when
    /// more than one currency is given, multiple currencies.
    #[must_use]
    pub fn new(currencies: CurrencySet) -> Self {
        let capabilities = ProviderCapabilities {
            non_player_accounts: true,
            multi_currency: currencies.len() > 1,
            negative_balances: false,
        };
        Self {
            currencies,
            capabilities,
            context: ExecutionContext::Worker,
            accounts: DashMap::new(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn with_execution_context(mut self, context: ExecutionContext) -> Self {
        self.context = context;
        self
    }

    /// Number of accounts held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn check_currency(&self, currency: &str) -> ProviderResult<()> {
        if self.currencies.contains(currency) {
            Ok(())
        } else {
            Err(EconomyFailure::UnknownCurrency(currency.to_string()))
        }
    }

    /// Applies `update` to the account's balance in `currency`.
    fn adjust(
        &self,
        id: &AccountId,
        currency: &str,
        update: impl FnOnce(Amount) -> ProviderResult<Amount>,
    ) -> ProviderResult<Amount> {
        self.check_currency(currency)?;
        let mut account = self
            .accounts
            .get_mut(id)
            .ok_or_else(|| EconomyFailure::AccountNotFound(id.clone()))?;
        let next = update(account.balance(currency))?;
        account.balances.insert(currency.to_string(), next);
        Ok(next)
    }
}

#[async_trait]
impl EconomyProvider for MemoryEconomy {
    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn execution_context(&self) -> ExecutionContext {
        self.context
    }

    fn currencies(&self) -> &CurrencySet {
        &self.currencies
    }

    async fn account_exists(&self, id: &AccountId) -> ProviderResult<bool> {
        Ok(self.accounts.contains_key(id))
    }

    async fn create_account(&self, id: &AccountId, name: Option<&str>) -> ProviderResult<Account> {
        match self.accounts.entry(id.clone()) {
            Entry::Occupied(_) => Err(EconomyFailure::AccountAlreadyExists(id.clone())),
            Entry::Vacant(slot) => {
                let account = Account::new(id.clone(), name.map(str::to_string));
                slot.insert(account.clone());
                Ok(account)
            }
        }
    }

    async fn account(&self, id: &AccountId) -> ProviderResult<Account> {
        self.accounts
            .get(id)
            .map(|a| a.clone())
            .ok_or_else(|| EconomyFailure::AccountNotFound(id.clone()))
    }

    async fn account_ids(&self) -> ProviderResult<Vec<AccountId>> {
        let mut ids: Vec<AccountId> = self.accounts.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn balance(&self, id: &AccountId, currency: &str) -> ProviderResult<Amount> {
        self.check_currency(currency)?;
        self.accounts
            .get(id)
            .map(|a| a.balance(currency))
            .ok_or_else(|| EconomyFailure::AccountNotFound(id.clone()))
    }

    async fn deposit(
        &self,
        id: &AccountId,
        currency: &str,
        amount: Amount,
        cause: &TransactionCause,
    ) -> ProviderResult<Amount> {
        let balance = self.adjust(id, currency, |balance| {
            balance
                .checked_add(amount)
                .ok_or_else(|| EconomyFailure::BalanceOverflow { account: id.clone() })
        })?;
        tracing::trace!(account = %id, currency, %amount, initiator = ?cause.initiator, "deposit");
        Ok(balance)
    }

    async fn withdraw(
        &self,
        id: &AccountId,
        currency: &str,
        amount: Amount,
        cause: &TransactionCause,
    ) -> ProviderResult<Amount> {
        let allow_negative = self.capabilities.negative_balances;
        let balance = self.adjust(id, currency, |balance| {
            let next = balance
                .checked_sub(amount)
                .ok_or_else(|| EconomyFailure::BalanceOverflow { account: id.clone() })?;
            if next.is_negative() && !allow_negative {
                return Err(EconomyFailure::InsufficientFunds {
                    account: id.clone(),
                    balance,
                    requested: amount,
                });
            }
            Ok(next)
        })?;
        tracing::trace!(account = %id, currency, %amount, initiator = ?cause.initiator, "withdraw");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use coffer_core::Currency;
    use uuid::Uuid;

    use super::*;

    fn economy() -> MemoryEconomy {
        MemoryEconomy::new(
            CurrencySet::new([
                Currency::new("coin", "Coin", "Coins", 2).primary(),
                Currency::new("gem", "Gem", "Gems", 0),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn create_then_duplicate_fails() {
        let economy = economy();
        let id = AccountId::Player(Uuid::new_v4());
        let account = economy.create_account(&id, Some("Steve")).await.unwrap();
        assert_eq!(account.name.as_deref(), Some("Steve"));
        assert_eq!(
            economy.create_account(&id, None).await,
            Err(EconomyFailure::AccountAlreadyExists(id.clone()))
        );
        assert_eq!(economy.len(), 1);
    }

    #[tokio::test]
    async fn deposit_withdraw_round_trip() {
        let economy = economy();
        let id = AccountId::NonPlayer("bank".into());
        let cause = TransactionCause::server();
        economy.create_account(&id, None).await.unwrap();

        assert_eq!(
            economy.deposit(&id, "coin", Amount::from_minor(500), &cause).await,
            Ok(Amount::from_minor(500))
        );
        assert_eq!(
            economy.withdraw(&id, "coin", Amount::from_minor(200), &cause).await,
            Ok(Amount::from_minor(300))
        );
        assert_eq!(economy.balance(&id, "gem").await, Ok(Amount::ZERO));
    }

    #[tokio::test]
    async fn overdraft_is_rejected_and_balance_kept() {
        let economy = economy();
        let id = AccountId::NonPlayer("bank".into());
        let cause = TransactionCause::server();
        economy.create_account(&id, None).await.unwrap();
        economy.deposit(&id, "coin", Amount::from_minor(10), &cause).await.unwrap();

        assert_eq!(
            economy.withdraw(&id, "coin", Amount::from_minor(11), &cause).await,
            Err(EconomyFailure::InsufficientFunds {
                account: id.clone(),
                balance: Amount::from_minor(10),
                requested: Amount::from_minor(11),
            })
        );
        assert_eq!(economy.balance(&id, "coin").await, Ok(Amount::from_minor(10)));
    }

    #[tokio::test]
    async fn negative_balances_when_enabled() {
        let economy = economy().with_capabilities(ProviderCapabilities {
            negative_balances: true,
            ..ProviderCapabilities::default()
        });
        let id = AccountId::NonPlayer("debtor".into());
        economy.create_account(&id, None).await.unwrap();
        assert_eq!(
            economy
                .withdraw(&id, "coin", Amount::from_minor(5), &TransactionCause::server())
                .await,
            Ok(Amount::from_minor(-5))
        );
    }

    #[tokio::test]
    async fn overflow_and_missing_accounts() {
        let economy = economy();
        let id = AccountId::NonPlayer("rich".into());
        let cause = TransactionCause::server();
        economy.create_account(&id, None).await.unwrap();
        economy.deposit(&id, "coin", Amount::from_minor(i64::MAX), &cause).await.unwrap();

        assert_eq!(
            economy.deposit(&id, "coin", Amount::from_minor(1), &cause).await,
            Err(EconomyFailure::BalanceOverflow { account: id.clone() })
        );
        let ghost = AccountId::NonPlayer("ghost".into());
        assert_eq!(
            economy.balance(&ghost, "coin").await,
            Err(EconomyFailure::AccountNotFound(ghost.clone()))
        );
        assert_eq!(
            economy.balance(&id, "dust").await,
            Err(EconomyFailure::UnknownCurrency("dust".into()))
        );
    }

    #[tokio::test]
    async fn account_ids_are_sorted() {
        let economy = economy();
        for name in ["b", "a", "c"] {
            economy
                .create_account(&AccountId::NonPlayer(name.into()), None)
                .await
                .unwrap();
        }
        let ids = economy.account_ids().await.unwrap();
        assert_eq!(
            ids,
            vec![
                AccountId::NonPlayer("a".into()),
                AccountId::NonPlayer("b".into()),
                AccountId::NonPlayer("c".into()),
            ]
        );
    }
}
