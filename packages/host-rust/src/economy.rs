//! Consumer-facing economy API.
//!
//! [`EconomyHub`] resolves the current economy provider on every call and
//! dispatches through the shared [`Dispatcher`]. [`AccountHandle`]s are
//! bound to the provider they were obtained from; once that provider is no
//! longer the resolved one, every operation on the handle fails with
//! [`EconomyFailure::StaleAccountHandle`].

use std::fmt;
use std::sync::Arc;

use coffer_core::{
    AccountId, Amount, CurrencySet, EconomyFailure, EconomyProvider, ExecutionContext, Priority,
    ProviderCapabilities, Response, TransactionCause, ECONOMY,
};
use serde::Serialize;

use crate::dispatch::{Dispatcher, Pending};
use crate::registry::{ActiveProvider, ProviderChange, ServiceRegistry};

type Provider = ActiveProvider<dyn EconomyProvider>;

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks that `provider` can serve an operation with these inputs.
pub(crate) fn validate(
    provider: &dyn EconomyProvider,
    id: &AccountId,
    currency: Option<&str>,
    amount: Option<Amount>,
) -> Result<(), EconomyFailure> {
    if let Some(amount) = amount {
        if !amount.is_positive() {
            return Err(EconomyFailure::NegativeAmount { amount });
        }
    }

    let capabilities = provider.capabilities();
    if !id.is_player() && !capabilities.non_player_accounts {
        return Err(EconomyFailure::UnsupportedOperation(format!(
            "provider does not support non-player account {id}"
        )));
    }

    if let Some(currency) = currency {
        let currencies = provider.currencies();
        if !currencies.contains(currency) {
            return Err(EconomyFailure::UnknownCurrency(currency.to_string()));
        }
        if currencies.primary().identifier != currency && !capabilities.multi_currency {
            return Err(EconomyFailure::UnsupportedOperation(format!(
                "provider only supports its primary currency, not '{currency}'"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operations shared by the hub and account handles
// ---------------------------------------------------------------------------

fn balance(
    dispatcher: &Dispatcher,
    provider: Arc<dyn EconomyProvider>,
    id: AccountId,
    currency: String,
) -> Pending<Amount> {
    if let Err(reason) = validate(provider.as_ref(), &id, Some(&currency), None) {
        return dispatcher.fail(reason);
    }
    let lane = id.clone();
    dispatcher.submit(
        provider,
        Some(&lane),
        "balance",
        Box::new(move |p| Box::pin(async move { p.balance(&id, &currency).await })),
    )
}

fn deposit(
    dispatcher: &Dispatcher,
    provider: Arc<dyn EconomyProvider>,
    id: AccountId,
    currency: String,
    amount: Amount,
    cause: TransactionCause,
) -> Pending<Amount> {
    if let Err(reason) = validate(provider.as_ref(), &id, Some(&currency), Some(amount)) {
        return dispatcher.fail(reason);
    }
    let lane = id.clone();
    dispatcher.submit(
        provider,
        Some(&lane),
        "deposit",
        Box::new(move |p| {
            Box::pin(async move { p.deposit(&id, &currency, amount, &cause).await })
        }),
    )
}

fn withdraw(
    dispatcher: &Dispatcher,
    provider: Arc<dyn EconomyProvider>,
    id: AccountId,
    currency: String,
    amount: Amount,
    cause: TransactionCause,
) -> Pending<Amount> {
    if let Err(reason) = validate(provider.as_ref(), &id, Some(&currency), Some(amount)) {
        return dispatcher.fail(reason);
    }
    let lane = id.clone();
    dispatcher.submit(
        provider,
        Some(&lane),
        "withdraw",
        Box::new(move |p| {
            Box::pin(async move { p.withdraw(&id, &currency, amount, &cause).await })
        }),
    )
}

/// Withdraw from `from`, then deposit into `to`. If the deposit fails, the
/// withdrawn amount is deposited back into `from` and the deposit's failure
/// is returned.
fn transfer(
    dispatcher: &Arc<Dispatcher>,
    provider: Arc<dyn EconomyProvider>,
    from: AccountId,
    to: AccountId,
    currency: String,
    amount: Amount,
    cause: TransactionCause,
) -> Pending<()> {
    if let Err(reason) = validate(provider.as_ref(), &to, Some(&currency), Some(amount)) {
        return dispatcher.fail(reason);
    }
    // Takes the ticket on `from` now so the transfer is ordered with the
    // caller's other operations on that account.
    let withdrawal = withdraw(
        dispatcher,
        Arc::clone(&provider),
        from.clone(),
        currency.clone(),
        amount,
        cause.clone(),
    );

    let dispatcher = Arc::clone(dispatcher);
    Pending::spawn(Arc::clone(dispatcher.scheduler()), async move {
        if let Err(reason) = withdrawal.await.into_result() {
            return Response::failure(reason);
        }

        let deposited = deposit(
            &dispatcher,
            Arc::clone(&provider),
            to.clone(),
            currency.clone(),
            amount,
            cause.clone(),
        )
        .await;
        let Err(reason) = deposited.into_result() else {
            return Response::success(());
        };

        let rollback = cause.with_reason(format!("rollback of transfer to {to}"));
        let refund = deposit(&dispatcher, provider, from.clone(), currency, amount, rollback);
        if let Err(refund_failure) = refund.await.into_result() {
            dispatcher.logger().error(&format!(
                "transfer {from} -> {to} failed ({reason}) and refunding {amount} to {from} \
                 also failed: {refund_failure}"
            ));
        }
        Response::failure(reason)
    })
}

// ---------------------------------------------------------------------------
// EconomyHub
// ---------------------------------------------------------------------------

/// Summary of the active provider, as shown by an info command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderDescription {
    pub registrant: String,
    pub priority: Priority,
    pub capabilities: ProviderCapabilities,
    pub execution_context: ExecutionContext,
    pub primary_currency: String,
    pub currencies: Vec<String>,
    /// Other registrants waiting behind the active one, best first.
    pub standby: Vec<String>,
}

/// Entry point for economy consumers.
#[derive(Clone)]
pub struct EconomyHub {
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl EconomyHub {
    pub fn new(registry: Arc<ServiceRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { registry, dispatcher }
    }

    /// The currently resolved provider, if any.
    #[must_use]
    pub fn provider(&self) -> Option<Provider> {
        self.registry.resolve(ECONOMY)
    }

    fn with_provider<T: Send + 'static>(
        &self,
        op: impl FnOnce(Provider) -> Pending<T>,
    ) -> Pending<T> {
        match self.provider() {
            Some(provider) => op(provider),
            None => self.dispatcher.fail(EconomyFailure::ProviderAbsent),
        }
    }

    #[must_use]
    pub fn capabilities(&self) -> Response<ProviderCapabilities> {
        self.provider().map_or_else(
            || Response::failure(EconomyFailure::ProviderAbsent),
            |p| Response::success(p.capabilities()),
        )
    }

    #[must_use]
    pub fn currencies(&self) -> Response<CurrencySet> {
        self.provider().map_or_else(
            || Response::failure(EconomyFailure::ProviderAbsent),
            |p| Response::success(p.currencies().clone()),
        )
    }

    /// Describes the active provider and who else is registered.
    #[must_use]
    pub fn describe(&self) -> Response<ProviderDescription> {
        let Some(provider) = self.provider() else {
            return Response::failure(EconomyFailure::ProviderAbsent);
        };
        let standby = self
            .registry
            .registrations(ECONOMY)
            .into_iter()
            .filter(|info| info.sequence != provider.info().sequence)
            .map(|info| info.registrant.to_string())
            .collect();
        let currencies = provider.currencies();
        Response::success(ProviderDescription {
            registrant: provider.registrant().to_string(),
            priority: provider.info().priority,
            capabilities: provider.capabilities(),
            execution_context: provider.execution_context(),
            primary_currency: currencies.primary().identifier.clone(),
            currencies: currencies.iter().map(|c| c.identifier.clone()).collect(),
            standby,
        })
    }

    pub fn account_exists(&self, id: &AccountId) -> Pending<bool> {
        self.with_provider(|provider| {
            if let Err(reason) = validate(&*provider, id, None, None) {
                return self.dispatcher.fail(reason);
            }
            let id = id.clone();
            let lane = id.clone();
            self.dispatcher.submit(
                Arc::clone(provider.implementation()),
                Some(&lane),
                "account_exists",
                Box::new(move |p| Box::pin(async move { p.account_exists(&id).await })),
            )
        })
    }

    /// Creates an account. Fails with `AccountAlreadyExists` if present.
    pub fn create_account(&self, id: &AccountId, name: Option<&str>) -> Pending<AccountHandle> {
        self.with_provider(|provider| {
            if let Err(reason) = validate(&*provider, id, None, None) {
                return self.dispatcher.fail(reason);
            }
            let handle = self.handle(provider.clone(), id.clone());
            let id = id.clone();
            let name = name.map(str::to_string);
            self.dispatcher
                .submit(
                    Arc::clone(provider.implementation()),
                    Some(&handle.id),
                    "create_account",
                    Box::new(move |p| {
                        Box::pin(async move { p.create_account(&id, name.as_deref()).await })
                    }),
                )
                .map(move |_| handle)
        })
    }

    /// Looks up an existing account. Fails with `AccountNotFound` if absent.
    pub fn account(&self, id: &AccountId) -> Pending<AccountHandle> {
        self.with_provider(|provider| {
            if let Err(reason) = validate(&*provider, id, None, None) {
                return self.dispatcher.fail(reason);
            }
            let handle = self.handle(provider.clone(), id.clone());
            let id = id.clone();
            self.dispatcher
                .submit(
                    Arc::clone(provider.implementation()),
                    Some(&handle.id),
                    "account",
                    Box::new(move |p| Box::pin(async move { p.account(&id).await })),
                )
                .map(move |_| handle)
        })
    }

    pub fn account_ids(&self) -> Pending<Vec<AccountId>> {
        self.with_provider(|provider| {
            self.dispatcher.submit(
                Arc::clone(provider.implementation()),
                None,
                "account_ids",
                Box::new(|p| Box::pin(async move { p.account_ids().await })),
            )
        })
    }

    /// Moves `amount` from `from` to `to` on the current provider.
    ///
    /// Not atomic: other operations on either account may interleave between
    /// the withdrawal and the deposit.
    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        currency: &str,
        amount: Amount,
        cause: TransactionCause,
    ) -> Pending<()> {
        self.with_provider(|provider| {
            transfer(
                &self.dispatcher,
                Arc::clone(provider.implementation()),
                from.clone(),
                to.clone(),
                currency.to_string(),
                amount,
                cause,
            )
        })
    }

    /// Invokes `callback` on the primary context every time the resolved
    /// economy provider changes, in the order the changes happened.
    pub fn on_provider_change<F>(&self, callback: F)
    where
        F: Fn(ProviderChange) + Send + Sync + 'static,
    {
        let mut changes = self.registry.subscribe(ECONOMY);
        let callback = Arc::new(callback);
        let scheduler = Arc::clone(self.dispatcher.scheduler());
        self.dispatcher.scheduler().run_on_worker(Box::pin(async move {
            while let Some(change) = changes.recv().await {
                let callback = Arc::clone(&callback);
                scheduler.run_on_primary(Box::pin(async move { callback(change) }));
            }
        }));
    }

    fn handle(&self, provider: Provider, id: AccountId) -> AccountHandle {
        AccountHandle {
            id,
            provider,
            registry: Arc::clone(&self.registry),
            dispatcher: Arc::clone(&self.dispatcher),
        }
    }
}

// ---------------------------------------------------------------------------
// AccountHandle
// ---------------------------------------------------------------------------

/// An account on the provider it was obtained from.
#[derive(Clone)]
pub struct AccountHandle {
    id: AccountId,
    provider: Provider,
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl AccountHandle {
    #[must_use]
    pub fn id(&self) -> &AccountId {
        &self.id
    }

    /// Registrant of the provider this handle is bound to.
    #[must_use]
    pub fn registrant(&self) -> &str {
        self.provider.registrant()
    }

    /// Whether the bound provider is still the resolved one.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.registry.is_current(&self.provider.handle())
    }

    fn live_provider(&self) -> Result<Arc<dyn EconomyProvider>, EconomyFailure> {
        if self.is_current() {
            Ok(Arc::clone(self.provider.implementation()))
        } else {
            Err(EconomyFailure::StaleAccountHandle)
        }
    }

    pub fn balance(&self, currency: &str) -> Pending<Amount> {
        match self.live_provider() {
            Ok(provider) => {
                balance(&self.dispatcher, provider, self.id.clone(), currency.to_string())
            }
            Err(reason) => self.dispatcher.fail(reason),
        }
    }

    /// Adds `amount` and yields the new balance.
    pub fn deposit(
        &self,
        currency: &str,
        amount: Amount,
        cause: TransactionCause,
    ) -> Pending<Amount> {
        match self.live_provider() {
            Ok(provider) => deposit(
                &self.dispatcher,
                provider,
                self.id.clone(),
                currency.to_string(),
                amount,
                cause,
            ),
            Err(reason) => self.dispatcher.fail(reason),
        }
    }

    /// Subtracts `amount` and yields the new balance.
    pub fn withdraw(
        &self,
        currency: &str,
        amount: Amount,
        cause: TransactionCause,
    ) -> Pending<Amount> {
        match self.live_provider() {
            Ok(provider) => withdraw(
                &self.dispatcher,
                provider,
                self.id.clone(),
                currency.to_string(),
                amount,
                cause,
            ),
            Err(reason) => self.dispatcher.fail(reason),
        }
    }

    /// Moves `amount` from this account to `to`. See [`EconomyHub::transfer`].
    pub fn transfer_to(
        &self,
        to: &AccountId,
        currency: &str,
        amount: Amount,
        cause: TransactionCause,
    ) -> Pending<()> {
        match self.live_provider() {
            Ok(provider) => transfer(
                &self.dispatcher,
                provider,
                self.id.clone(),
                to.clone(),
                currency.to_string(),
                amount,
                cause,
            ),
            Err(reason) => self.dispatcher.fail(reason),
        }
    }
}

impl fmt::Debug for AccountHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountHandle")
            .field("id", &self.id)
            .field("registrant", &self.provider.registrant())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
