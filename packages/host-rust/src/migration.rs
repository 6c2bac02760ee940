//! Copying accounts between two registered economy providers.
//!
//! Used when a server switches economy plugins: every account of the source
//! provider is created on the target and each non-zero balance copied, as a
//! deposit or, for debts, a withdrawal. Accounts the target already has are
//! left alone. An account is only created once the target is known to
//! accept all of its balances.

use std::sync::Arc;

use coffer_core::{
    Account, AccountId, Amount, EconomyFailure, EconomyProvider, ProviderResult, Response,
    TransactionCause, ECONOMY,
};
use serde::Serialize;

use crate::config::DebugCategory;
use crate::dispatch::{Dispatcher, Pending};
use crate::economy;
use crate::registry::ServiceRegistry;

/// Outcome of [`migrate_accounts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Accounts created on the target with all balances copied.
    pub migrated: usize,
    /// Accounts the target already had, or cannot hold.
    pub skipped: usize,
    /// Accounts that could not be fully copied, with the first failure.
    pub failed: Vec<(AccountId, String)>,
}

enum AccountOutcome {
    Migrated,
    Skipped,
}

/// Migrates every account from the provider registered by `from` to the one
/// registered by `to`. Neither needs to be the active provider.
///
/// Fails as a whole only if either provider is missing or the source cannot
/// list its accounts; per-account problems are collected in the report.
pub fn migrate_accounts(
    registry: &ServiceRegistry,
    dispatcher: &Arc<Dispatcher>,
    from: &str,
    to: &str,
) -> Pending<MigrationReport> {
    if from == to {
        return dispatcher.fail(EconomyFailure::UnsupportedOperation(format!(
            "cannot migrate '{from}' into itself"
        )));
    }
    let Some(source) = registry.resolve_registrant(ECONOMY, from) else {
        return dispatcher.fail(not_registered(from));
    };
    let Some(target) = registry.resolve_registrant(ECONOMY, to) else {
        return dispatcher.fail(not_registered(to));
    };

    let source = Arc::clone(source.implementation());
    let target = Arc::clone(target.implementation());
    let cause = TransactionCause::server().with_reason(format!("migration from {from}"));
    let from = from.to_string();
    let to = to.to_string();
    let dispatcher = Arc::clone(dispatcher);

    Pending::spawn(Arc::clone(dispatcher.scheduler()), async move {
        let ids = match dispatcher
            .submit(
                Arc::clone(&source),
                None,
                "account_ids",
                Box::new(|p| Box::pin(async move { p.account_ids().await })),
            )
            .await
            .into_result()
        {
            Ok(ids) => ids,
            Err(reason) => return Response::failure(reason),
        };

        let mut report = MigrationReport::default();
        for id in ids {
            match migrate_one(&dispatcher, &source, &target, &id, &cause).await {
                Ok(AccountOutcome::Migrated) => report.migrated += 1,
                Ok(AccountOutcome::Skipped) => report.skipped += 1,
                Err(reason) => {
                    dispatcher.logger().warn(&format!("could not migrate {id}: {reason}"));
                    report.failed.push((id, reason.to_string()));
                }
            }
        }

        dispatcher.logger().info(&format!(
            "migrated {} accounts from '{from}' to '{to}' ({} skipped, {} failed)",
            report.migrated,
            report.skipped,
            report.failed.len()
        ));
        Response::success(report)
    })
}

async fn migrate_one(
    dispatcher: &Dispatcher,
    source: &Arc<dyn EconomyProvider>,
    target: &Arc<dyn EconomyProvider>,
    id: &AccountId,
    cause: &TransactionCause,
) -> ProviderResult<AccountOutcome> {
    if !id.is_player() && !target.capabilities().non_player_accounts {
        dispatcher.debug(DebugCategory::Migration, || {
            format!("skipping {id}: target has no non-player accounts")
        });
        return Ok(AccountOutcome::Skipped);
    }

    let call_id = id.clone();
    let present = dispatcher
        .submit(
            Arc::clone(target),
            Some(id),
            "account_exists",
            Box::new(move |p| Box::pin(async move { p.account_exists(&call_id).await })),
        )
        .await
        .into_result()?;
    if present {
        return Ok(skip_present(dispatcher, id));
    }

    let call_id = id.clone();
    let account: Account = dispatcher
        .submit(
            Arc::clone(source),
            Some(id),
            "account",
            Box::new(move |p| Box::pin(async move { p.account(&call_id).await })),
        )
        .await
        .into_result()?;

    let balances = plan_balances(target.as_ref(), &account)?;

    let call_id = id.clone();
    let name = account.name.clone();
    let created = dispatcher
        .submit(
            Arc::clone(target),
            Some(id),
            "create_account",
            Box::new(move |p| {
                Box::pin(async move { p.create_account(&call_id, name.as_deref()).await })
            }),
        )
        .await
        .into_result();
    match created {
        Ok(_) => {}
        Err(EconomyFailure::AccountAlreadyExists(_)) => return Ok(skip_present(dispatcher, id)),
        Err(reason) => return Err(reason),
    }

    for (currency, amount) in balances {
        if let Err(reason) = copy_balance(dispatcher, target, id, currency, amount, cause).await {
            dispatcher.logger().error(&format!(
                "{id} was created on the target but only partially copied: {reason}"
            ));
            return Err(reason);
        }
    }
    dispatcher.debug(DebugCategory::Migration, || format!("migrated {id}"));
    Ok(AccountOutcome::Migrated)
}

fn skip_present(dispatcher: &Dispatcher, id: &AccountId) -> AccountOutcome {
    dispatcher.debug(DebugCategory::Migration, || {
        format!("skipping {id}: already present on target")
    });
    AccountOutcome::Skipped
}

/// The non-zero balances of `account`, once `target` is known to accept
/// every one of them.
fn plan_balances(
    target: &dyn EconomyProvider,
    account: &Account,
) -> ProviderResult<Vec<(String, Amount)>> {
    let mut balances = Vec::new();
    for (currency, amount) in &account.balances {
        if *amount == Amount::ZERO {
            continue;
        }
        economy::validate(target, &account.id, Some(currency.as_str()), None)?;
        if amount.is_negative() && !target.capabilities().negative_balances {
            return Err(EconomyFailure::UnsupportedOperation(format!(
                "target does not allow negative balances, {} owes {amount} {currency}",
                account.id
            )));
        }
        balances.push((currency.clone(), *amount));
    }
    Ok(balances)
}

/// Brings the target's balance from zero to `amount`.
async fn copy_balance(
    dispatcher: &Dispatcher,
    target: &Arc<dyn EconomyProvider>,
    id: &AccountId,
    currency: String,
    amount: Amount,
    cause: &TransactionCause,
) -> ProviderResult<Amount> {
    let call_id = id.clone();
    let cause = cause.clone();
    if amount.is_positive() {
        return dispatcher
            .submit(
                Arc::clone(target),
                Some(id),
                "deposit",
                Box::new(move |p| {
                    Box::pin(async move { p.deposit(&call_id, &currency, amount, &cause).await })
                }),
            )
            .await
            .into_result();
    }

    let debt = amount
        .minor()
        .checked_neg()
        .map(Amount::from_minor)
        .ok_or_else(|| EconomyFailure::BalanceOverflow { account: id.clone() })?;
    dispatcher
        .submit(
            Arc::clone(target),
            Some(id),
            "withdraw",
            Box::new(move |p| {
                Box::pin(async move { p.withdraw(&call_id, &currency, debt, &cause).await })
            }),
        )
        .await
        .into_result()
}

fn not_registered(registrant: &str) -> EconomyFailure {
    EconomyFailure::Other(format!("no economy provider registered by '{registrant}'"))
}
