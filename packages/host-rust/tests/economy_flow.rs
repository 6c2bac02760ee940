//! End-to-end economy flow through a host context: provider registration,
//! account operations, transfers, provider swaps and a concurrent
//! registration storm.

use std::sync::Arc;
use std::time::Duration;

use coffer_core::{
    AccountId, Amount, Capability, Currency, CurrencySet, EconomyFailure, EconomyProvider,
    ExecutionContext, Priority, TransactionCause, ECONOMY,
};
use coffer_host::{HostContext, MemoryEconomy, ServiceRegistry, TokioScheduler};
use uuid::Uuid;

fn currencies() -> CurrencySet {
    CurrencySet::new([
        Currency::new("dollar", "Dollar", "Dollars", 2).primary(),
        Currency::new("token", "Token", "Tokens", 0).with_conversion_rate(0.25),
    ])
    .unwrap()
}

fn host() -> HostContext {
    HostContext::builder(coffer_core::PluginVersion::parse("1.0.0"), "integration")
        .scheduler(Arc::new(TokioScheduler::new()))
        .build()
}

fn provider(context: ExecutionContext) -> Arc<dyn EconomyProvider> {
    Arc::new(MemoryEconomy::new(currencies()).with_execution_context(context))
}

#[tokio::test]
async fn full_account_lifecycle() {
    let host = host();
    host.register(ECONOMY, provider(ExecutionContext::Primary), Priority::Normal, "bank-plugin")
        .unwrap();
    let economy = host.economy();

    let player = AccountId::Player(Uuid::new_v4());
    let shop = AccountId::NonPlayer("general-store".into());
    let cause = TransactionCause::plugin("shops").with_reason("purchase");

    let wallet = economy.create_account(&player, Some("Notch")).await.into_value();
    let till = economy.create_account(&shop, None).await.into_value();

    assert_eq!(
        *wallet.deposit("dollar", Amount::from_minor(10_000), cause.clone()).await.value(),
        Amount::from_minor(10_000)
    );
    assert!(wallet
        .transfer_to(till.id(), "dollar", Amount::from_minor(2_599), cause.clone())
        .await
        .is_success());

    assert_eq!(*wallet.balance("dollar").await.value(), Amount::from_minor(7_401));
    assert_eq!(*till.balance("dollar").await.value(), Amount::from_minor(2_599));
    assert_eq!(*till.balance("token").await.value(), Amount::ZERO);

    let ids = economy.account_ids().await.into_value();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&player) && ids.contains(&shop));

    let currencies = economy.currencies().into_value();
    let primary = currencies.primary();
    assert_eq!(primary.display(Amount::from_minor(7_401)), "74.01 Dollars");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_deposits_on_one_account_are_not_lost() {
    let host = host();
    host.register(ECONOMY, provider(ExecutionContext::Worker), Priority::Normal, "bank-plugin")
        .unwrap();
    let economy = host.economy();
    let id = AccountId::NonPlayer("treasury".into());
    let account = economy.create_account(&id, None).await.into_value();

    let pending: Vec<_> = (1..=100)
        .map(|n| account.deposit("dollar", Amount::from_minor(n), TransactionCause::server()))
        .collect();

    let mut balances = Vec::with_capacity(pending.len());
    for p in pending {
        balances.push(p.await.into_value().minor());
    }

    // Issued in order on one account, so each deposit sees every earlier one.
    let expected: Vec<i64> = (1..=100).map(|n| n * (n + 1) / 2).collect();
    assert_eq!(balances, expected);
}

#[tokio::test]
async fn swapping_providers_invalidates_handles_and_migrates() {
    let host = host();
    let old = host
        .register(ECONOMY, provider(ExecutionContext::Worker), Priority::Normal, "legacy")
        .unwrap();
    let economy = host.economy();
    let id = AccountId::Player(Uuid::new_v4());
    let account = economy.create_account(&id, None).await.into_value();
    account
        .deposit("dollar", Amount::from_minor(4_200), TransactionCause::server())
        .await
        .into_value();

    host.register(ECONOMY, provider(ExecutionContext::Primary), Priority::High, "modern")
        .unwrap();
    assert_eq!(
        account.balance("dollar").await.reason(),
        Some(&EconomyFailure::StaleAccountHandle)
    );

    let report = host.migrate_accounts("legacy", "modern").await.into_value();
    assert_eq!(report.migrated, 1);

    let fresh = economy.account(&id).await.into_value();
    assert_eq!(fresh.registrant(), "modern");
    assert_eq!(*fresh.balance("dollar").await.value(), Amount::from_minor(4_200));

    // Unloading the new provider falls back to the old one.
    host.registry().unregister_all("modern");
    assert!(!fresh.is_current());
    assert!(host.registry().is_current(&old));
    assert_eq!(economy.describe().value().registrant, "legacy");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn existence_lookups_do_not_accumulate_lanes() {
    let host = host();
    host.register(ECONOMY, provider(ExecutionContext::Worker), Priority::Normal, "bank-plugin")
        .unwrap();
    let economy = host.economy();

    for _ in 0..2_000 {
        let id = AccountId::Player(Uuid::new_v4());
        assert!(!economy.account_exists(&id).await.into_value());
    }
    assert_eq!(host.dispatcher().active_lanes(), 0);
}

#[tokio::test]
async fn callbacks_run_on_the_requested_context() {
    let host = host();
    host.register(ECONOMY, provider(ExecutionContext::Worker), Priority::Normal, "bank-plugin")
        .unwrap();
    let economy = host.economy();
    let (tx, rx) = tokio::sync::oneshot::channel();

    economy
        .account(&AccountId::NonPlayer("missing".into()))
        .on_complete(ExecutionContext::Primary, move |response| {
            let _ = tx.send(response.reason().cloned());
        });

    let reason = tokio::time::timeout(Duration::from_secs(5), rx).await.unwrap().unwrap();
    assert_eq!(
        reason,
        Some(EconomyFailure::AccountNotFound(AccountId::NonPlayer("missing".into())))
    );
}

// ---------------------------------------------------------------------------
// Registry storm
// ---------------------------------------------------------------------------

trait Tagged: Send + Sync {
    fn tag(&self) -> &str;
    fn priority(&self) -> Priority;
}

struct Tag {
    name: String,
    priority: Priority,
}

impl Tagged for Tag {
    fn tag(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> Priority {
        self.priority
    }
}

const TAGGED: Capability<dyn Tagged> = Capability::new("tagged");

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_storm_never_exposes_torn_registrations() {
    let registry = Arc::new(ServiceRegistry::new());

    let writers: Vec<_> = (0..8)
        .map(|w| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for n in 0..200 {
                    let priority = Priority::ALL[rand::random_range(0..Priority::ALL.len())];
                    let name = format!("writer-{w}-{n}");
                    let implementation = Arc::new(Tag {
                        name: name.clone(),
                        priority,
                    }) as Arc<dyn Tagged>;
                    let handle =
                        registry.register(TAGGED, implementation, priority, &name).unwrap();
                    if n % 2 == 0 {
                        assert!(registry.unregister(&handle));
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..2_000 {
                    if let Some(active) = registry.resolve(TAGGED) {
                        assert_eq!(active.tag(), active.registrant());
                        assert_eq!(active.priority(), active.info().priority);
                    }
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for task in writers.into_iter().chain(readers) {
        task.await.unwrap();
    }

    // 8 writers kept every odd-numbered registration.
    let live = registry.registrations(TAGGED);
    assert_eq!(live.len(), 8 * 100);
    let best = live.iter().map(|i| (std::cmp::Reverse(i.priority), i.sequence)).min().unwrap();
    let active = registry.resolve(TAGGED).unwrap();
    assert_eq!((std::cmp::Reverse(active.info().priority), active.info().sequence), best);
}
