//! Operation dispatcher.
//!
//! Every provider call goes through [`Dispatcher::submit`], which:
//! 1. takes a ticket on the account's lane at issue time, so operations on
//!    one account run in the order they were received;
//! 2. hops onto the provider's nominated [`ExecutionContext`];
//! 3. turns timeouts, panics and dropped tasks into FAILURE responses;
//! 4. completes the caller's [`Pending`].
//!
//! The calling context never runs provider code.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use coffer_core::{
    AccountId, EconomyFailure, EconomyProvider, ExecutionContext, ProviderResult, Response,
};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::{oneshot, watch};

use crate::config::DebugCategory;
use crate::traits::{ConfigAdapter, Logger, Scheduler};

// ---------------------------------------------------------------------------
// Pending
// ---------------------------------------------------------------------------

/// Future resolving to the [`Response`] of a dispatched operation.
///
/// Dropping it discards the result; the operation itself still runs to
/// completion.
#[must_use = "a Pending does nothing to the result unless awaited or given a callback"]
pub struct Pending<T> {
    rx: oneshot::Receiver<Response<T>>,
    scheduler: Arc<dyn Scheduler>,
}

impl<T: Send + 'static> Pending<T> {
    /// A pending that is already complete.
    pub fn ready(response: Response<T>, scheduler: Arc<dyn Scheduler>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(response);
        Self { rx, scheduler }
    }

    /// Completes `self` from `future`, which runs on a worker context.
    pub(crate) fn spawn<F>(scheduler: Arc<dyn Scheduler>, future: F) -> Self
    where
        F: Future<Output = Response<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        scheduler.run_on_worker(Box::pin(async move {
            let _ = tx.send(future.await);
        }));
        Self { rx, scheduler }
    }

    /// Transforms a successful value once it arrives.
    pub fn map<U, F>(self, f: F) -> Pending<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let scheduler = Arc::clone(&self.scheduler);
        Pending::spawn(scheduler, async move { self.await.map(f) })
    }

    /// Invokes `callback` with the response on `context` once it is available.
    pub fn on_complete<F>(self, context: ExecutionContext, callback: F)
    where
        F: FnOnce(Response<T>) + Send + 'static,
    {
        let scheduler = Arc::clone(&self.scheduler);
        scheduler.run_on_worker(Box::pin(async move {
            let scheduler = Arc::clone(&self.scheduler);
            let response = self.await;
            scheduler.run_on(context, Box::pin(async move { callback(response) }));
        }));
    }
}

impl<T> Future for Pending<T> {
    type Output = Response<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Response::failure(EconomyFailure::Dropped)))
    }
}

// ---------------------------------------------------------------------------
// Account lanes
// ---------------------------------------------------------------------------

/// Ticket queue for one account: operations run when `serving` reaches
/// their ticket.
struct Lane {
    next_ticket: AtomicU64,
    serving: watch::Sender<u64>,
}

type Lanes = Arc<DashMap<AccountId, Arc<Lane>>>;

impl Lane {
    fn new() -> Self {
        Self {
            next_ticket: AtomicU64::new(0),
            serving: watch::Sender::new(0),
        }
    }

    /// No ticket is outstanding.
    fn is_idle(&self) -> bool {
        *self.serving.borrow() == self.next_ticket.load(Ordering::Acquire)
    }
}

/// Takes the next ticket on `account`'s lane, creating the lane if needed.
/// Runs under the map's shard lock, so it cannot interleave with
/// [`TurnGuard`] removing an idle lane.
fn take_ticket(lanes: &Lanes, account: &AccountId) -> Ticket {
    let lane = lanes
        .entry(account.clone())
        .or_insert_with(|| Arc::new(Lane::new()));
    Ticket {
        number: lane.next_ticket.fetch_add(1, Ordering::AcqRel),
        lane: Arc::clone(lane.value()),
        account: account.clone(),
        lanes: Arc::clone(lanes),
    }
}

struct Ticket {
    lane: Arc<Lane>,
    number: u64,
    account: AccountId,
    lanes: Lanes,
}

impl Ticket {
    /// Waits for this ticket's turn. The returned guard passes the turn on
    /// when dropped, including when the operation task is torn down.
    async fn wait_turn(self) -> TurnGuard {
        let mut serving = self.lane.serving.subscribe();
        // The sender lives in `self.lane`, so the channel cannot close here.
        let _ = serving.wait_for(|current| *current == self.number).await;
        TurnGuard {
            lane: self.lane,
            account: self.account,
            lanes: self.lanes,
        }
    }
}

struct TurnGuard {
    lane: Arc<Lane>,
    account: AccountId,
    lanes: Lanes,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.lane.serving.send_modify(|current| *current += 1);
        // Idle lanes are dropped so the map only holds accounts with work
        // in flight. A later ticket recreates the lane from zero.
        self.lanes.remove_if(&self.account, |_, lane| {
            Arc::ptr_eq(lane, &self.lane) && lane.is_idle()
        });
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// A provider call, built by the caller and run on the provider's context.
pub type ProviderCall<T> =
    Box<dyn FnOnce(Arc<dyn EconomyProvider>) -> BoxFuture<'static, ProviderResult<T>> + Send>;

/// Routes provider calls onto their execution context.
///
/// One dispatcher is shared by every consumer of a host so that per-account
/// ordering holds across consumers.
pub struct Dispatcher {
    scheduler: Arc<dyn Scheduler>,
    config: Arc<dyn ConfigAdapter>,
    logger: Arc<dyn Logger>,
    lanes: Lanes,
}

impl Dispatcher {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        config: Arc<dyn ConfigAdapter>,
        logger: Arc<dyn Logger>,
    ) -> Self {
        Self {
            scheduler,
            config,
            logger,
            lanes: Arc::new(DashMap::new()),
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    /// Logs the message built by `message` if `category` is enabled.
    pub fn debug(&self, category: DebugCategory, message: impl FnOnce() -> String) {
        if self.config.settings().is_debug_enabled(category) {
            self.logger.info(&format!("[debug:{category}] {}", message()));
        }
    }

    /// Accounts with operations queued or running.
    #[must_use]
    pub fn active_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// A pending that completes immediately with `failure`.
    pub fn fail<T: Send + 'static>(&self, failure: EconomyFailure) -> Pending<T> {
        Pending::ready(Response::failure(failure), Arc::clone(&self.scheduler))
    }

    /// Dispatches `call` against `provider`.
    ///
    /// When `account` is given, the call is ordered after every earlier call
    /// submitted for the same account.
    pub fn submit<T: Send + 'static>(
        &self,
        provider: Arc<dyn EconomyProvider>,
        account: Option<&AccountId>,
        operation: &'static str,
        call: ProviderCall<T>,
    ) -> Pending<T> {
        let ticket = account.map(|id| take_ticket(&self.lanes, id));

        let timeout_ms = self.config.settings().operation_timeout_ms;
        self.debug(DebugCategory::Dispatch, || {
            let target = account.map_or_else(|| "-".to_string(), ToString::to_string);
            format!(
                "dispatch {operation} on {target} via {:?} context",
                provider.execution_context()
            )
        });

        let scheduler = Arc::clone(&self.scheduler);
        Pending::spawn(Arc::clone(&self.scheduler), async move {
            let _turn = match ticket {
                Some(ticket) => Some(ticket.wait_turn().await),
                None => None,
            };

            let (done_tx, done_rx) = oneshot::channel();
            let context = provider.execution_context();
            scheduler.run_on(
                context,
                Box::pin(async move {
                    let guarded = AssertUnwindSafe(call(provider)).catch_unwind();
                    let limit = Duration::from_millis(timeout_ms);
                    let result = match tokio::time::timeout(limit, guarded).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(panic)) => {
                            Err(EconomyFailure::ProviderFault(panic_message(panic.as_ref())))
                        }
                        Err(_) => Err(EconomyFailure::TimedOut { timeout_ms }),
                    };
                    let _ = done_tx.send(result);
                }),
            );

            match done_rx.await {
                Ok(result) => Response::from(result),
                Err(_) => Response::failure(EconomyFailure::Dropped),
            }
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "provider panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
