//! Tokio-backed [`Scheduler`].
//!
//! - **Primary context**: one long-lived tokio task draining an unbounded
//!   queue, awaiting each task to completion before starting the next one.
//! - **Worker context**: `tokio::spawn` on the runtime the scheduler was
//!   created in.

use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::traits::{Scheduler, Task};

// ---------------------------------------------------------------------------
// Primary context
// ---------------------------------------------------------------------------

/// The serialized context. A panicking task is logged and does not take the
/// context down with it.
struct PrimaryContext {
    queue: Option<mpsc::UnboundedSender<Task>>,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PrimaryContext {
    fn start(runtime: &Handle) -> Self {
        let (queue, mut tasks) = mpsc::unbounded_channel::<Task>();
        let (stop, mut stopped) = oneshot::channel::<()>();

        let handle = runtime.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    task = tasks.recv() => {
                        let Some(task) = task else { break };
                        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                            tracing::error!("task panicked on the primary context");
                        }
                    }
                }
            }
            tracing::debug!(dropped = tasks.len(), "primary context stopped");
        });

        Self {
            queue: Some(queue),
            stop: Some(stop),
            handle: Some(handle),
        }
    }

    fn submit(&self, task: Task) -> anyhow::Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("primary context stopped"))?;
        queue
            .send(task)
            .map_err(|_| anyhow::anyhow!("primary context queue closed"))
    }

    async fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.queue.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// TokioScheduler
// ---------------------------------------------------------------------------

/// [`Scheduler`] for hosts running on a tokio runtime.
pub struct TokioScheduler {
    primary: PrimaryContext,
    runtime: Handle,
}

impl TokioScheduler {
    /// Creates the scheduler on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        let runtime = Handle::current();
        Self {
            primary: PrimaryContext::start(&runtime),
            runtime,
        }
    }

    /// Stops the primary context. Queued primary tasks are dropped, which
    /// completes their pending operations as dropped.
    pub async fn shutdown(&mut self) {
        self.primary.stop().await;
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn run_on_primary(&self, task: Task) {
        if let Err(e) = self.primary.submit(task) {
            tracing::warn!(error = %e, "primary context unavailable, task dropped");
        }
    }

    fn run_on_worker(&self, task: Task) {
        self.runtime.spawn(task);
    }
}
