use std::sync::Arc;

use coffer_core::ExecutionContext;
use futures_util::future::BoxFuture;

use crate::config::Settings;

/// A unit of fire-and-forget work handed to the host scheduler.
pub type Task = BoxFuture<'static, ()>;

/// Host-provided execution contexts.
/// Implementations: `TokioScheduler` (tokio runtime), host adapters per platform.
///
/// Both operations are fire-and-forget: results flow back through channels
/// owned by the task, never through a join handle.
pub trait Scheduler: Send + Sync {
    /// Run a task on the host's single privileged context. Tasks submitted
    /// here execute one at a time in submission order.
    fn run_on_primary(&self, task: Task);

    /// Run a task on any background worker context.
    fn run_on_worker(&self, task: Task);

    /// Run a task on the given context.
    fn run_on(&self, context: ExecutionContext, task: Task) {
        match context {
            ExecutionContext::Primary => self.run_on_primary(task),
            ExecutionContext::Worker => self.run_on_worker(task),
        }
    }
}

/// Host log sink. Used for observability only, never for control flow.
pub trait Logger: Send + Sync {
    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    fn error(&self, message: &str);

    /// Log an error together with the fault that caused it.
    fn error_with_cause(&self, message: &str, cause: &anyhow::Error);
}

/// Source of parsed settings. Hosts parse their own files; the runtime only
/// reads the resulting flags.
pub trait ConfigAdapter: Send + Sync {
    /// Current settings snapshot.
    fn settings(&self) -> Arc<Settings>;

    /// Re-read settings from the host's backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read. The previous
    /// settings stay in effect.
    fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
