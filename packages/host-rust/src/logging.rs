//! `tracing`-backed logging for hosts that have no logger of their own.

use tracing_subscriber::EnvFilter;

use crate::traits::Logger;

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs a global `tracing` subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `default_filter`
/// (e.g. `"info,coffer_host=debug"`).
///
/// # Errors
///
/// Returns an error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_tracing(default_filter: &str, format: LogFormat) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

/// [`Logger`] that forwards to `tracing` events tagged with the host name.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    source: String,
}

impl TracingLogger {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl Logger for TracingLogger {
    fn info(&self, message: &str) {
        tracing::info!(source = %self.source, "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(source = %self.source, "{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!(source = %self.source, "{message}");
    }

    fn error_with_cause(&self, message: &str, cause: &anyhow::Error) {
        tracing::error!(source = %self.source, cause = %format!("{cause:#}"), "{message}");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;

    use super::Logger;

    /// Logger that records every line for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingLogger {
        pub(crate) lines: Mutex<Vec<(&'static str, String)>>,
    }

    impl RecordingLogger {
        pub(crate) fn contains(&self, level: &str, needle: &str) -> bool {
            self.lines
                .lock()
                .iter()
                .any(|(l, m)| *l == level && m.contains(needle))
        }
    }

    impl Logger for RecordingLogger {
        fn info(&self, message: &str) {
            self.lines.lock().push(("info", message.to_string()));
        }

        fn warn(&self, message: &str) {
            self.lines.lock().push(("warn", message.to_string()));
        }

        fn error(&self, message: &str) {
            self.lines.lock().push(("error", message.to_string()));
        }

        fn error_with_cause(&self, message: &str, cause: &anyhow::Error) {
            self.lines
                .lock()
                .push(("error", format!("{message}: {cause:#}")));
        }
    }
}
