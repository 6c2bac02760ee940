//! Host context: the explicitly passed bundle of host services.
//!
//! A host bootstrap builds one [`HostContext`] and hands it (usually as
//! `Arc<HostContext>`) to every component that needs the registry, the
//! dispatcher, settings or logging. There is no global instance.

use std::sync::Arc;

use coffer_core::{Capability, PluginVersion, Priority};

use crate::config::{DebugCategory, Settings, StaticConfig};
use crate::dispatch::{Dispatcher, Pending};
use crate::economy::EconomyHub;
use crate::logging::TracingLogger;
use crate::migration::{self, MigrationReport};
use crate::registry::{RegistrationHandle, RegistryError, ServiceRegistry};
use crate::scheduler::TokioScheduler;
use crate::traits::{ConfigAdapter, Logger, Scheduler};
use crate::update::{self, ReleaseFeed, UpdateStatus};

/// Services shared by everything running inside one host.
pub struct HostContext {
    version: PluginVersion,
    platform: String,
    logger: Arc<dyn Logger>,
    scheduler: Arc<dyn Scheduler>,
    config: Arc<dyn ConfigAdapter>,
    registry: Arc<ServiceRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl HostContext {
    /// Starts building a context for a build of `version` running on `platform`.
    pub fn builder(version: PluginVersion, platform: impl Into<String>) -> HostContextBuilder {
        HostContextBuilder {
            version,
            platform: platform.into(),
            logger: None,
            scheduler: None,
            config: None,
            registry: None,
        }
    }

    #[must_use]
    pub fn version(&self) -> &PluginVersion {
        &self.version
    }

    #[must_use]
    pub fn platform(&self) -> &str {
        &self.platform
    }

    #[must_use]
    pub fn logger(&self) -> &Arc<dyn Logger> {
        &self.logger
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Current settings snapshot.
    #[must_use]
    pub fn settings(&self) -> Arc<Settings> {
        self.config.settings()
    }

    /// Logs `message` at info level when `category` is enabled.
    pub fn debug(&self, category: DebugCategory, message: impl FnOnce() -> String) {
        self.dispatcher.debug(category, message);
    }

    /// Registers a provider, reporting the outcome through the host logger.
    ///
    /// # Errors
    ///
    /// See [`ServiceRegistry::register`].
    pub fn register<T>(
        &self,
        capability: Capability<T>,
        implementation: Arc<T>,
        priority: Priority,
        registrant: &str,
    ) -> Result<RegistrationHandle, RegistryError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let result = self
            .registry
            .register(capability, implementation, priority, registrant);
        match &result {
            Ok(handle) => self.debug(DebugCategory::Registry, || {
                format!(
                    "{registrant} registered '{}' at {priority} (#{})",
                    handle.capability(),
                    handle.sequence()
                )
            }),
            Err(error) => self.logger.error(&error.to_string()),
        }
        result
    }

    /// Consumer API over the economy capability.
    #[must_use]
    pub fn economy(&self) -> EconomyHub {
        EconomyHub::new(Arc::clone(&self.registry), Arc::clone(&self.dispatcher))
    }

    /// Re-reads settings from the host's config adapter.
    ///
    /// # Errors
    ///
    /// Returns the adapter's error; the previous settings remain in effect.
    pub fn reload_settings(&self) -> anyhow::Result<()> {
        match self.config.reload() {
            Ok(()) => {
                self.logger.info("settings reloaded");
                Ok(())
            }
            Err(error) => {
                self.logger.error_with_cause("failed to reload settings", &error);
                Err(error)
            }
        }
    }

    /// See [`migration::migrate_accounts`].
    pub fn migrate_accounts(&self, from: &str, to: &str) -> Pending<MigrationReport> {
        migration::migrate_accounts(&self.registry, &self.dispatcher, from, to)
    }

    /// See [`update::check_for_updates`].
    pub fn check_for_updates(&self, feed: Arc<dyn ReleaseFeed>) -> Pending<UpdateStatus> {
        update::check_for_updates(self, feed)
    }
}

/// Builder for [`HostContext`]. Unset parts fall back to the tokio/tracing
/// defaults.
pub struct HostContextBuilder {
    version: PluginVersion,
    platform: String,
    logger: Option<Arc<dyn Logger>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    config: Option<Arc<dyn ConfigAdapter>>,
    registry: Option<Arc<ServiceRegistry>>,
}

impl HostContextBuilder {
    #[must_use]
    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    #[must_use]
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    #[must_use]
    pub fn config(mut self, config: Arc<dyn ConfigAdapter>) -> Self {
        self.config = Some(config);
        self
    }

    /// Shares an existing registry instead of creating a fresh one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Assembles the context.
    ///
    /// # Panics
    ///
    /// Panics if no scheduler was given and this is called outside of a
    /// tokio runtime.
    #[must_use]
    pub fn build(self) -> HostContext {
        let platform = self.platform.clone();
        let logger = self
            .logger
            .unwrap_or_else(|| Arc::new(TracingLogger::new(platform)) as Arc<dyn Logger>);
        let scheduler = self
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioScheduler::new()) as Arc<dyn Scheduler>);
        let config = self
            .config
            .unwrap_or_else(|| Arc::new(StaticConfig::default()) as Arc<dyn ConfigAdapter>);
        let registry = self.registry.unwrap_or_default();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&scheduler),
            Arc::clone(&config),
            Arc::clone(&logger),
        ));

        tracing::info!(
            version = %self.version,
            platform = %self.platform,
            "host context ready"
        );
        HostContext {
            version: self.version,
            platform: self.platform,
            logger,
            scheduler,
            config,
            registry,
            dispatcher,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use coffer_core::{Currency, CurrencySet, EconomyProvider, ECONOMY};

    use super::*;
    use crate::logging::testing::RecordingLogger;
    use crate::memory::MemoryEconomy;

    /// Adapter whose backing store can be made unreadable.
    struct FlakyConfig {
        inner: StaticConfig,
        broken: AtomicBool,
    }

    impl ConfigAdapter for FlakyConfig {
        fn settings(&self) -> Arc<Settings> {
            self.inner.settings()
        }

        fn reload(&self) -> anyhow::Result<()> {
            if self.broken.load(Ordering::SeqCst) {
                anyhow::bail!("settings file is not valid YAML");
            }
            self.inner.replace(Settings {
                enabled_categories: vec![DebugCategory::Registry],
                ..Settings::default()
            });
            Ok(())
        }
    }

    fn context_with(config: Arc<dyn ConfigAdapter>) -> (HostContext, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::default());
        let context = HostContext::builder(PluginVersion::parse("1.0.0"), "test")
            .logger(logger.clone())
            .config(config)
            .build();
        (context, logger)
    }

    #[tokio::test]
    async fn reload_applies_new_settings_and_gates_debug_output() {
        let config = Arc::new(FlakyConfig {
            inner: StaticConfig::default(),
            broken: AtomicBool::new(false),
        });
        let (context, logger) = context_with(config.clone());

        context.debug(DebugCategory::Registry, || "before".to_string());
        assert!(!logger.contains("info", "before"));

        context.reload_settings().unwrap();
        context.debug(DebugCategory::Registry, || "after".to_string());
        assert!(logger.contains("info", "[debug:registry] after"));

        config.broken.store(true, Ordering::SeqCst);
        assert!(context.reload_settings().is_err());
        assert!(logger.contains(
            "error",
            "failed to reload settings: settings file is not valid YAML"
        ));
        assert!(context.settings().is_debug_enabled(DebugCategory::Registry));
    }

    #[tokio::test]
    async fn builder_defaults() {
        let context = HostContext::builder(PluginVersion::parse("1.4.2"), "paper").build();
        assert_eq!(context.platform(), "paper");
        assert!(context.version().is_release());
        assert!(context.settings().check_for_updates);
        assert!(context.economy().provider().is_none());
    }

    #[tokio::test]
    async fn register_reports_through_host_logger() {
        let config = StaticConfig::new(Settings {
            enabled_categories: vec![DebugCategory::Registry],
            ..Settings::default()
        });
        let (context, logger) = context_with(Arc::new(config));
        let economy = || {
            let coin = Currency::new("coin", "Coin", "Coins", 2).primary();
            let currencies = CurrencySet::new([coin]).unwrap();
            Arc::new(MemoryEconomy::new(currencies)) as Arc<dyn EconomyProvider>
        };

        context.register(ECONOMY, economy(), Priority::Normal, "vault").unwrap();
        assert!(logger.contains("info", "vault registered 'economy' at normal"));

        assert!(context.register(ECONOMY, economy(), Priority::High, "vault").is_err());
        assert!(logger.contains("error", "'vault' already registered a provider for 'economy'"));
        assert_eq!(context.economy().describe().value().priority, Priority::Normal);
    }
}
