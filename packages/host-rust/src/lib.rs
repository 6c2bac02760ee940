//! Coffer Host: provider registry, operation dispatcher, scheduler boundary,
//! and the host services economy consumers and providers run against.

pub mod config;
pub mod context;
pub mod dispatch;
pub mod economy;
pub mod logging;
pub mod memory;
pub mod migration;
pub mod registry;
pub mod scheduler;
pub mod traits;
pub mod update;

pub use config::{DebugCategory, ParseCategoryError, RawSettings, Settings, StaticConfig};
pub use context::{HostContext, HostContextBuilder};
pub use dispatch::{Dispatcher, Pending, ProviderCall};
pub use economy::{AccountHandle, EconomyHub, ProviderDescription};
pub use logging::{init_tracing, LogFormat, TracingLogger};
pub use memory::MemoryEconomy;
pub use migration::{migrate_accounts, MigrationReport};
pub use registry::{
    ActiveProvider, ProviderChange, RegistrationHandle, RegistrationInfo, RegistryError,
    ServiceRegistry,
};
pub use scheduler::TokioScheduler;
pub use traits::{ConfigAdapter, Logger, Scheduler, Task};
pub use update::{check_for_updates, HttpReleaseFeed, ReleaseFeed, UpdateStatus};
