//! Runtime settings and debug categories.
//!
//! Hosts deserialize [`RawSettings`] from whatever format they store
//! (YAML, TOML, JSON) and hand it to [`Settings::from_raw`]. Unknown debug
//! category names are collected as [`ParseCategoryError`]s and skipped; a
//! bad entry never fails the whole load.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;

use crate::traits::ConfigAdapter;

/// Areas whose debug output can be switched on individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugCategory {
    Registry,
    Dispatch,
    Migration,
    UpdateChecker,
}

impl DebugCategory {
    pub const ALL: [DebugCategory; 4] = [
        DebugCategory::Registry,
        DebugCategory::Dispatch,
        DebugCategory::Migration,
        DebugCategory::UpdateChecker,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DebugCategory::Registry => "registry",
            DebugCategory::Dispatch => "dispatch",
            DebugCategory::Migration => "migration",
            DebugCategory::UpdateChecker => "update_checker",
        }
    }
}

impl fmt::Display for DebugCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured debug category name that matches no [`DebugCategory`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid debug category '{input}' at 'debug.enabled-categories'")]
pub struct ParseCategoryError {
    pub input: String,
}

impl FromStr for DebugCategory {
    type Err = ParseCategoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_");
        DebugCategory::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| ParseCategoryError {
                input: s.to_string(),
            })
    }
}

/// Settings as read from the host's configuration file, before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawSettings {
    #[serde(default = "default_true", alias = "checkForUpdates")]
    pub check_for_updates: bool,
    #[serde(default)]
    pub debug: RawDebugSettings,
    #[serde(default)]
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawDebugSettings {
    #[serde(default)]
    pub enabled_categories: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for RawSettings {
    fn default() -> Self {
        Self {
            check_for_updates: true,
            debug: RawDebugSettings::default(),
            operation_timeout_ms: None,
        }
    }
}

/// Validated runtime settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Whether to poll the release feed on startup.
    pub check_for_updates: bool,
    pub enabled_categories: Vec<DebugCategory>,
    /// Upper bound on a single provider call in milliseconds.
    pub operation_timeout_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_for_updates: true,
            enabled_categories: Vec::new(),
            operation_timeout_ms: 30_000,
        }
    }
}

impl Settings {
    /// Validates raw settings, returning the settings plus every entry that
    /// had to be skipped.
    #[must_use]
    pub fn from_raw(raw: RawSettings) -> (Self, Vec<ParseCategoryError>) {
        let mut errors = Vec::new();
        let mut enabled_categories = Vec::new();
        for name in &raw.debug.enabled_categories {
            match name.parse::<DebugCategory>() {
                Ok(category) if !enabled_categories.contains(&category) => {
                    enabled_categories.push(category);
                }
                Ok(_) => {}
                Err(e) => errors.push(e),
            }
        }

        let settings = Self {
            check_for_updates: raw.check_for_updates,
            enabled_categories,
            operation_timeout_ms: raw
                .operation_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(Settings::default().operation_timeout_ms),
        };
        (settings, errors)
    }

    #[must_use]
    pub fn is_debug_enabled(&self, category: DebugCategory) -> bool {
        self.enabled_categories.contains(&category)
    }
}

/// [`ConfigAdapter`] holding settings in memory; `replace` swaps them atomically.
#[derive(Debug)]
pub struct StaticConfig {
    settings: ArcSwap<Settings>,
}

impl StaticConfig {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: ArcSwap::from_pointee(settings),
        }
    }

    /// Validates `raw`, logs every skipped entry, and installs the result.
    pub fn load(&self, raw: RawSettings) {
        let (settings, errors) = Settings::from_raw(raw);
        for error in errors {
            tracing::error!(%error, "skipping invalid settings entry");
        }
        self.replace(settings);
    }

    pub fn replace(&self, settings: Settings) {
        self.settings.store(Arc::new(settings));
    }
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl ConfigAdapter for StaticConfig {
    fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_defaults() {
        let settings = Settings::default();
        assert!(settings.check_for_updates);
        assert!(settings.enabled_categories.is_empty());
        assert_eq!(settings.operation_timeout_ms, 30_000);
    }

    #[test]
    fn category_names_parse_leniently() {
        assert_eq!("REGISTRY".parse::<DebugCategory>(), Ok(DebugCategory::Registry));
        assert_eq!("update-checker".parse::<DebugCategory>(), Ok(DebugCategory::UpdateChecker));
        assert_eq!("update_checker".parse::<DebugCategory>(), Ok(DebugCategory::UpdateChecker));
    }

    #[test]
    fn unknown_categories_are_collected_not_fatal() {
        let raw: RawSettings = serde_json::from_value(serde_json::json!({
            "check-for-updates": false,
            "debug": {
                "enabled-categories": ["registry", "bogus", "migration", "registry", "nope"]
            }
        }))
        .unwrap();

        let (settings, errors) = Settings::from_raw(raw);
        assert!(!settings.check_for_updates);
        assert_eq!(
            settings.enabled_categories,
            vec![DebugCategory::Registry, DebugCategory::Migration]
        );
        let bad: Vec<_> = errors.iter().map(|e| e.input.as_str()).collect();
        assert_eq!(bad, vec!["bogus", "nope"]);
    }

    #[test]
    fn camel_case_update_flag_is_accepted() {
        let raw: RawSettings =
            serde_json::from_value(serde_json::json!({ "checkForUpdates": false })).unwrap();
        assert!(!raw.check_for_updates);
    }

    #[test]
    fn zero_timeout_falls_back_to_default() {
        let raw = RawSettings {
            operation_timeout_ms: Some(0),
            ..RawSettings::default()
        };
        assert_eq!(Settings::from_raw(raw).0.operation_timeout_ms, 30_000);
    }

    #[test]
    fn static_config_load_replaces_snapshot() {
        let config = StaticConfig::default();
        let before = config.settings();
        config.load(RawSettings {
            check_for_updates: false,
            ..RawSettings::default()
        });
        assert!(before.check_for_updates);
        assert!(!config.settings().check_for_updates);
    }
}
