//! Plugin version model used by update checks.
//!
//! Versions are classified into three kinds:
//!
//! - **Release**: `MAJOR.MINOR` or `MAJOR.MINOR.PATCH`, all numeric
//! - **Development**: a release core followed by a qualifier, e.g.
//!   `1.3.0-SNAPSHOT` or `2.0.0-dev.4`
//! - **Malformed**: anything else
//!
//! Releases compare field-wise. Development builds compare by build
//! timestamp, which is an advisory signal only (clock skew and rebases make
//! it unreliable). Any comparison involving a malformed version is
//! [`VersionComparison::Unknown`].

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Classification of a parsed version string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionKind {
    Release,
    Development,
    Malformed,
}

/// Relation of one version to another, as returned by [`PluginVersion::compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionComparison {
    /// The receiver precedes the argument.
    Older,
    Equal,
    /// The receiver supersedes the argument.
    Newer,
    /// The versions cannot be ordered.
    Unknown,
}

impl From<Ordering> for VersionComparison {
    fn from(ordering: Ordering) -> Self {
        match ordering {
            Ordering::Less => VersionComparison::Older,
            Ordering::Equal => VersionComparison::Equal,
            Ordering::Greater => VersionComparison::Newer,
        }
    }
}

/// A parsed plugin version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub kind: VersionKind,
    /// Qualifier after the numeric core, without the separator.
    pub qualifier: Option<String>,
    /// The string this version was parsed from.
    pub raw: String,
    /// Build time embedded by the build pipeline, used to order development builds.
    pub build_timestamp: Option<DateTime<FixedOffset>>,
}

impl PluginVersion {
    /// Parses a version string. Never fails: unparseable input yields a
    /// [`VersionKind::Malformed`] version.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let (core, qualifier) = match trimmed.find(['-', '+']) {
            Some(idx) => (&trimmed[..idx], Some(&trimmed[idx + 1..])),
            None => (trimmed, None),
        };

        let Some((major, minor, patch)) = parse_core(core) else {
            tracing::warn!(version = raw, "malformed plugin version");
            return Self::malformed(raw);
        };

        let kind = match qualifier {
            None => VersionKind::Release,
            Some(q) if !q.is_empty() => VersionKind::Development,
            Some(_) => {
                tracing::warn!(version = raw, "plugin version has an empty qualifier");
                return Self::malformed(raw);
            }
        };

        Self {
            major,
            minor,
            patch,
            kind,
            qualifier: qualifier.map(str::to_string),
            raw: raw.to_string(),
            build_timestamp: None,
        }
    }

    fn malformed(raw: &str) -> Self {
        Self {
            major: 0,
            minor: 0,
            patch: 0,
            kind: VersionKind::Malformed,
            qualifier: None,
            raw: raw.to_string(),
            build_timestamp: None,
        }
    }

    /// Attaches the build timestamp of this artifact.
    #[must_use]
    pub fn with_build_timestamp(mut self, timestamp: DateTime<FixedOffset>) -> Self {
        self.build_timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn is_release(&self) -> bool {
        self.kind == VersionKind::Release
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        self.kind == VersionKind::Development
    }

    #[must_use]
    pub fn is_malformed(&self) -> bool {
        self.kind == VersionKind::Malformed
    }

    /// Compares `self` against `other`.
    ///
    /// `Older` means `self` precedes `other`; for an update check, calling
    /// `running.compare(&published)` and getting `Older` means an update is
    /// available.
    #[must_use]
    pub fn compare(&self, other: &PluginVersion) -> VersionComparison {
        match (self.kind, other.kind) {
            (VersionKind::Release, VersionKind::Release) => (self.major, self.minor, self.patch)
                .cmp(&(other.major, other.minor, other.patch))
                .into(),
            (VersionKind::Development, VersionKind::Development) => {
                match (self.build_timestamp, other.build_timestamp) {
                    (Some(ours), Some(theirs)) => ours.cmp(&theirs).into(),
                    _ => VersionComparison::Unknown,
                }
            }
            _ => VersionComparison::Unknown,
        }
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parses `MAJOR.MINOR[.PATCH]`.
fn parse_core(core: &str) -> Option<(u32, u32, u32)> {
    let mut parts = core.split('.');
    let major = parse_component(parts.next()?)?;
    let minor = parse_component(parts.next()?)?;
    let patch = match parts.next() {
        Some(p) => parse_component(p)?,
        None => 0,
    };
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

fn parse_component(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}
