//! Advisory update checks.
//!
//! Release builds compare against the version published on the store
//! listing. Development builds compare their embedded build timestamp with
//! the newest commit that was not marked `[ci skip]`. Transport or parse
//! problems skip the cycle with a warning; there are no retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use coffer_core::{EconomyFailure, PluginVersion, Response, VersionComparison, VersionKind};
use serde::{Deserialize, Serialize};

use crate::config::DebugCategory;
use crate::context::HostContext;
use crate::dispatch::{Dispatcher, Pending};

/// Commits whose message contains this marker are ignored.
const CI_SKIP: &str = "[ci skip]";

/// One entry of a commit-history feed.
#[derive(Debug, Clone, Deserialize)]
pub struct CommitRecord {
    pub commit: CommitDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitDetail {
    pub message: String,
    pub author: CommitAuthor,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitAuthor {
    /// RFC 3339 timestamp.
    pub date: String,
}

#[derive(Debug, Deserialize)]
struct Listing {
    current_version: String,
}

/// Where published versions come from.
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    /// Version string of the latest published release.
    async fn latest_release(&self) -> anyhow::Result<String>;

    /// Most recent commits, newest first.
    async fn recent_commits(&self) -> anyhow::Result<Vec<CommitRecord>>;
}

/// [`ReleaseFeed`] reading a JSON store listing and a JSON commit list over HTTP.
pub struct HttpReleaseFeed {
    client: reqwest::Client,
    listing_url: String,
    commits_url: String,
}

impl HttpReleaseFeed {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        listing_url: impl Into<String>,
        commits_url: impl Into<String>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("coffer/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            listing_url: listing_url.into(),
            commits_url: commits_url.into(),
        })
    }
}

#[async_trait]
impl ReleaseFeed for HttpReleaseFeed {
    async fn latest_release(&self) -> anyhow::Result<String> {
        let listing: Listing = self
            .client
            .get(&self.listing_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(listing.current_version)
    }

    async fn recent_commits(&self) -> anyhow::Result<Vec<CommitRecord>> {
        Ok(self
            .client
            .get(&self.commits_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

/// Result of an update check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UpdateStatus {
    /// `check-for-updates` is off.
    Disabled,
    UpToDate,
    /// A newer build is published.
    Outdated { latest: String },
    /// The running build is newer than anything published.
    Ahead { latest: String },
    /// The versions could not be ordered.
    Undetermined,
}

/// Runs one update check on a worker context.
///
/// A FAILURE response means the check was skipped this cycle; the reason
/// has already been logged as a warning.
pub fn check_for_updates(
    context: &HostContext,
    feed: Arc<dyn ReleaseFeed>,
) -> Pending<UpdateStatus> {
    let dispatcher = Arc::clone(context.dispatcher());
    if !context.settings().check_for_updates {
        let scheduler = Arc::clone(context.scheduler());
        return Pending::ready(Response::success(UpdateStatus::Disabled), scheduler);
    }
    let current = context.version().clone();
    Pending::spawn(Arc::clone(context.scheduler()), async move {
        let outcome = match current.kind {
            VersionKind::Release => check_release(&dispatcher, &current, feed.as_ref()).await,
            VersionKind::Development => {
                check_development(&dispatcher, &current, feed.as_ref()).await
            }
            VersionKind::Malformed => {
                dispatcher.logger().warn(&format!(
                    "running build has a malformed version '{current}'; skipping update check"
                ));
                Ok(UpdateStatus::Undetermined)
            }
        };
        match outcome {
            Ok(status) => Response::success(status),
            Err(error) => {
                dispatcher
                    .logger()
                    .warn(&format!("update check skipped: {error:#}"));
                Response::failure(EconomyFailure::Other(format!("update check skipped: {error}")))
            }
        }
    })
}

async fn check_release(
    dispatcher: &Dispatcher,
    current: &PluginVersion,
    feed: &dyn ReleaseFeed,
) -> anyhow::Result<UpdateStatus> {
    let raw = feed.latest_release().await?;
    let latest = PluginVersion::parse(&raw);
    dispatcher.debug(DebugCategory::UpdateChecker, || {
        format!("latest published release is '{raw}', running '{current}'")
    });

    let status = match current.compare(&latest) {
        VersionComparison::Older => {
            dispatcher.logger().warn(&format!(
                "a new update is available: v{latest} (running v{current}); \
                 please update as soon as possible"
            ));
            UpdateStatus::Outdated { latest: raw }
        }
        VersionComparison::Newer => {
            dispatcher
                .logger()
                .warn(&format!("running v{current}, which is newer than the published v{latest}"));
            UpdateStatus::Ahead { latest: raw }
        }
        VersionComparison::Equal => UpdateStatus::UpToDate,
        VersionComparison::Unknown => UpdateStatus::Undetermined,
    };
    Ok(status)
}

async fn check_development(
    dispatcher: &Dispatcher,
    current: &PluginVersion,
    feed: &dyn ReleaseFeed,
) -> anyhow::Result<UpdateStatus> {
    let commits = feed.recent_commits().await?;
    let Some(latest) = commits.iter().find(|c| !c.commit.message.contains(CI_SKIP)) else {
        dispatcher.logger().warn(
            "could not find a recent commit to compare this development build against; \
             check for updates manually",
        );
        return Ok(UpdateStatus::Undetermined);
    };
    let published: DateTime<FixedOffset> =
        DateTime::parse_from_rfc3339(&latest.commit.author.date)?;

    let Some(built) = current.build_timestamp else {
        dispatcher.debug(DebugCategory::UpdateChecker, || {
            format!("development build '{current}' carries no build timestamp")
        });
        return Ok(UpdateStatus::Undetermined);
    };
    dispatcher.debug(DebugCategory::UpdateChecker, || {
        format!("built at {built}, newest commit at {published}")
    });

    let latest = published.to_rfc3339();
    let status = match built.cmp(&published) {
        std::cmp::Ordering::Less => {
            dispatcher.logger().warn(
                "running an outdated development build; newer development builds may contain fixes",
            );
            UpdateStatus::Outdated { latest }
        }
        std::cmp::Ordering::Greater => UpdateStatus::Ahead { latest },
        std::cmp::Ordering::Equal => UpdateStatus::UpToDate,
    };
    Ok(status)
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::config::{Settings, StaticConfig};
    use crate::logging::testing::RecordingLogger;
    use crate::scheduler::TokioScheduler;

    struct FakeFeed {
        release: Option<String>,
        commits: Vec<(&'static str, &'static str)>,
        calls: Mutex<u32>,
    }

    impl FakeFeed {
        fn release(version: &str) -> Self {
            Self {
                release: Some(version.to_string()),
                commits: Vec::new(),
                calls: Mutex::new(0),
            }
        }

        fn commits(commits: Vec<(&'static str, &'static str)>) -> Self {
            Self {
                release: None,
                commits,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ReleaseFeed for FakeFeed {
        async fn latest_release(&self) -> anyhow::Result<String> {
            *self.calls.lock() += 1;
            self.release
                .clone()
                .ok_or_else(|| anyhow::anyhow!("connection refused"))
        }

        async fn recent_commits(&self) -> anyhow::Result<Vec<CommitRecord>> {
            *self.calls.lock() += 1;
            Ok(self
                .commits
                .iter()
                .map(|(message, date)| CommitRecord {
                    commit: CommitDetail {
                        message: (*message).to_string(),
                        author: CommitAuthor {
                            date: (*date).to_string(),
                        },
                    },
                })
                .collect())
        }
    }

    fn context(version: PluginVersion, check: bool) -> (HostContext, Arc<RecordingLogger>) {
        let logger = Arc::new(RecordingLogger::default());
        let context = HostContext::builder(version, "test")
            .logger(logger.clone())
            .scheduler(Arc::new(TokioScheduler::new()))
            .config(Arc::new(StaticConfig::new(Settings {
                check_for_updates: check,
                ..Settings::default()
            })))
            .build();
        (context, logger)
    }

    fn timestamp(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).unwrap()
    }

    #[tokio::test]
    async fn disabled_checks_do_not_touch_the_feed() {
        let (context, _) = context(PluginVersion::parse("1.0.0"), false);
        let feed = Arc::new(FakeFeed::release("2.0.0"));
        let status = check_for_updates(&context, feed.clone()).await.into_value();
        assert_eq!(status, UpdateStatus::Disabled);
        assert_eq!(*feed.calls.lock(), 0);
    }

    #[tokio::test]
    async fn release_builds_compare_with_listing() {
        let (context, logger) = context(PluginVersion::parse("1.2.0"), true);

        let outdated = check_for_updates(&context, Arc::new(FakeFeed::release("1.3.0"))).await;
        assert_eq!(
            outdated.into_value(),
            UpdateStatus::Outdated {
                latest: "1.3.0".into()
            }
        );
        assert!(logger.contains("warn", "a new update is available: v1.3.0"));

        let same = check_for_updates(&context, Arc::new(FakeFeed::release("1.2"))).await;
        assert_eq!(same.into_value(), UpdateStatus::UpToDate);

        let ahead = check_for_updates(&context, Arc::new(FakeFeed::release("1.1.9"))).await;
        assert_eq!(
            ahead.into_value(),
            UpdateStatus::Ahead {
                latest: "1.1.9".into()
            }
        );

        let garbage = check_for_updates(&context, Arc::new(FakeFeed::release("latest!"))).await;
        assert_eq!(garbage.into_value(), UpdateStatus::Undetermined);
    }

    #[tokio::test]
    async fn transport_failures_skip_the_cycle() {
        let (context, logger) = context(PluginVersion::parse("1.2.0"), true);
        let feed = Arc::new(FakeFeed {
            release: None,
            commits: Vec::new(),
            calls: Mutex::new(0),
        });
        let response = check_for_updates(&context, feed.clone()).await;
        assert!(response.is_failure());
        assert_eq!(*feed.calls.lock(), 1);
        assert!(logger.contains("warn", "update check skipped: connection refused"));
    }

    #[tokio::test]
    async fn development_builds_use_first_commit_without_ci_skip() {
        let version = PluginVersion::parse("2.0.0-SNAPSHOT")
            .with_build_timestamp(timestamp("2024-03-01T12:00:00+00:00"));
        let (context, _) = context(version, true);

        let newer = FakeFeed::commits(vec![
            ("docs tweak [ci skip]", "2024-05-01T00:00:00Z"),
            ("fix balance rounding", "2024-04-01T00:00:00Z"),
        ]);
        assert_eq!(
            check_for_updates(&context, Arc::new(newer)).await.into_value(),
            UpdateStatus::Outdated {
                latest: "2024-04-01T00:00:00+00:00".into()
            }
        );

        let older = FakeFeed::commits(vec![("initial", "2024-01-01T00:00:00+02:00")]);
        assert!(matches!(
            check_for_updates(&context, Arc::new(older)).await.into_value(),
            UpdateStatus::Ahead { .. }
        ));

        let same = FakeFeed::commits(vec![("release prep", "2024-03-01T14:00:00+02:00")]);
        assert_eq!(
            check_for_updates(&context, Arc::new(same)).await.into_value(),
            UpdateStatus::UpToDate
        );
    }

    #[tokio::test]
    async fn development_builds_without_usable_data_are_undetermined() {
        let (context, logger) = context(PluginVersion::parse("2.0.0-dev"), true);
        let only_skipped = FakeFeed::commits(vec![("chore [ci skip]", "2024-05-01T00:00:00Z")]);
        assert_eq!(
            check_for_updates(&context, Arc::new(only_skipped)).await.into_value(),
            UpdateStatus::Undetermined
        );
        assert!(logger.contains("warn", "check for updates manually"));

        let no_timestamp = FakeFeed::commits(vec![("feature", "2024-05-01T00:00:00Z")]);
        assert_eq!(
            check_for_updates(&context, Arc::new(no_timestamp)).await.into_value(),
            UpdateStatus::Undetermined
        );

        let bad_date = FakeFeed::commits(vec![("feature", "yesterday")]);
        assert!(check_for_updates(&context, Arc::new(bad_date)).await.is_failure());
    }

    #[tokio::test]
    async fn malformed_versions_are_undetermined() {
        let (context, logger) = context(PluginVersion::parse("banana"), true);
        let status = check_for_updates(&context, Arc::new(FakeFeed::release("1.0.0")))
            .await
            .into_value();
        assert_eq!(status, UpdateStatus::Undetermined);
        assert!(logger.contains("warn", "malformed version 'banana'"));
    }

    #[test]
    fn http_feed_builds() {
        let feed = HttpReleaseFeed::new("http://localhost/listing", "http://localhost/commits");
        assert!(feed.is_ok());
    }
}
