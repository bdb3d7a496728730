//! Release check against GitHub

use std::time::Duration;

use eyre::{Context, Result};
use serde::Deserialize;
use tracing::debug;

const REPO_OWNER: &str = "ops3000";
const REPO_NAME: &str = "ops-cli";

/// Version this binary was built as
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Deserialize)]
struct LatestRelease {
    tag_name: String,
    html_url: String,
}

/// A newer published release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableUpdate {
    pub current: semver::Version,
    pub latest: semver::Version,
    pub url: String,
}

/// Looks up the latest published release
pub struct ReleaseCheck {
    client: reqwest::Client,
    url: String,
}

impl ReleaseCheck {
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("fleetops/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(10))
            .build()
            .wrap_err("cannot build release check client")?;
        Ok(Self {
            client,
            url: format!("https://api.github.com/repos/{REPO_OWNER}/{REPO_NAME}/releases/latest"),
        })
    }

    /// `Some` when the latest release is newer than this binary
    ///
    /// # Errors
    /// Returns error if the release cannot be fetched or its tag is not a version
    pub async fn check(&self) -> Result<Option<AvailableUpdate>> {
        let release: LatestRelease = self
            .client
            .get(&self.url)
            .send()
            .await
            .wrap_err("cannot reach GitHub")?
            .error_for_status()
            .wrap_err("release lookup failed")?
            .json()
            .await
            .wrap_err("unexpected release payload")?;
        debug!(tag = %release.tag_name, "latest release");

        newer_release(CURRENT_VERSION, &release.tag_name).map(|found| {
            found.map(|(current, latest)| AvailableUpdate {
                current,
                latest,
                url: release.html_url,
            })
        })
    }
}

/// Compare a `vX.Y.Z` tag against the running version
fn newer_release(current: &str, tag: &str) -> Result<Option<(semver::Version, semver::Version)>> {
    let current = semver::Version::parse(current).wrap_err("invalid current version")?;
    let latest = semver::Version::parse(tag.trim_start_matches('v'))
        .wrap_err_with(|| format!("release tag `{tag}` is not a version"))?;
    Ok((latest > current).then_some((current, latest)))
}
