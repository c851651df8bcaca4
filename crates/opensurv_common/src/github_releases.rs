// GitHub Releases API Client
//
// Asks the upstream repository for its latest release and decides whether
// this installation should update.

use crate::error::{UpdateError, UpdateResult};
use crate::version::{compare, compare_strict, Comparison};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// GitHub release payload (only the fields we read)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl GitHubRelease {
    /// Version from tag name (strip 'v' prefix)
    pub fn version(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }

    /// Find asset by name pattern
    pub fn find_asset(&self, pattern: &str) -> Option<&GitHubAsset> {
        self.assets.iter().find(|a| a.name.contains(pattern))
    }

    /// Archive to install: a designated asset if one matches, else the source zipball
    pub fn download_url(&self, asset_pattern: Option<&str>) -> Option<String> {
        if let Some(asset) = asset_pattern.and_then(|p| self.find_asset(p)) {
            return Some(asset.browser_download_url.clone());
        }
        self.zipball_url.clone()
    }
}

/// Release as seen by the updater
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub version: String,
    pub notes: String,
    pub download_url: String,
}

/// Outcome of one update check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateCheckResult {
    UpToDate {
        current_version: String,
        latest_version: String,
    },
    UpdateAvailable {
        latest_version: String,
        notes: String,
        download_url: String,
    },
    /// One of the versions is not a dotted-integer version
    Indeterminate {
        current_version: String,
        latest_version: String,
    },
    CheckFailed {
        reason: String,
    },
}

impl UpdateCheckResult {
    pub fn is_update_available(&self) -> bool {
        matches!(self, UpdateCheckResult::UpdateAvailable { .. })
    }
}

/// Release checker for one GitHub repository
#[derive(Debug, Clone)]
pub struct ReleaseFetcher {
    repo_owner: String,
    repo_name: String,
    api_base: String,
    user_agent: String,
    timeout: Duration,
    asset_pattern: Option<String>,
    assume_newer_on_unparseable: bool,
}

impl ReleaseFetcher {
    pub fn new(repo_owner: impl Into<String>, repo_name: impl Into<String>) -> Self {
        Self {
            repo_owner: repo_owner.into(),
            repo_name: repo_name.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: format!("opensurv-manager/{}", crate::VERSION),
            timeout: DEFAULT_CHECK_TIMEOUT,
            asset_pattern: None,
            assume_newer_on_unparseable: false,
        }
    }

    /// Point at another API host (GitHub Enterprise, test servers)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_asset_pattern(mut self, pattern: Option<String>) -> Self {
        self.asset_pattern = pattern.filter(|p| !p.is_empty());
        self
    }

    /// Treat unparseable versions as newer instead of reporting `Indeterminate`
    pub fn assume_newer_on_unparseable(mut self, enabled: bool) -> Self {
        self.assume_newer_on_unparseable = enabled;
        self
    }

    pub fn latest_release_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base, self.repo_owner, self.repo_name
        )
    }

    /// Get latest release (excluding prereleases)
    pub async fn get_latest_release(&self) -> UpdateResult<GitHubRelease> {
        let url = self.latest_release_url();
        debug!("Fetching {}", url);

        let client = reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()?;

        let response = client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UpdateError::Network(format!(
                "GitHub API returned {}",
                response.status()
            )));
        }

        response
            .json::<GitHubRelease>()
            .await
            .map_err(|e| UpdateError::Network(format!("Failed to parse release JSON: {}", e)))
    }

    /// Latest release reduced to what the updater needs
    pub async fn fetch_release(&self) -> UpdateResult<ReleaseInfo> {
        let release = self.get_latest_release().await?;
        let download_url = release
            .download_url(self.asset_pattern.as_deref())
            .ok_or_else(|| {
                UpdateError::Network(format!(
                    "Release {} has no downloadable archive",
                    release.tag_name
                ))
            })?;

        Ok(ReleaseInfo {
            tag: release.tag_name.clone(),
            version: release.version().to_string(),
            notes: release.body.clone().unwrap_or_default(),
            download_url,
        })
    }

    /// Check whether a newer release than `current_version` exists.
    ///
    /// Never fails: transport and API problems become `CheckFailed`.
    pub async fn check_for_update(&self, current_version: &str) -> UpdateCheckResult {
        let release = match self.fetch_release().await {
            Ok(r) => r,
            Err(e) => {
                warn!("Update check failed: {}", e);
                return UpdateCheckResult::CheckFailed {
                    reason: e.to_string(),
                };
            }
        };

        let outcome = self.classify(release, current_version);
        info!("Update check: {:?}", outcome);
        outcome
    }

    fn classify(&self, release: ReleaseInfo, current_version: &str) -> UpdateCheckResult {
        let comparison = match compare_strict(&release.version, current_version) {
            Ok(c) => c,
            Err(e) if self.assume_newer_on_unparseable => {
                debug!("Unparseable version ({}), using fallback comparison", e);
                compare(&release.version, current_version)
            }
            Err(e) => {
                warn!(
                    "Cannot compare release '{}' with current '{}': {}",
                    release.version, current_version, e
                );
                return UpdateCheckResult::Indeterminate {
                    current_version: current_version.to_string(),
                    latest_version: release.version,
                };
            }
        };

        match comparison {
            Comparison::Greater => UpdateCheckResult::UpdateAvailable {
                latest_version: release.version,
                notes: release.notes,
                download_url: release.download_url,
            },
            Comparison::Equal | Comparison::Less => UpdateCheckResult::UpToDate {
                current_version: current_version.to_string(),
                latest_version: release.version,
            },
        }
    }
}
