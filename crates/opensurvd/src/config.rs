//! Configuration management for opensurvd.
//!
//! Loads settings from /etc/opensurv-manager/config.toml (or a path given
//! on the command line) or uses defaults.

use anyhow::{Context, Result};
use opensurv_common::{ReleaseFetcher, GITHUB_OWNER, GITHUB_REPO};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// System config file path
pub const CONFIG_PATH: &str = "/etc/opensurv-manager/config.toml";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_PATH: &str = "opensurv-manager.toml";

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6453
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Self-update configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default = "default_repo_owner")]
    pub repo_owner: String,

    #[serde(default = "default_repo_name")]
    pub repo_name: String,

    /// Release API host
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Release check timeout in seconds
    #[serde(default = "default_check_timeout")]
    pub check_timeout_secs: u64,

    /// Whole-archive download timeout in seconds
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Delay between launching the installer and exiting
    #[serde(default = "default_exit_delay")]
    pub exit_delay_ms: u64,

    /// Release asset to prefer over the source zipball (substring match)
    #[serde(default)]
    pub asset_pattern: Option<String>,

    /// Report unparseable release tags as updates instead of "indeterminate"
    #[serde(default)]
    pub assume_newer_on_unparseable: bool,

    /// Start script in the install dir used to relaunch (platform default if unset)
    #[serde(default)]
    pub relaunch_wrapper: Option<String>,

    /// Install/working directory (current directory if unset)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Version to report instead of the build version
    #[serde(default)]
    pub current_version: Option<String>,
}

fn default_repo_owner() -> String {
    GITHUB_OWNER.to_string()
}

fn default_repo_name() -> String {
    GITHUB_REPO.to_string()
}

fn default_api_base() -> String {
    opensurv_common::github_releases::DEFAULT_API_BASE.to_string()
}

fn default_check_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    300
}

fn default_exit_delay() -> u64 {
    1000
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            repo_owner: default_repo_owner(),
            repo_name: default_repo_name(),
            api_base: default_api_base(),
            check_timeout_secs: default_check_timeout(),
            download_timeout_secs: default_download_timeout(),
            exit_delay_ms: default_exit_delay(),
            asset_pattern: None,
            assume_newer_on_unparseable: false,
            relaunch_wrapper: None,
            work_dir: None,
            current_version: None,
        }
    }
}

impl UpdateConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn exit_delay(&self) -> Duration {
        Duration::from_millis(self.exit_delay_ms)
    }

    pub fn current_version(&self) -> &str {
        self.current_version
            .as_deref()
            .unwrap_or(opensurv_common::VERSION)
    }

    /// Release checker for the configured repository and policy
    pub fn release_fetcher(&self) -> ReleaseFetcher {
        ReleaseFetcher::new(&self.repo_owner, &self.repo_name)
            .with_api_base(&self.api_base)
            .with_timeout(self.check_timeout())
            .with_asset_pattern(self.asset_pattern.clone())
            .assume_newer_on_unparseable(self.assume_newer_on_unparseable)
    }

    /// Working directory, resolved against the process's current directory
    pub fn work_dir(&self) -> Result<PathBuf> {
        let cwd = std::env::current_dir().context("cannot read current directory")?;
        Ok(match &self.work_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => cwd.join(dir),
            None => cwd,
        })
    }
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub update: UpdateConfig,

    /// File this config was read from (absolute), if any
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Config {
    /// Load config from an explicit path, else the default locations, else defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }

        Ok(Self::load_from_path(Path::new(CONFIG_PATH))
            .or_else(|_| Self::load_from_path(Path::new(LOCAL_CONFIG_PATH)))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            }))
    }

    /// Load config from specific path
    fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let mut config: Config =
            toml::from_str(&content).with_context(|| format!("invalid config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        config.source = Some(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}
