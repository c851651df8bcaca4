//! Pending-update marker
//!
//! `update_pending.json` is written by the stager and advanced by the
//! installer (`staged -> extracted -> installed`, or `failed`). It lets the
//! installer resume an interrupted run and lets the relaunched daemon tell
//! an update restart from a cold start.

use super::{ARCHIVE_NAME, INSTALL_LOG_NAME, PLAN_NAME, TEMP_DIR_NAME};
use crate::error::{UpdateError, UpdateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Where an update attempt got to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum UpdatePhase {
    /// Installer written, not yet run
    Staged,
    /// Archive unpacked into the temp dir
    Extracted,
    /// Files merged into the install dir
    Installed,
    Failed { reason: String },
}

impl UpdatePhase {
    /// The temp dir holds a complete extraction that can be reused
    pub fn has_extraction(&self) -> bool {
        matches!(self, UpdatePhase::Extracted | UpdatePhase::Installed)
    }
}

/// Top-level names the installer must never overwrite
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionSet(BTreeSet<String>);

impl ExclusionSet {
    /// Installer artifacts living in the working directory
    pub fn for_installer(launcher: &str, helper: &str) -> Self {
        let mut set = Self::default();
        for name in [launcher, helper, PLAN_NAME, TEMP_DIR_NAME, ARCHIVE_NAME, INSTALL_LOG_NAME] {
            set.insert(name);
        }
        set.insert(&format!("{}.part", ARCHIVE_NAME));
        set
    }

    pub fn insert(&mut self, name: &str) {
        self.0.insert(name.to_string());
    }

    pub fn contains(&self, name: &OsStr) -> bool {
        name.to_str().map(|n| self.0.contains(n)).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// The persisted update plan shared by daemon and installer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub archive: PathBuf,
    pub temp_dir: PathBuf,
    pub install_dir: PathBuf,
    pub exclusions: ExclusionSet,
    /// Program to start when no relaunch wrapper is present
    pub entry_point: PathBuf,
    /// `--config` the daemon was started with, repeated on relaunch
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Launch script in the install dir preferred over `entry_point`
    pub relaunch_wrapper: Option<String>,
    pub launcher: PathBuf,
    pub helper: PathBuf,
    pub from_version: String,
    pub target_version: Option<String>,
    #[serde(flatten)]
    pub phase: UpdatePhase,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PendingUpdate {
    pub fn path_in(work_dir: &Path) -> PathBuf {
        work_dir.join(PLAN_NAME)
    }

    pub fn load(path: &Path) -> UpdateResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| UpdateError::fs(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| UpdateError::Marker(format!("{}: {}", path.display(), e)))
    }

    /// Write the marker (temp file + rename, so readers never see half a file)
    pub fn save(&self, path: &Path) -> UpdateResult<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::Marker(e.to_string()))?;

        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp).map_err(|e| UpdateError::fs(&tmp, e))?;
        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| UpdateError::fs(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| UpdateError::fs(path, e))?;
        Ok(())
    }

    /// Advance to `phase` and persist
    pub fn advance(&mut self, phase: UpdatePhase, path: &Path) -> UpdateResult<()> {
        info!("Update phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
        self.updated_at = Utc::now();
        self.save(path)
    }
}

/// How the daemon came to be running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelaunchStatus {
    ColdStart,
    /// Started by the installer after a completed update
    RelaunchedAfterUpdate { version: Option<String> },
    /// A previous update stopped with an error
    PreviousUpdateFailed { reason: String },
    /// Marker left mid-way (installer never ran or crashed)
    UpdateInterrupted { phase: UpdatePhase },
}

/// Inspect the marker at startup and tidy up after a finished update.
///
/// Completed or failed attempts have their marker, installer artifacts,
/// archive and extraction dir removed. An interrupted attempt is left in place so the installer can
/// be run again.
pub fn detect_relaunch(work_dir: &Path) -> RelaunchStatus {
    let plan_path = PendingUpdate::path_in(work_dir);
    if !plan_path.exists() {
        return RelaunchStatus::ColdStart;
    }

    let plan = match PendingUpdate::load(&plan_path) {
        Ok(p) => p,
        Err(e) => {
            warn!("Ignoring unreadable update marker: {}", e);
            let _ = fs::remove_file(&plan_path);
            return RelaunchStatus::ColdStart;
        }
    };

    let status = match &plan.phase {
        UpdatePhase::Installed => RelaunchStatus::RelaunchedAfterUpdate {
            version: plan.target_version.clone(),
        },
        UpdatePhase::Failed { reason } => RelaunchStatus::PreviousUpdateFailed {
            reason: reason.clone(),
        },
        phase => {
            warn!("Found interrupted update in phase {:?}", phase);
            return RelaunchStatus::UpdateInterrupted {
                phase: phase.clone(),
            };
        }
    };

    for artifact in [&plan.launcher, &plan.helper, &plan.archive, &plan_path] {
        if artifact.exists() {
            if let Err(e) = fs::remove_file(artifact) {
                warn!("Could not remove {}: {}", artifact.display(), e);
            }
        }
    }
    if plan.temp_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&plan.temp_dir) {
            warn!("Could not remove {}: {}", plan.temp_dir.display(), e);
        }
    }

    info!("Startup after update attempt: {:?}", status);
    status
}
