//! Installer staging
//!
//! Produces the detached installer for a downloaded archive: a copy of the
//! daemon binary acting as the reconciliation program, the pending-update
//! marker it reads, and a native launcher script that waits for the daemon
//! to exit before running it.

use super::plan::{ExclusionSet, PendingUpdate, UpdatePhase};
use super::{ARCHIVE_NAME, INSTALL_LOG_NAME, LAUNCHER_WAIT_SECS, PLAN_NAME, TEMP_DIR_NAME};
use crate::error::{UpdateError, UpdateResult};
use crate::process::set_executable;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

/// Platform flavour of the launcher and relaunch commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LauncherPlatform {
    Unix,
    Windows,
}

impl LauncherPlatform {
    pub fn current() -> Self {
        if cfg!(windows) {
            LauncherPlatform::Windows
        } else {
            LauncherPlatform::Unix
        }
    }

    pub fn launcher_name(self) -> &'static str {
        match self {
            LauncherPlatform::Unix => "update_install.sh",
            LauncherPlatform::Windows => "update_install.bat",
        }
    }

    pub fn helper_name(self) -> &'static str {
        match self {
            LauncherPlatform::Unix => "update_helper",
            LauncherPlatform::Windows => "update_helper.exe",
        }
    }

    /// Service start script looked for in the install dir on relaunch
    pub fn default_relaunch_wrapper(self) -> &'static str {
        match self {
            LauncherPlatform::Unix => "start_ubuntu_25.sh",
            LauncherPlatform::Windows => "run_windows.bat",
        }
    }

    /// Launcher script body: wait, then run the helper against the marker.
    ///
    /// Paths are relative: `launcher_command` starts the script inside the
    /// working directory.
    pub fn render_launcher(self) -> String {
        let helper = self.helper_name();
        match self {
            LauncherPlatform::Unix => format!(
                "#!/bin/sh\n\
                 echo \"Waiting for application to close...\"\n\
                 sleep {LAUNCHER_WAIT_SECS}\n\
                 echo \"Starting update process...\"\n\
                 exec \"./{helper}\" apply-update --plan \"{PLAN_NAME}\" >> \"{INSTALL_LOG_NAME}\" 2>&1\n"
            ),
            LauncherPlatform::Windows => format!(
                "@echo off\r\n\
                 echo Waiting for application to close...\r\n\
                 timeout /t {LAUNCHER_WAIT_SECS} /nobreak >nul\r\n\
                 echo Starting update process...\r\n\
                 \".\\{helper}\" apply-update --plan \"{PLAN_NAME}\" >> \"{INSTALL_LOG_NAME}\" 2>&1\r\n"
            ),
        }
    }

    /// Command that executes a launcher script
    pub fn launcher_command(self, launcher: &Path) -> Command {
        let mut cmd = match self {
            LauncherPlatform::Unix => {
                let mut c = Command::new("/bin/sh");
                c.arg(launcher);
                c
            }
            LauncherPlatform::Windows => {
                let mut c = Command::new("cmd");
                c.arg("/C").arg(launcher);
                c
            }
        };
        if let Some(dir) = launcher.parent() {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Command that runs the service start script
    pub fn wrapper_command(self, wrapper: &Path) -> Command {
        match self {
            LauncherPlatform::Unix => {
                let mut c = Command::new("/bin/sh");
                c.arg(wrapper);
                c
            }
            LauncherPlatform::Windows => {
                let mut c = Command::new("cmd");
                c.args(["/C", "start", ""]).arg(wrapper);
                c
            }
        }
    }
}

/// Files generated for one update attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallerScriptSet {
    /// Native launcher to execute
    pub launcher: PathBuf,
    /// Reconciliation program
    pub helper: PathBuf,
    /// Marker the helper reads
    pub plan: PathBuf,
}

#[derive(Debug, Clone)]
pub struct UpdateStager {
    work_dir: PathBuf,
    platform: LauncherPlatform,
    helper_source: PathBuf,
    entry_point: PathBuf,
    /// Overrides the platform's default start script
    relaunch_wrapper: Option<String>,
    /// Config file the daemon was started with, passed on to the relaunch
    config_path: Option<PathBuf>,
}

impl UpdateStager {
    /// Stager for `work_dir`, using the running executable as helper and entry point
    pub fn new(work_dir: impl Into<PathBuf>) -> UpdateResult<Self> {
        let exe = std::env::current_exe().map_err(|e| {
            UpdateError::Handoff(format!("cannot determine current executable path: {}", e))
        })?;
        Ok(Self {
            work_dir: work_dir.into(),
            platform: LauncherPlatform::current(),
            helper_source: exe.clone(),
            entry_point: exe,
            relaunch_wrapper: None,
            config_path: None,
        })
    }

    pub fn with_platform(mut self, platform: LauncherPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_helper_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.helper_source = path.into();
        self
    }

    pub fn with_entry_point(mut self, path: impl Into<PathBuf>) -> Self {
        self.entry_point = path.into();
        self
    }

    pub fn with_relaunch_wrapper(mut self, wrapper: Option<String>) -> Self {
        self.relaunch_wrapper = wrapper.filter(|w| !w.is_empty());
        self
    }

    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn platform(&self) -> LauncherPlatform {
        self.platform
    }

    /// Archive location the handoff downloads into
    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(ARCHIVE_NAME)
    }

    /// Remove whatever a failed attempt left behind: archive (and its
    /// partial download), helper, launcher and marker
    pub fn discard(&self) {
        let archive = self.archive_path();
        let leftovers = [
            archive.clone(),
            self.work_dir.join(format!("{}.part", ARCHIVE_NAME)),
            self.work_dir.join(self.platform.helper_name()),
            self.work_dir.join(self.platform.launcher_name()),
            PendingUpdate::path_in(&self.work_dir),
        ];
        for path in leftovers.iter().filter(|p| p.exists()) {
            if let Err(e) = fs::remove_file(path) {
                warn!("Could not remove {}: {}", path.display(), e);
            }
        }
        info!("Discarded staged update in {}", self.work_dir.display());
    }

    /// Write helper, marker and launcher for `archive` into the working directory
    pub fn stage(&self, archive: &Path, target_version: Option<&str>) -> UpdateResult<InstallerScriptSet> {
        let work_dir = self
            .work_dir
            .canonicalize()
            .map_err(|e| UpdateError::fs(&self.work_dir, e))?;
        let archive = if archive.is_absolute() {
            archive.to_path_buf()
        } else {
            work_dir.join(archive)
        };
        if !archive.is_file() {
            return Err(UpdateError::Archive(format!(
                "staged archive {} does not exist",
                archive.display()
            )));
        }

        let launcher_name = self.platform.launcher_name();
        let helper_name = self.platform.helper_name();
        let launcher = work_dir.join(launcher_name);
        let helper = work_dir.join(helper_name);
        let plan_path = PendingUpdate::path_in(&work_dir);

        let mut exclusions = ExclusionSet::for_installer(launcher_name, helper_name);
        if let Some(name) = archive.file_name().and_then(|n| n.to_str()) {
            exclusions.insert(name);
        }

        // The helper must not be the file it may overwrite
        fs::copy(&self.helper_source, &helper).map_err(|e| UpdateError::fs(&helper, e))?;
        set_executable(&helper).map_err(|e| UpdateError::fs(&helper, e))?;

        let now = Utc::now();
        let plan = PendingUpdate {
            archive,
            temp_dir: work_dir.join(TEMP_DIR_NAME),
            install_dir: work_dir.clone(),
            exclusions,
            entry_point: self.entry_point.clone(),
            config_path: self.config_path.clone(),
            relaunch_wrapper: Some(
                self.relaunch_wrapper
                    .clone()
                    .unwrap_or_else(|| self.platform.default_relaunch_wrapper().to_string()),
            ),
            launcher: launcher.clone(),
            helper: helper.clone(),
            from_version: crate::VERSION.to_string(),
            target_version: target_version.map(str::to_string),
            phase: UpdatePhase::Staged,
            created_at: now,
            updated_at: now,
        };
        plan.save(&plan_path)?;

        fs::write(&launcher, self.platform.render_launcher())
            .map_err(|e| UpdateError::fs(&launcher, e))?;
        set_executable(&launcher).map_err(|e| UpdateError::fs(&launcher, e))?;

        info!(
            "Staged {:?} installer: {} -> {}",
            self.platform,
            launcher.display(),
            helper.display()
        );

        Ok(InstallerScriptSet {
            launcher,
            helper,
            plan: plan_path,
        })
    }
}
