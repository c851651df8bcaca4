//! Process handoff
//!
//! Download, stage, launch the detached installer, then exit so the
//! installer can replace our files. The caller learns that the update
//! *started*; whether it completes is only visible in the installer log
//! and in the marker the relaunched daemon finds.

use super::lock::UpdateGuard;
use super::stage::{InstallerScriptSet, UpdateStager};
use crate::download::ArtifactDownloader;
use crate::error::{UpdateError, UpdateResult};
use crate::process::ProcessControl;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

pub const DEFAULT_EXIT_DELAY: Duration = Duration::from_millis(1000);

/// Acknowledgement that the installer is running
#[derive(Debug, Clone, Serialize)]
pub struct Started {
    pub launcher: PathBuf,
    pub pid: u32,
    pub exit_after_ms: u64,
}

#[derive(Clone)]
pub struct ProcessHandoff {
    downloader: ArtifactDownloader,
    stager: UpdateStager,
    control: Arc<dyn ProcessControl>,
    guard: UpdateGuard,
    exit_delay: Duration,
}

impl ProcessHandoff {
    pub fn new(
        downloader: ArtifactDownloader,
        stager: UpdateStager,
        control: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            downloader,
            stager,
            control,
            guard: UpdateGuard::new(),
            exit_delay: DEFAULT_EXIT_DELAY,
        }
    }

    pub fn with_exit_delay(mut self, delay: Duration) -> Self {
        self.exit_delay = delay;
        self
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.guard.is_held()
    }

    async fn stage_and_launch(
        &self,
        archive: &Path,
        target_version: Option<&str>,
    ) -> UpdateResult<(InstallerScriptSet, u32)> {
        let stager = self.stager.clone();
        let version = target_version.map(str::to_string);
        let staged_archive = archive.to_path_buf();
        let scripts = tokio::task::spawn_blocking(move || {
            stager.stage(&staged_archive, version.as_deref())
        })
        .await
        .map_err(|e| UpdateError::Handoff(format!("staging task failed: {}", e)))??;

        let command = self.stager.platform().launcher_command(&scripts.launcher);
        let pid = self.control.spawn_detached(command).map_err(|e| {
            UpdateError::Handoff(format!(
                "cannot launch {}: {}",
                scripts.launcher.display(),
                e
            ))
        })?;
        Ok((scripts, pid))
    }

    /// Start an update from `download_url`.
    ///
    /// Returns once the installer is launched; the process exits after the
    /// configured delay. Only one update may be in flight at a time. If
    /// staging or the launch fails, everything staged is removed again.
    pub async fn perform_update(
        &self,
        download_url: &str,
        target_version: Option<&str>,
    ) -> UpdateResult<Started> {
        let lock = self.guard.try_acquire()?;
        info!("Starting update from {}", download_url);

        let archive = self.stager.archive_path();
        if let Err(e) = self.downloader.try_download(download_url, &archive).await {
            error!("Failed to download update: {}", e);
            return Err(e);
        }

        let launched = self.stage_and_launch(&archive, target_version).await;
        let (scripts, pid) = match launched {
            Ok(ok) => ok,
            Err(e) => {
                error!("Failed to start installer: {}", e);
                self.stager.discard();
                return Err(e);
            }
        };
        info!("Installer {} launched (pid {})", scripts.launcher.display(), pid);

        // No second update may start before we are gone
        lock.hold_until_exit();
        self.control.schedule_exit(self.exit_delay);

        Ok(Started {
            launcher: scripts.launcher,
            pid,
            exit_after_ms: self.exit_delay.as_millis() as u64,
        })
    }
}
