//! Install reconciliation, run by the detached helper
//!
//! Linear steps, each recorded in the marker:
//! extract -> locate content root -> merge -> cleanup -> relaunch.
//! A failure before cleanup marks the attempt failed and skips the
//! relaunch. Nothing is rolled back: files merged before the failure stay.

use super::plan::{ExclusionSet, PendingUpdate, UpdatePhase};
use super::stage::LauncherPlatform;
use crate::error::{UpdateError, UpdateResult};
use crate::process::{set_executable, ProcessControl};
use filetime::FileTime;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Counts from one merge pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub files_copied: usize,
    pub dirs_created: usize,
    pub skipped: Vec<String>,
}

/// What the helper did
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    /// Reused an extraction left by an earlier run
    pub resumed: bool,
    pub merge: MergeStats,
    pub cleanup_warnings: Vec<String>,
    pub relaunch_pid: Option<u32>,
    pub relaunch_error: Option<String>,
}

pub struct InstallReconciler {
    plan_path: PathBuf,
    plan: PendingUpdate,
    platform: LauncherPlatform,
}

impl InstallReconciler {
    pub fn load(plan_path: impl Into<PathBuf>) -> UpdateResult<Self> {
        let plan_path = plan_path.into();
        let plan = PendingUpdate::load(&plan_path)?;
        Ok(Self::from_plan(plan_path, plan))
    }

    pub fn from_plan(plan_path: PathBuf, plan: PendingUpdate) -> Self {
        Self {
            plan_path,
            plan,
            platform: LauncherPlatform::current(),
        }
    }

    pub fn with_platform(mut self, platform: LauncherPlatform) -> Self {
        self.platform = platform;
        self
    }

    pub fn plan(&self) -> &PendingUpdate {
        &self.plan
    }

    /// Run the whole installation, relaunching the service on success
    pub fn run(&mut self, control: &dyn ProcessControl) -> UpdateResult<ReconcileReport> {
        info!(
            "Installing update {} into {}",
            self.plan.target_version.as_deref().unwrap_or("(unknown version)"),
            self.plan.install_dir.display()
        );

        let (resumed, merge) = match self.install() {
            Ok(result) => result,
            Err(e) => {
                error!("Error installing update: {}", e);
                let failed = UpdatePhase::Failed {
                    reason: e.to_string(),
                };
                if let Err(save_err) = self.plan.advance(failed, &self.plan_path) {
                    warn!("Could not record failure in marker: {}", save_err);
                }
                return Err(e);
            }
        };
        info!("Update installed successfully");

        let cleanup_warnings = cleanup(&self.plan.archive, &self.plan.temp_dir);

        let (relaunch_pid, relaunch_error) = match self.relaunch(control) {
            Ok(pid) => (Some(pid), None),
            Err(e) => {
                error!("Relaunch failed: {}", e);
                (None, Some(e.to_string()))
            }
        };

        Ok(ReconcileReport {
            resumed,
            merge,
            cleanup_warnings,
            relaunch_pid,
            relaunch_error,
        })
    }

    /// Steps 1-3: extract, locate content root, merge
    fn install(&mut self) -> UpdateResult<(bool, MergeStats)> {
        let temp_dir = self.plan.temp_dir.clone();

        if self.plan.phase == UpdatePhase::Installed && !temp_dir.exists() {
            info!("Files already installed by an earlier run");
            return Ok((true, MergeStats::default()));
        }

        let resumed = self.plan.phase.has_extraction() && temp_dir.is_dir();
        if resumed {
            info!("Reusing extraction in {}", temp_dir.display());
        } else {
            let entries = extract_archive(&self.plan.archive, &temp_dir)?;
            info!("Extracted {} entries into {}", entries, temp_dir.display());
            self.plan.advance(UpdatePhase::Extracted, &self.plan_path)?;
        }

        let content_root = locate_content_root(&temp_dir)?;
        info!("Installing files from {}", content_root.display());

        let stats = merge_into(&content_root, &self.plan.install_dir, &self.plan.exclusions)?;
        info!(
            "Merged {} files ({} new directories)",
            stats.files_copied, stats.dirs_created
        );
        self.plan.advance(UpdatePhase::Installed, &self.plan_path)?;
        Ok((resumed, stats))
    }

    /// Step 5: start the service again, detached
    fn relaunch(&self, control: &dyn ProcessControl) -> UpdateResult<u32> {
        let install_dir = &self.plan.install_dir;
        let wrapper = self
            .plan
            .relaunch_wrapper
            .as_ref()
            .map(|w| install_dir.join(w))
            .filter(|p| p.is_file());

        let mut command = match wrapper {
            Some(path) => {
                info!("Restarting service via {}", path.display());
                set_executable(&path).map_err(|e| UpdateError::fs(&path, e))?;
                self.platform.wrapper_command(&path)
            }
            None => {
                info!("Restarting service via {} serve", self.plan.entry_point.display());
                let mut c = Command::new(&self.plan.entry_point);
                if let Some(config) = &self.plan.config_path {
                    c.arg("--config").arg(config);
                }
                c.arg("serve");
                c
            }
        };
        command.current_dir(install_dir);

        control
            .spawn_detached(command)
            .map_err(|e| UpdateError::Handoff(format!("relaunch failed: {}", e)))
    }
}

/// Unpack `archive` into a fresh `temp_dir`. Returns the number of entries.
pub fn extract_archive(archive: &Path, temp_dir: &Path) -> UpdateResult<usize> {
    if temp_dir.exists() {
        fs::remove_dir_all(temp_dir).map_err(|e| UpdateError::fs(temp_dir, e))?;
    }
    fs::create_dir_all(temp_dir).map_err(|e| UpdateError::fs(temp_dir, e))?;

    let file = fs::File::open(archive).map_err(|e| UpdateError::fs(archive, e))?;
    let mut zip = zip::ZipArchive::new(file)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel = entry.enclosed_name().ok_or_else(|| {
            UpdateError::Archive(format!("unsafe path in archive: {}", entry.name()))
        })?;
        let out = temp_dir.join(rel);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| UpdateError::fs(&out, e))?;
            continue;
        }

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| UpdateError::fs(parent, e))?;
        }
        let mut target = fs::File::create(&out).map_err(|e| UpdateError::fs(&out, e))?;
        io::copy(&mut entry, &mut target)
            .map_err(|e| UpdateError::Archive(format!("{}: {}", entry.name(), e)))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&out, fs::Permissions::from_mode(mode & 0o7777))
                .map_err(|e| UpdateError::fs(&out, e))?;
        }
    }

    Ok(zip.len())
}

/// Unwrap a single enclosing top-level directory
pub fn locate_content_root(temp_dir: &Path) -> UpdateResult<PathBuf> {
    let entries: Vec<PathBuf> = fs::read_dir(temp_dir)
        .map_err(|e| UpdateError::fs(temp_dir, e))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .collect();

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(only.clone()),
        _ => Ok(temp_dir.to_path_buf()),
    }
}

/// Merge the tree under `content_root` into `install_dir`.
///
/// Top-level names in `exclusions` are skipped. Existing directories are
/// unioned with the incoming ones and colliding files are overwritten;
/// nothing in `install_dir` is deleted.
pub fn merge_into(
    content_root: &Path,
    install_dir: &Path,
    exclusions: &ExclusionSet,
) -> UpdateResult<MergeStats> {
    let mut stats = MergeStats::default();

    let mut top_level: Vec<_> = fs::read_dir(content_root)
        .map_err(|e| UpdateError::fs(content_root, e))?
        .filter_map(|e| e.ok())
        .collect();
    top_level.sort_by_key(|e| e.file_name());

    for item in top_level {
        let name = item.file_name();
        if exclusions.contains(&name) {
            info!("Skipping protected entry {}", name.to_string_lossy());
            stats.skipped.push(name.to_string_lossy().into_owned());
            continue;
        }

        for entry in WalkDir::new(item.path()).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_default();
                UpdateError::fs(path, e.into())
            })?;
            let rel = entry
                .path()
                .strip_prefix(content_root)
                .map_err(|e| UpdateError::Archive(e.to_string()))?;
            let dest = install_dir.join(rel);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if dest.is_file() {
                    return Err(UpdateError::fs(
                        &dest,
                        io::Error::new(io::ErrorKind::AlreadyExists, "file in the way of directory"),
                    ));
                }
                if !dest.exists() {
                    fs::create_dir_all(&dest).map_err(|e| UpdateError::fs(&dest, e))?;
                    stats.dirs_created += 1;
                }
            } else if file_type.is_file() {
                copy_file(entry.path(), &dest)?;
                stats.files_copied += 1;
            } else {
                warn!("Skipping special file {}", entry.path().display());
                stats.skipped.push(rel.to_string_lossy().into_owned());
            }
        }
    }

    Ok(stats)
}

/// Copy one file keeping permissions and timestamps
fn copy_file(src: &Path, dest: &Path) -> UpdateResult<()> {
    if dest.is_dir() {
        return Err(UpdateError::fs(
            dest,
            io::Error::new(io::ErrorKind::AlreadyExists, "directory in the way of file"),
        ));
    }

    if let Err(first) = fs::copy(src, dest) {
        // A busy executable cannot be truncated but can be unlinked
        if !dest.exists() {
            return Err(UpdateError::fs(dest, first));
        }
        fs::remove_file(dest).map_err(|_| UpdateError::fs(dest, first))?;
        fs::copy(src, dest).map_err(|e| UpdateError::fs(dest, e))?;
    }

    let meta = fs::metadata(src).map_err(|e| UpdateError::fs(src, e))?;
    filetime::set_file_times(
        dest,
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .map_err(|e| UpdateError::fs(dest, e))?;
    Ok(())
}

/// Step 4: remove the archive and extraction dir. Failures are only reported.
pub fn cleanup(archive: &Path, temp_dir: &Path) -> Vec<String> {
    info!("Cleaning up...");
    let mut warnings = Vec::new();

    if archive.exists() {
        if let Err(e) = fs::remove_file(archive) {
            warnings.push(format!("{}: {}", archive.display(), e));
        }
    }
    if temp_dir.exists() {
        if let Err(e) = fs::remove_dir_all(temp_dir) {
            warnings.push(format!("{}: {}", temp_dir.display(), e));
        }
    }

    for w in &warnings {
        warn!("Cleanup failed for {}", w);
    }
    warnings
}
