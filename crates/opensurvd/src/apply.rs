//! `opensurvd apply-update`: the detached half of a self-update.
//!
//! Runs from the `update_helper` copy of this binary after the daemon has
//! exited, so the install dir can be overwritten freely. Output goes to
//! stdout/stderr, which the launcher appends to `update_install.log`.

use anyhow::{Context, Result};
use opensurv_common::process::{ProcessControl, SystemProcessControl};
use opensurv_common::InstallReconciler;
use std::path::Path;
use tracing::{info, warn};

pub fn run(plan: &Path) -> Result<()> {
    apply_with(plan, &SystemProcessControl)
}

pub fn apply_with(plan: &Path, control: &dyn ProcessControl) -> Result<()> {
    info!("Applying update from {}", plan.display());

    let mut reconciler = InstallReconciler::load(plan)
        .with_context(|| format!("cannot read update plan {}", plan.display()))?;
    let report = reconciler.run(control).context("update installation failed")?;

    info!(
        "Merged {} files ({} new directories, {} protected entries skipped)",
        report.merge.files_copied,
        report.merge.dirs_created,
        report.merge.skipped.len()
    );
    if report.resumed {
        info!("Resumed from an earlier extraction");
    }
    for warning in &report.cleanup_warnings {
        warn!("Cleanup: {}", warning);
    }

    match (report.relaunch_pid, &report.relaunch_error) {
        (Some(pid), _) => info!("Service relaunched (pid {})", pid),
        (None, Some(e)) => warn!("Update installed but relaunch failed: {}; start it manually", e),
        (None, None) => {}
    }
    Ok(())
}
