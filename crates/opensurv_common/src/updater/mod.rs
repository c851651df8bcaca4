//! Self-update for the OpenSurv manager
//!
//! The running daemon and the installer never share memory. They meet
//! only in the working directory:
//!
//! 1. `handoff` downloads `update.zip`, asks `stage` for an installer,
//!    launches it detached and schedules its own exit
//! 2. `stage` copies the daemon binary to `update_helper`, writes the
//!    pending-update marker and a native launcher script
//! 3. the launcher waits for the daemon to exit, then runs
//!    `update_helper apply-update`, which drives `reconcile`
//! 4. `reconcile` extracts, merges into the install dir, cleans up and
//!    relaunches the daemon
//! 5. the relaunched daemon reads the marker (`plan::detect_relaunch`)
//!    and removes the installer leftovers

pub mod handoff;
pub mod lock;
pub mod plan;
pub mod reconcile;
pub mod stage;

// Re-exports
pub use handoff::{ProcessHandoff, Started};
pub use lock::{UpdateGuard, UpdateLock};
pub use plan::{detect_relaunch, ExclusionSet, PendingUpdate, RelaunchStatus, UpdatePhase};
pub use reconcile::{InstallReconciler, MergeStats, ReconcileReport};
pub use stage::{InstallerScriptSet, LauncherPlatform, UpdateStager};

/// Downloaded release archive, relative to the working directory
pub const ARCHIVE_NAME: &str = "update.zip";

/// Extraction directory, relative to the working directory
pub const TEMP_DIR_NAME: &str = "update_temp";

/// Pending-update marker, relative to the working directory
pub const PLAN_NAME: &str = "update_pending.json";

/// Log written by the detached installer
pub const INSTALL_LOG_NAME: &str = "update_install.log";

/// Seconds the launcher waits for the daemon to exit
pub const LAUNCHER_WAIT_SECS: u64 = 3;
