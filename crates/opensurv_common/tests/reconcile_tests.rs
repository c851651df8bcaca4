//! Installer reconciliation tests
//!
//! Stage an installer against a synthetic release archive, then run the
//! reconciliation the detached helper would run, with process launches
//! recorded instead of executed.
//!
//! ```bash
//! cargo test -p opensurv_common --test reconcile_tests
//! ```

mod common;

use common::{fake_daemon, file_set, write_zip};
use opensurv_common::process::RecordingProcessControl;
use opensurv_common::updater::reconcile::{extract_archive, locate_content_root, merge_into};
use opensurv_common::{
    InstallReconciler, LauncherPlatform, PendingUpdate, UpdateError, UpdatePhase, UpdateStager,
    ARCHIVE_NAME, TEMP_DIR_NAME,
};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn stage(install: &Path, entries: &[(&str, &str)]) -> (UpdateStager, std::path::PathBuf) {
    let build = TempDir::new().unwrap();
    let stager = UpdateStager::new(install)
        .unwrap()
        .with_platform(LauncherPlatform::Unix)
        .with_helper_source(fake_daemon(build.path()))
        .with_entry_point(install.join("opensurvd"))
        .with_config_path(Some(config_path(install)));

    write_zip(&install.join(ARCHIVE_NAME), entries);
    let scripts = stager.stage(&stager.archive_path(), Some("1.6")).unwrap();
    (stager, scripts.plan)
}

fn config_path(install: &Path) -> std::path::PathBuf {
    install.join("conf").join("opensurv-manager.toml")
}

fn reconciler(plan: &Path) -> InstallReconciler {
    InstallReconciler::load(plan)
        .unwrap()
        .with_platform(LauncherPlatform::Unix)
}

// ============================================================================
// Round trip: stage -> reconcile
// ============================================================================

#[test]
fn test_wrapped_archive_installs_and_protects_installer() {
    let install = TempDir::new().unwrap();
    let (_stager, plan_path) = stage(
        install.path(),
        &[
            ("Owner-Repo-1a2b3c/", ""),
            ("Owner-Repo-1a2b3c/a.txt", "alpha"),
            ("Owner-Repo-1a2b3c/sub/", ""),
            ("Owner-Repo-1a2b3c/sub/b.txt", "beta"),
            ("Owner-Repo-1a2b3c/update_install.sh", "echo from archive"),
        ],
    );
    let launcher_before = fs::read_to_string(install.path().join("update_install.sh")).unwrap();

    let control = RecordingProcessControl::new();
    let report = reconciler(&plan_path).run(&control).unwrap();

    assert_eq!(fs::read_to_string(install.path().join("a.txt")).unwrap(), "alpha");
    assert_eq!(fs::read_to_string(install.path().join("sub/b.txt")).unwrap(), "beta");
    assert_eq!(
        fs::read_to_string(install.path().join("update_install.sh")).unwrap(),
        launcher_before
    );
    assert_eq!(report.merge.files_copied, 2);
    assert!(!report.resumed);

    // Transient inputs are gone, the marker records success
    assert!(!install.path().join(ARCHIVE_NAME).exists());
    assert!(!install.path().join(TEMP_DIR_NAME).exists());
    assert_eq!(
        PendingUpdate::load(&plan_path).unwrap().phase,
        UpdatePhase::Installed
    );

    // No start script in the release: the entry point is started directly,
    // with the config file the daemon was running with
    let plan = PendingUpdate::load(&plan_path).unwrap();
    let config = plan.config_path.clone().unwrap();
    assert!(config.ends_with("conf/opensurv-manager.toml"));
    let spawned = control.spawned();
    assert_eq!(spawned.len(), 1);
    assert_eq!(
        spawned[0],
        format!(
            "{} --config {} serve",
            plan.entry_point.display(),
            config.display()
        )
    );
    assert!(report.relaunch_pid.is_some());
}

#[test]
fn test_relaunch_prefers_start_script() {
    let install = TempDir::new().unwrap();
    let (_stager, plan_path) = stage(
        install.path(),
        &[
            ("release/server.py", "print('v1.6')"),
            ("release/start_ubuntu_25.sh", "#!/bin/sh\n"),
        ],
    );

    let control = RecordingProcessControl::new();
    reconciler(&plan_path).run(&control).unwrap();

    let spawned = control.spawned();
    assert_eq!(spawned.len(), 1);
    assert!(spawned[0].ends_with("start_ubuntu_25.sh"), "{:?}", spawned);
}

// ============================================================================
// Merge, not replace
// ============================================================================

#[test]
fn test_existing_files_survive_merge() {
    let install = TempDir::new().unwrap();
    fs::create_dir_all(install.path().join("configs")).unwrap();
    fs::write(install.path().join("configs/old.yml"), "camera: 1").unwrap();
    fs::write(install.path().join("gui_settings.json"), "{\"port\": 6453}").unwrap();

    let (_stager, plan_path) = stage(
        install.path(),
        &[
            ("pkg/configs/new.yml", "camera: 2"),
            ("pkg/server.py", "v2"),
        ],
    );

    reconciler(&plan_path)
        .run(&RecordingProcessControl::new())
        .unwrap();

    assert_eq!(
        fs::read_to_string(install.path().join("configs/old.yml")).unwrap(),
        "camera: 1"
    );
    assert_eq!(
        fs::read_to_string(install.path().join("configs/new.yml")).unwrap(),
        "camera: 2"
    );
    assert!(install.path().join("gui_settings.json").exists());
}

// ============================================================================
// Crash and retry
// ============================================================================

#[test]
fn test_merging_same_extraction_twice_is_idempotent() {
    let work = TempDir::new().unwrap();
    let archive = work.path().join(ARCHIVE_NAME);
    write_zip(
        &archive,
        &[("pkg/a.txt", "alpha"), ("pkg/sub/b.txt", "beta"), ("pkg/web/index.html", "<html>")],
    );
    let temp_dir = work.path().join(TEMP_DIR_NAME);
    extract_archive(&archive, &temp_dir).unwrap();
    let root = locate_content_root(&temp_dir).unwrap();

    let once = TempDir::new().unwrap();
    merge_into(&root, once.path(), &Default::default()).unwrap();

    let twice = TempDir::new().unwrap();
    merge_into(&root, twice.path(), &Default::default()).unwrap();
    merge_into(&root, twice.path(), &Default::default()).unwrap();

    assert_eq!(file_set(once.path()), file_set(twice.path()));
    assert_eq!(
        file_set(once.path()),
        vec!["a.txt", "sub/b.txt", "web/index.html"]
    );
}

#[test]
fn test_resume_reuses_extraction_after_crash() {
    let install = TempDir::new().unwrap();
    let (_stager, plan_path) = stage(install.path(), &[("pkg/a.txt", "alpha")]);

    // First run got as far as extraction, then the machine went down
    let mut plan = PendingUpdate::load(&plan_path).unwrap();
    extract_archive(&plan.archive, &plan.temp_dir).unwrap();
    plan.advance(UpdatePhase::Extracted, &plan_path).unwrap();
    fs::remove_file(&plan.archive).unwrap();

    let report = reconciler(&plan_path)
        .run(&RecordingProcessControl::new())
        .unwrap();

    assert!(report.resumed);
    assert_eq!(fs::read_to_string(install.path().join("a.txt")).unwrap(), "alpha");
    assert_eq!(
        PendingUpdate::load(&plan_path).unwrap().phase,
        UpdatePhase::Installed
    );
}

#[test]
fn test_rerun_after_completed_install_only_relaunches() {
    let install = TempDir::new().unwrap();
    let (_stager, plan_path) = stage(install.path(), &[("pkg/a.txt", "alpha")]);

    reconciler(&plan_path)
        .run(&RecordingProcessControl::new())
        .unwrap();
    let after_first = file_set(install.path());

    let control = RecordingProcessControl::new();
    let report = reconciler(&plan_path).run(&control).unwrap();

    assert_eq!(file_set(install.path()), after_first);
    assert_eq!(report.merge.files_copied, 0);
    assert_eq!(control.spawned().len(), 1);
}

// ============================================================================
// Failure
// ============================================================================

#[test]
fn test_corrupt_archive_fails_without_relaunch() {
    let install = TempDir::new().unwrap();
    let (_stager, plan_path) = stage(install.path(), &[("pkg/a.txt", "alpha")]);
    fs::write(install.path().join(ARCHIVE_NAME), "truncated download").unwrap();

    let control = RecordingProcessControl::new();
    let err = reconciler(&plan_path).run(&control).unwrap_err();

    assert!(matches!(err, UpdateError::Archive(_)));
    assert!(control.spawned().is_empty());
    assert!(!install.path().join("a.txt").exists());
    assert!(matches!(
        PendingUpdate::load(&plan_path).unwrap().phase,
        UpdatePhase::Failed { .. }
    ));
}
