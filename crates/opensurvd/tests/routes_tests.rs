//! HTTP API tests
//!
//! Drive the router with `oneshot` against a local release server. Process
//! launches and the scheduled exit are recorded, never executed.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use opensurv_common::process::RecordingProcessControl;
use opensurv_common::{LauncherPlatform, RelaunchStatus, UpdateStager};
use opensurvd::config::Config;
use opensurvd::server::{router, AppState};
use serde_json::{json, Value};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

fn archive_bytes() -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("pkg/server.py", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(b"print('new')").unwrap();
    zip.finish().unwrap().into_inner()
}

/// Release API answering with `tag`, plus a downloadable archive
async fn release_server(tag: &'static str) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let zipball = format!("{}/archive.zip", base);

    let app = Router::new()
        .route(
            "/repos/BigTonyTones/Tonys-OpenSurv-Gui-Editor/releases/latest",
            get(move || {
                let zipball = zipball.clone();
                async move {
                    Json(json!({
                        "tag_name": tag,
                        "body": "Camera grid fixes",
                        "zipball_url": zipball,
                    }))
                }
            }),
        )
        .route("/archive.zip", get(|| async { archive_bytes() }));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

fn config(api_base: &str) -> Config {
    let mut config = Config::default();
    config.update.api_base = api_base.to_string();
    config.update.current_version = Some("1.5".to_string());
    config.update.check_timeout_secs = 5;
    config.update.exit_delay_ms = 250;
    config
}

fn app(
    work: &Path,
    config: Config,
    control: Arc<RecordingProcessControl>,
    relaunch: RelaunchStatus,
) -> Router {
    let helper = work.join("opensurvd-build");
    std::fs::write(&helper, b"#!/bin/sh\n").unwrap();
    let stager = UpdateStager::new(work)
        .unwrap()
        .with_platform(LauncherPlatform::Unix)
        .with_helper_source(helper)
        .with_entry_point(work.join("opensurvd"));
    router(AppState::with_stager(config, stager, control, relaunch))
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read_json(response).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read_json(response).await
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ============================================================================
// Health and version
// ============================================================================

#[tokio::test]
async fn test_health_reports_ok() {
    let work = TempDir::new().unwrap();
    let app = app(
        work.path(),
        config("http://127.0.0.1:9"),
        Arc::new(RecordingProcessControl::new()),
        RelaunchStatus::ColdStart,
    );

    let (status, body) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["update_in_progress"], false);
}

#[tokio::test]
async fn test_version_reports_relaunch_after_update() {
    let work = TempDir::new().unwrap();
    let app = app(
        work.path(),
        config("http://127.0.0.1:9"),
        Arc::new(RecordingProcessControl::new()),
        RelaunchStatus::RelaunchedAfterUpdate {
            version: Some("1.6".to_string()),
        },
    );

    let (status, body) = get_json(&app, "/api/version").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "opensurv-manager");
    assert_eq!(body["version"], "1.5");
    assert_eq!(body["relaunched_after_update"], true);
    assert_eq!(body["startup"]["kind"], "relaunched_after_update");
}

// ============================================================================
// Check
// ============================================================================

#[tokio::test]
async fn test_check_reports_available_update() {
    let base = release_server("v1.6").await;
    let work = TempDir::new().unwrap();
    let app = app(
        work.path(),
        config(&base),
        Arc::new(RecordingProcessControl::new()),
        RelaunchStatus::ColdStart,
    );

    let (status, body) = get_json(&app, "/api/update/check").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "update_available");
    assert_eq!(body["latest_version"], "1.6");
    assert_eq!(body["notes"], "Camera grid fixes");
    assert_eq!(body["download_url"], format!("{}/archive.zip", base));
}

#[tokio::test]
async fn test_check_with_unparseable_tag_is_indeterminate() {
    let base = release_server("nightly").await;
    let work = TempDir::new().unwrap();
    let app = app(
        work.path(),
        config(&base),
        Arc::new(RecordingProcessControl::new()),
        RelaunchStatus::ColdStart,
    );

    let (_, body) = get_json(&app, "/api/update/check").await;
    assert_eq!(body["status"], "indeterminate");
}

#[tokio::test]
async fn test_check_unreachable_api_is_check_failed() {
    let work = TempDir::new().unwrap();
    let mut config = config("http://127.0.0.1:9");
    config.update.check_timeout_secs = 2;
    let app = app(
        work.path(),
        config,
        Arc::new(RecordingProcessControl::new()),
        RelaunchStatus::ColdStart,
    );

    let (status, body) = get_json(&app, "/api/update/check").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "check_failed");
}

// ============================================================================
// Perform
// ============================================================================

#[tokio::test]
async fn test_perform_without_url_is_bad_request() {
    let work = TempDir::new().unwrap();
    let control = Arc::new(RecordingProcessControl::new());
    let app = app(
        work.path(),
        config("http://127.0.0.1:9"),
        Arc::clone(&control),
        RelaunchStatus::ColdStart,
    );

    let (status, body) = post_json(&app, "/api/update/perform", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post_json(&app, "/api/update/perform", json!({"download_url": "  "})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(control.spawned().is_empty());
}

#[tokio::test]
async fn test_perform_starts_installer_then_rejects_second_trigger() {
    let base = release_server("v1.6").await;
    let work = TempDir::new().unwrap();
    let control = Arc::new(RecordingProcessControl::new());
    let app = app(
        work.path(),
        config(&base),
        Arc::clone(&control),
        RelaunchStatus::ColdStart,
    );
    let request = json!({"download_url": format!("{}/archive.zip", base), "version": "1.6"});

    let (status, body) = post_json(&app, "/api/update/perform", request.clone()).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert!(body["launcher"].as_str().unwrap().ends_with("update_install.sh"));
    assert!(body["pid"].as_u64().is_some());
    assert_eq!(control.exit_requests(), vec![Duration::from_millis(250)]);

    let (_, health) = get_json(&app, "/health").await;
    assert_eq!(health["update_in_progress"], true);

    let (status, body) = post_json(&app, "/api/update/perform", request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(control.spawned().len(), 1);
}

#[tokio::test]
async fn test_perform_with_broken_url_is_server_error() {
    let base = release_server("v1.6").await;
    let work = TempDir::new().unwrap();
    let control = Arc::new(RecordingProcessControl::new());
    let app = app(
        work.path(),
        config(&base),
        Arc::clone(&control),
        RelaunchStatus::ColdStart,
    );

    let (status, body) = post_json(
        &app,
        "/api/update/perform",
        json!({"download_url": format!("{}/nope.zip", base)}),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().is_some());
    assert!(control.spawned().is_empty());
    assert!(control.exit_requests().is_empty());
}
