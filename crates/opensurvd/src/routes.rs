//! API routes for opensurvd

use crate::server::AppStateArc;
use axum::{extract::State, http::StatusCode, routing::get, routing::post, Json, Router};
use opensurv_common::{RelaunchStatus, UpdateCheckResult, UpdateError};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Update Routes
// ============================================================================

pub fn update_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/api/update/check", get(check_update))
        .route("/api/update/perform", post(perform_update))
}

/// Fresh release check on every call
async fn check_update(State(state): State<AppStateArc>) -> Json<UpdateCheckResult> {
    Json(state.fetcher.check_for_update(&state.current_version).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct PerformUpdateRequest {
    #[serde(default)]
    pub download_url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PerformUpdateResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launcher: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PerformUpdateResponse {
    fn failure(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                success: false,
                message: None,
                launcher: None,
                pid: None,
                error: Some(error.into()),
            }),
        )
    }
}

/// Start an update. Success means the installer is running and this
/// process is about to exit, not that the new version is installed.
async fn perform_update(
    State(state): State<AppStateArc>,
    Json(req): Json<PerformUpdateRequest>,
) -> (StatusCode, Json<PerformUpdateResponse>) {
    let url = match req.download_url.as_deref().map(str::trim) {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => {
            return PerformUpdateResponse::failure(
                StatusCode::BAD_REQUEST,
                "No download URL provided",
            )
        }
    };

    match state.handoff.perform_update(&url, req.version.as_deref()).await {
        Ok(started) => {
            info!("Update handed off to pid {}", started.pid);
            (
                StatusCode::OK,
                Json(PerformUpdateResponse {
                    success: true,
                    message: Some(
                        "Update started. The server will restart in a few seconds.".to_string(),
                    ),
                    launcher: Some(started.launcher.display().to_string()),
                    pid: Some(started.pid),
                    error: None,
                }),
            )
        }
        Err(UpdateError::Busy) => {
            PerformUpdateResponse::failure(StatusCode::CONFLICT, UpdateError::Busy.to_string())
        }
        Err(e) => {
            error!("Update failed to start: {}", e);
            PerformUpdateResponse::failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

// ============================================================================
// Version Routes
// ============================================================================

pub fn version_routes() -> Router<AppStateArc> {
    Router::new().route("/api/version", get(version))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub name: String,
    pub version: String,
    pub relaunched_after_update: bool,
    pub startup: RelaunchStatus,
}

async fn version(State(state): State<AppStateArc>) -> Json<VersionResponse> {
    Json(VersionResponse {
        name: "opensurv-manager".to_string(),
        version: state.current_version.clone(),
        relaunched_after_update: matches!(
            state.relaunch,
            RelaunchStatus::RelaunchedAfterUpdate { .. }
        ),
        startup: state.relaunch.clone(),
    })
}

// ============================================================================
// Health Routes
// ============================================================================

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/health", get(health_check))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub update_in_progress: bool,
}

async fn health_check(State(state): State<AppStateArc>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        update_in_progress: state.handoff.is_update_in_progress(),
    })
}
