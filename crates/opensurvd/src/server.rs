//! HTTP server for opensurvd

use crate::config::Config;
use crate::routes;
use anyhow::Result;
use axum::Router;
use opensurv_common::process::{ProcessControl, SystemProcessControl};
use opensurv_common::{
    detect_relaunch, ArtifactDownloader, ProcessHandoff, ReleaseFetcher, RelaunchStatus,
    UpdateStager,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
pub struct AppState {
    pub config: Config,
    pub fetcher: ReleaseFetcher,
    pub handoff: ProcessHandoff,
    pub current_version: String,
    pub start_time: Instant,
    /// What the update marker said when we started
    pub relaunch: RelaunchStatus,
}

pub type AppStateArc = Arc<AppState>;

impl AppState {
    pub fn new(
        config: Config,
        control: Arc<dyn ProcessControl>,
        relaunch: RelaunchStatus,
    ) -> Result<Self> {
        let stager = UpdateStager::new(config.update.work_dir()?)?
            .with_relaunch_wrapper(config.update.relaunch_wrapper.clone())
            .with_config_path(config.source.clone());
        Ok(Self::with_stager(config, stager, control, relaunch))
    }

    /// Build state around an explicit stager (tests point it at a temp dir)
    pub fn with_stager(
        config: Config,
        stager: UpdateStager,
        control: Arc<dyn ProcessControl>,
        relaunch: RelaunchStatus,
    ) -> Self {
        let update = &config.update;
        let fetcher = update.release_fetcher();

        let handoff = ProcessHandoff::new(
            ArtifactDownloader::new(update.download_timeout()),
            stager,
            control,
        )
        .with_exit_delay(update.exit_delay());

        Self {
            current_version: update.current_version().to_string(),
            fetcher,
            handoff,
            start_time: Instant::now(),
            relaunch,
            config,
        }
    }
}

/// All routes with shared state and request tracing
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes::update_routes())
        .merge(routes::version_routes())
        .merge(routes::health_routes())
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server
pub async fn run(state: AppState) -> Result<()> {
    let addr = state.config.listen_addr();
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("  Listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// `opensurvd serve`: settle any previous update, then serve
pub async fn serve(config: Config) -> Result<()> {
    info!("OpenSurv manager v{} starting", config.update.current_version());

    let work_dir = config.update.work_dir()?;
    let relaunch = detect_relaunch(&work_dir);
    match &relaunch {
        RelaunchStatus::ColdStart => {}
        RelaunchStatus::RelaunchedAfterUpdate { version } => info!(
            "Restarted by the updater (now {})",
            version.as_deref().unwrap_or("unknown version")
        ),
        RelaunchStatus::PreviousUpdateFailed { reason } => {
            warn!("Previous update failed: {}", reason)
        }
        RelaunchStatus::UpdateInterrupted { phase } => warn!(
            "Previous update stopped in phase {:?}; rerun the installer or `opensurvd apply-update`",
            phase
        ),
    }

    let state = AppState::new(config, Arc::new(SystemProcessControl), relaunch)?;
    run(state).await
}
