//! HTTP control plane over the task supervisor.
//!
//! Every route is also served under `/api`. Job control, status, logs and
//! data listings are JSON; `/ws/logs` and `/ws/status` stream text frames.

pub mod data;
mod routes;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::logging::{self, LogHub};
use crate::supervisor::TaskSupervisor;

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub supervisor: TaskSupervisor,
    pub logs: Arc<LogHub>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// State over the process log hub and the supervisor's data directory.
    #[must_use]
    pub fn new(supervisor: TaskSupervisor) -> Self {
        let data_dir = match supervisor.base_config().data_dir.trim() {
            "" => PathBuf::from("data"),
            dir => PathBuf::from(dir),
        };
        Self {
            supervisor,
            logs: logging::hub(),
            data_dir,
        }
    }

    #[must_use]
    pub fn with_logs(mut self, logs: Arc<LogHub>) -> Self {
        self.logs = logs;
        self
    }
}

fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(routes::health))
        .route("/health", get(routes::health))
        .route("/status", get(routes::status))
        .route("/run", post(routes::run))
        .route("/stop", post(routes::stop))
        .route("/logs", get(routes::logs))
        .route("/crawler/logs", get(routes::logs))
        .route("/crawler/status", get(routes::status))
        .route("/crawler/start", post(routes::run))
        .route("/crawler/stop", post(routes::stop))
        .route("/config/platforms", get(routes::platforms))
        .route("/config/options", get(routes::options))
        .route("/data/files", get(routes::data_files))
        .route("/data/download/{*path}", get(routes::data_download))
        .route("/data/stats", get(routes::data_stats))
        .route("/ws/logs", get(ws::logs))
        .route("/ws/status", get(ws::status))
}

/// Builds the control-plane router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(routes())
        .nest("/api", routes())
        .with_state(state)
}

/// Serves the control plane until `shutdown` fires.
///
/// # Errors
///
/// Returns the bind or accept error.
pub async fn serve(addr: &str, state: AppState, shutdown: CancellationToken) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "control plane listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
