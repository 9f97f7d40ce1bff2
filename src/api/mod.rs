//! REST API over the forecast store, the optimizer and the tenant schedulers.
//!
//! - `GET|PUT /api/forecast`: read or replace the forecast snapshot
//! - `GET /api/optimize`: optimizer preview, never applied
//! - `GET /api/insight`: plain-language summary of the preview
//! - `GET /api/plan`: a tenant's current plan record
//! - `POST /api/apply`: apply an externally built plan
//! - `POST /api/reoptimize`: rebuild from the forecast and apply
//! - `POST /api/alarm`: run a tenant's drift check now

mod handlers;
pub mod types;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::insight::Summarizer;
use crate::runner::Orchestrator;

/// Application state shared across all request handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Optional text generator for `/api/insight`.
    pub summarizer: Option<Arc<dyn Summarizer>>,
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/forecast",
            get(handlers::get_forecast).put(handlers::put_forecast),
        )
        .route("/api/optimize", get(handlers::get_optimize))
        .route("/api/insight", get(handlers::get_insight))
        .route("/api/plan", get(handlers::get_plan))
        .route("/api/apply", post(handlers::post_apply))
        .route("/api/reoptimize", post(handlers::post_reoptimize))
        .route("/api/alarm", post(handlers::post_alarm))
        .with_state(state)
}

/// Binds to `addr` and serves the API until `shutdown` completes.
///
/// # Errors
///
/// Returns the I/O error if the listener cannot bind or the server fails.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
