//! Audit HTTP API over the account ledger.

mod handlers;
mod middleware;
mod types;

pub use handlers::*;
pub use middleware::logging_middleware;
pub use types::*;

use account_ledger::Ledger;
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Attempt ledger
    pub ledger: Ledger,
    /// Target directory for credential exports
    pub export_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(ledger: Ledger, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            ledger,
            export_dir: Arc::new(export_dir.into()),
        }
    }
}

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/v1/attempts", get(handlers::list_attempts))
        .route("/v1/attempts/:id", get(handlers::get_attempt))
        .route("/v1/attempts/:id/credential", get(handlers::get_credential))
        .route("/v1/attempts/:id/export", post(handlers::export_credential))
        .route("/v1/stats", get(handlers::stats))
        .layer(axum_middleware::from_fn(logging_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
