//! Health HTTP endpoint

pub mod handlers;
pub mod state;

pub use state::AppState;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Create the health router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/status", get(handlers::status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
