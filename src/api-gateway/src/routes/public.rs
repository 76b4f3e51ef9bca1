//! Public routes served by the gateway itself

use axum::{routing::get, Router};

use crate::{handlers, state::AppState};

/// Create public routes router
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(handlers::health::health_check))
}
