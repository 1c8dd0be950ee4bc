//! API route configuration.

use crate::api::handlers::health_handler;
use crate::state::AppState;
use axum::{Router, routing::get};

/// Public routes.
///
/// # Endpoints
///
/// - `GET /health` - Cache backend and broker reachability
pub fn public_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
