//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::health::{CheckStatus, HealthChecks, HealthResponse};
use crate::infrastructure::health;
use crate::state::AppState;

/// Returns the reachability of the cache backend and the broker channel.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: Both resources reachable
/// - **503 Service Unavailable**: One or both unreachable
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "checks": {
///     "cache": { "status": "ok", "message": "Cache backend reachable" },
///     "broker": { "status": "ok", "message": "Broker channel reachable" }
///   }
/// }
/// ```
///
/// A disabled cache (no Redis configured) reports as reachable.
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let report = health::check(&state.store, &state.bus).await;

    let response = HealthResponse {
        status: if report.is_healthy() { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            cache: CheckStatus::from_check(
                report.cache,
                "Cache backend reachable",
                "Cache backend unreachable",
            ),
            broker: CheckStatus::from_check(
                report.broker,
                "Broker channel reachable",
                "Broker channel unreachable",
            ),
        },
    };

    if report.is_healthy() {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
