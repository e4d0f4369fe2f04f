//! System endpoints: health check and instance identity.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{CacheStatsDto, HealthResponse, InstanceResponse};
use crate::app_state::AppState;

/// `GET /health` — Service health status.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns service health status, version, instance id and current timestamp.",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            instance: state.stationboard.instance().id.clone(),
        }),
    )
}

/// `GET /api/instance` — Serving instance and cache occupancy.
///
/// Each instance owns an independent response cache; this endpoint lets
/// operators see which one answered.
#[utoipa::path(
    get,
    path = "/api/instance",
    tag = "System",
    summary = "Serving instance",
    description = "Returns the identity of the process that answered and its response cache occupancy.",
    responses(
        (status = 200, description = "Instance identity", body = InstanceResponse),
    )
)]
pub async fn instance_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.stationboard.cache_stats().await;
    Json(InstanceResponse {
        instance: state.stationboard.instance().clone(),
        cache: CacheStatsDto {
            entries: stats.entries,
            capacity: stats.capacity,
            in_flight: stats.in_flight,
        },
    })
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/instance", get(instance_handler))
}
