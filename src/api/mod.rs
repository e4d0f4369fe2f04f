//! REST API layer: route handlers, DTOs, and router composition.
//!
//! The stationboard is served at `/api/stationboard`; system endpoints sit
//! next to it. The OpenAPI document is described by [`ApiDoc`].

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of the public endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "Stationboard API"),
    paths(
        handlers::stationboard::get_stationboard,
        handlers::system::health_handler,
        handlers::system::instance_handler,
    ),
    components(schemas(
        crate::domain::stationboard::StationboardResponse,
        crate::domain::stationboard::Station,
        crate::domain::rt_meta::RtMeta,
        crate::domain::rt_meta::AlertsMeta,
        crate::domain::rt_meta::InstanceInfo,
        crate::error::ErrorResponse,
        dto::HealthResponse,
        dto::InstanceResponse,
        dto::CacheStatsDto,
    )),
    tags(
        (name = "Stationboard", description = "Departure boards merged with realtime data"),
        (name = "System", description = "Health and instance identity"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .merge(handlers::routes())
        .merge(handlers::system::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}
