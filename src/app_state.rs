//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::StationboardService;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Stationboard orchestration, including the per-process response cache.
    pub stationboard: Arc<StationboardService>,
}
