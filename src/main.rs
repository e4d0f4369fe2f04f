//! stationboard-gateway server entry point.
//!
//! Runs the migrations, starts the feed pollers and serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use stationboard_gateway::api;
use stationboard_gateway::app_state::AppState;
use stationboard_gateway::config::GatewayConfig;
use stationboard_gateway::ingest::{self, poller::FETCH_TIMEOUT};
use stationboard_gateway::persistence::{PgSnapshotStore, PgStationboardBuilder, PgStopResolver};
use stationboard_gateway::service::StationboardService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = GatewayConfig::from_env().map_err(|e| anyhow::anyhow!(e))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(
        addr = %config.listen_addr,
        instance = %config.instance.id,
        build = %config.instance.build,
        "starting stationboard-gateway"
    );

    // Database
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .min_connections(config.database_min_connections)
        .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
        .connect(&config.database_url)
        .await
        .context("connecting to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running migrations")?;

    // Ingestion
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .context("building HTTP client")?;
    let pollers = ingest::spawn_pollers(&config.ingest, &client, &PgSnapshotStore::new(pool.clone()));
    tracing::info!(count = pollers.len(), "feed pollers spawned");

    // Build service layer
    let resolver = Arc::new(PgStopResolver::new(pool.clone()));
    let builder = Arc::new(PgStationboardBuilder::new(
        pool,
        config.static_timezone,
        config.stationboard.rt_defaults.freshness_threshold_ms,
    ));
    let stationboard = Arc::new(StationboardService::new(
        resolver,
        builder,
        config.stationboard.clone(),
        config.instance.clone(),
    ));

    // Build application state
    let app_state = AppState { stationboard };

    // Build router
    let app = Router::new()
        .merge(api::build_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
