//! GTFS-Realtime ingestion: one [`FeedPoller`] per configured feed.

pub mod poller;

pub use poller::FeedPoller;

use tokio::task::JoinHandle;

use crate::config::IngestConfig;
use crate::persistence::{PersistError, PgSnapshotStore};

/// Feed ingestion failure.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// Transport failure.
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Upstream answered with a non-success status.
    #[error("feed returned HTTP {0}")]
    Status(reqwest::StatusCode),

    /// Body exceeds the size ceiling.
    #[error("feed body too large: {0} bytes")]
    TooLarge(usize),

    /// Body is not a `FeedMessage`.
    #[error("feed decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Snapshot write failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Spawns a poller task per configured feed. Returns no handles when
/// ingestion is disabled.
pub fn spawn_pollers(
    config: &IngestConfig,
    client: &reqwest::Client,
    store: &PgSnapshotStore,
) -> Vec<JoinHandle<()>> {
    if !config.enabled {
        tracing::info!("feed ingestion disabled");
        return Vec::new();
    }
    if config.feeds.is_empty() {
        tracing::warn!("feed ingestion enabled but no feed URL configured");
    }

    config
        .feeds
        .iter()
        .map(|source| {
            let poller = FeedPoller::new(
                client.clone(),
                source.clone(),
                config.api_key.clone(),
                config.alerts_default_language.clone(),
                store.clone(),
            );
            tokio::spawn(poller.run())
        })
        .collect()
}
