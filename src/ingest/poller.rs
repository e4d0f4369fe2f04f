//! Periodic fetch-decode-persist loop for one upstream feed.

use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use tokio::time::MissedTickBehavior;

use super::FeedError;
use crate::config::FeedSource;
use crate::domain::feed::{DecodedFeed, decode_feed};
use crate::persistence::{PersistOptions, PersistOutcome, SnapshotStore, persist};

/// Upper bound on a feed body.
const MAX_FEED_BYTES: usize = 50 * 1024 * 1024;
/// Per-request timeout of the feed download.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls one feed and replaces its stored snapshot on every tick.
#[derive(Debug)]
pub struct FeedPoller<S> {
    client: reqwest::Client,
    source: FeedSource,
    api_key: Option<String>,
    options: PersistOptions,
    store: S,
}

impl<S: SnapshotStore + 'static> FeedPoller<S> {
    /// Creates a poller for `source` writing through `store`.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        source: FeedSource,
        api_key: Option<String>,
        default_language: String,
        store: S,
    ) -> Self {
        let options = PersistOptions {
            write_lock_id: source.write_lock_id,
            retention_hours: source.retention_hours,
            default_language,
        };
        Self {
            client,
            source,
            api_key,
            options,
            store,
        }
    }

    /// Downloads and decodes the feed.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] on transport failures, non-success status,
    /// oversized bodies, or invalid protobuf.
    pub async fn fetch(&self) -> Result<DecodedFeed, FeedError> {
        let mut request = self.client.get(&self.source.url).timeout(FETCH_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, key);
        }
        let mut response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Status(status));
        }

        check_declared_len(response.content_length())?;
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            append_chunk(&mut body, &chunk)?;
        }
        Ok(decode_feed(&body)?)
    }

    /// Runs one fetch and persist cycle.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] when fetching or persisting fails.
    pub async fn poll_once(&self) -> Result<PersistOutcome, FeedError> {
        let feed = self.fetch().await?;
        Ok(persist(&self.store, self.source.kind, &feed, &self.options).await?)
    }

    /// Polls forever. Failures are logged and retried on the next tick.
    pub async fn run(self) {
        let kind = self.source.kind;
        let mut interval = tokio::time::interval(self.source.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(feed = %kind, url = %self.source.url, interval_secs = self.source.interval.as_secs(), "feed poller started");

        loop {
            interval.tick().await;
            match self.poll_once().await {
                Ok(PersistOutcome::Committed(report)) => {
                    tracing::info!(
                        feed = %kind,
                        inserted = report.inserted_rows,
                        deleted_by_snapshot = report.deleted_by_snapshot_rows,
                        deleted_by_retention = report.deleted_by_retention_rows,
                        "snapshot committed"
                    );
                }
                Ok(PersistOutcome::Skipped { .. }) => {
                    tracing::info!(feed = %kind, "snapshot write skipped, lock held by another ingester");
                }
                Err(FeedError::Persist(e)) => {
                    tracing::error!(
                        feed = %kind,
                        stage = %e.stage,
                        tx = ?e.tx_diagnostics,
                        error = %e,
                        "snapshot persist failed"
                    );
                }
                Err(e) => {
                    tracing::warn!(feed = %kind, error = %e, "feed fetch failed");
                }
            }
        }
    }
}

/// Rejects a response whose `Content-Length` already exceeds the ceiling.
fn check_declared_len(len: Option<u64>) -> Result<(), FeedError> {
    match len.map(|n| usize::try_from(n).unwrap_or(usize::MAX)) {
        Some(n) if n > MAX_FEED_BYTES => Err(FeedError::TooLarge(n)),
        _ => Ok(()),
    }
}

/// Appends a body chunk, stopping as soon as the ceiling is crossed.
fn append_chunk(body: &mut Vec<u8>, chunk: &[u8]) -> Result<(), FeedError> {
    let total = body.len().saturating_add(chunk.len());
    if total > MAX_FEED_BYTES {
        return Err(FeedError::TooLarge(total));
    }
    body.extend_from_slice(chunk);
    Ok(())
}
