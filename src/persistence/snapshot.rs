//! Snapshot persistor: transactional replace of a realtime feed snapshot.
//!
//! [`persist`] replaces every stored row of one feed kind with the rows of
//! a freshly decoded feed, inside a single transaction guarded by a
//! transaction-scoped advisory lock:
//!
//! 1. check out a connection and `BEGIN`;
//! 2. try the advisory lock for the kind; when another ingester holds it,
//!    roll back and report [`PersistOutcome::Skipped`];
//! 3. purge rows older than the retention window, for every table;
//! 4. delete all remaining rows, for every table;
//! 5. insert the new rows, parents first, and upsert `rt_feed_state`;
//! 6. `COMMIT`, or `ROLLBACK` on any failure in 3–5.
//!
//! Retention purges of all tables run strictly before the snapshot deletes.
//! The lock is released by the database when the transaction ends, and the
//! connection goes back to the pool when the transaction value is consumed
//! by `commit` or `rollback`, on every path.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::models::{
    FeedStateRow, ServiceAlertRow, SnapshotRows, SnapshotTable, StopTimeUpdateRow, TripUpdateRow,
};
use crate::domain::feed::{DecodedFeed, FeedKind};

/// Source of snapshot transactions; one call checks out one connection.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Transaction type.
    type Tx: SnapshotTx;

    /// Checks out a connection and opens a transaction on it.
    ///
    /// # Errors
    ///
    /// Propagates connection and `BEGIN` failures.
    async fn begin(&self) -> Result<Self::Tx, sqlx::Error>;
}

/// Statements the persistor issues inside one transaction.
#[async_trait]
pub trait SnapshotTx: Send + Sized {
    /// Tries the transaction-scoped advisory lock without waiting.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn try_advisory_xact_lock(&mut self, lock_id: i64) -> Result<bool, sqlx::Error>;

    /// Deletes rows of `table` whose `updated_at` is before `cutoff`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn delete_older_than(
        &mut self,
        table: SnapshotTable,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error>;

    /// Deletes every row of `table`.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn delete_all(&mut self, table: SnapshotTable) -> Result<u64, sqlx::Error>;

    /// Inserts trip rows.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn insert_trip_updates(&mut self, rows: &[TripUpdateRow]) -> Result<u64, sqlx::Error>;

    /// Inserts stop-level rows.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn insert_stop_time_updates(
        &mut self,
        rows: &[StopTimeUpdateRow],
    ) -> Result<u64, sqlx::Error>;

    /// Inserts alert rows.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn insert_service_alerts(
        &mut self,
        rows: &[ServiceAlertRow],
    ) -> Result<u64, sqlx::Error>;

    /// Upserts the feed state row.
    ///
    /// # Errors
    ///
    /// Propagates database errors.
    async fn upsert_feed_state(&mut self, state: &FeedStateRow) -> Result<(), sqlx::Error>;

    /// Commits and releases the connection.
    ///
    /// # Errors
    ///
    /// Propagates `COMMIT` failures.
    async fn commit(self) -> Result<(), sqlx::Error>;

    /// Rolls back and releases the connection.
    ///
    /// # Errors
    ///
    /// Propagates `ROLLBACK` failures.
    async fn rollback(self) -> Result<(), sqlx::Error>;
}

/// Per-call options.
#[derive(Debug, Clone)]
pub struct PersistOptions {
    /// Advisory lock key for the feed kind.
    pub write_lock_id: i64,
    /// Rows older than this are purged before the replace.
    pub retention_hours: u32,
    /// Language assigned to alert texts without one.
    pub default_language: String,
}

impl PersistOptions {
    /// Defaults for `kind`.
    #[must_use]
    pub fn for_kind(kind: FeedKind) -> Self {
        Self {
            write_lock_id: kind.default_write_lock_id(),
            retention_hours: kind.default_retention_hours(),
            default_language: "de".to_string(),
        }
    }
}

/// What happened to the transaction and its connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxDiagnostics {
    /// A connection was checked out and a transaction opened on it.
    pub transaction_client_used: bool,
    /// `COMMIT` succeeded.
    pub transaction_committed: bool,
    /// `ROLLBACK` succeeded.
    pub transaction_rolled_back: bool,
    /// The connection is back in the pool.
    pub client_released: bool,
}

impl TxDiagnostics {
    const fn committed() -> Self {
        Self {
            transaction_client_used: true,
            transaction_committed: true,
            transaction_rolled_back: false,
            client_released: true,
        }
    }

    const fn rolled_back(ok: bool) -> Self {
        Self {
            transaction_client_used: true,
            transaction_committed: false,
            transaction_rolled_back: ok,
            client_released: true,
        }
    }
}

/// Counts of a committed replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistReport {
    /// Rows removed by the retention purge.
    pub deleted_by_retention_rows: u64,
    /// Rows removed by the snapshot delete.
    pub deleted_by_snapshot_rows: u64,
    /// Rows inserted.
    pub inserted_rows: u64,
    /// Transaction outcome.
    pub tx_diagnostics: TxDiagnostics,
}

/// Result of a [`persist`] call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Snapshot replaced.
    Committed(PersistReport),
    /// Another ingester holds the lock; nothing was written.
    Skipped {
        /// Transaction outcome.
        tx_diagnostics: TxDiagnostics,
    },
}

/// Step of [`persist`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStage {
    /// Connection checkout or `BEGIN`.
    Begin,
    /// Advisory lock.
    Lock,
    /// Retention purge.
    RetentionPurge,
    /// Snapshot delete.
    SnapshotDelete,
    /// Row insert.
    Insert,
    /// Feed state upsert.
    FeedState,
    /// `COMMIT`.
    Commit,
}

impl fmt::Display for PersistStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin",
            Self::Lock => "lock",
            Self::RetentionPurge => "retention_purge",
            Self::SnapshotDelete => "snapshot_delete",
            Self::Insert => "insert",
            Self::FeedState => "feed_state",
            Self::Commit => "commit",
        })
    }
}

/// Snapshot write failure. Nothing was committed.
#[derive(Debug, thiserror::Error)]
#[error("persisting {feed_kind} snapshot failed at {stage}: {source}")]
pub struct PersistError {
    /// Feed kind being written.
    pub feed_kind: FeedKind,
    /// Failing step.
    pub stage: PersistStage,
    /// Transaction outcome.
    pub tx_diagnostics: TxDiagnostics,
    /// Database error.
    #[source]
    pub source: sqlx::Error,
}

/// Replaces the stored snapshot of `kind` with the content of `feed`.
///
/// # Errors
///
/// Returns [`PersistError`] when any statement fails. The transaction has
/// been rolled back and the connection released by then.
pub async fn persist<S: SnapshotStore>(
    store: &S,
    kind: FeedKind,
    feed: &DecodedFeed,
    options: &PersistOptions,
) -> Result<PersistOutcome, PersistError> {
    let now = Utc::now();
    let rows = SnapshotRows::from_feed(kind, feed, now, &options.default_language);
    let fail = |stage, tx_diagnostics, source| PersistError {
        feed_kind: kind,
        stage,
        tx_diagnostics,
        source,
    };

    let mut tx = store.begin().await.map_err(|e| {
        fail(
            PersistStage::Begin,
            TxDiagnostics {
                client_released: true,
                ..TxDiagnostics::default()
            },
            e,
        )
    })?;

    let granted = match tx.try_advisory_xact_lock(options.write_lock_id).await {
        Ok(granted) => granted,
        Err(e) => {
            let rolled_back = release(tx, kind).await;
            return Err(fail(PersistStage::Lock, TxDiagnostics::rolled_back(rolled_back), e));
        }
    };
    if !granted {
        let rolled_back = release(tx, kind).await;
        tracing::info!(
            feed_kind = %kind,
            lock_id = options.write_lock_id,
            "snapshot write lock held elsewhere, skipping cycle"
        );
        return Ok(PersistOutcome::Skipped {
            tx_diagnostics: TxDiagnostics::rolled_back(rolled_back),
        });
    }

    let cutoff = retention_cutoff(now, options.retention_hours);
    let counts = match replace(&mut tx, kind, &rows, cutoff, now, feed).await {
        Ok(counts) => counts,
        Err((stage, e)) => {
            let rolled_back = release(tx, kind).await;
            tracing::warn!(feed_kind = %kind, %stage, error = %e, "snapshot replace rolled back");
            return Err(fail(stage, TxDiagnostics::rolled_back(rolled_back), e));
        }
    };

    tx.commit().await.map_err(|e| {
        fail(
            PersistStage::Commit,
            TxDiagnostics {
                transaction_client_used: true,
                client_released: true,
                ..TxDiagnostics::default()
            },
            e,
        )
    })?;

    let report = PersistReport {
        deleted_by_retention_rows: counts.retention,
        deleted_by_snapshot_rows: counts.snapshot,
        inserted_rows: counts.inserted,
        tx_diagnostics: TxDiagnostics::committed(),
    };
    tracing::info!(
        feed_kind = %kind,
        deleted_by_retention_rows = report.deleted_by_retention_rows,
        deleted_by_snapshot_rows = report.deleted_by_snapshot_rows,
        inserted_rows = report.inserted_rows,
        "snapshot committed"
    );
    Ok(PersistOutcome::Committed(report))
}

struct Counts {
    retention: u64,
    snapshot: u64,
    inserted: u64,
}

async fn replace<T: SnapshotTx>(
    tx: &mut T,
    kind: FeedKind,
    rows: &SnapshotRows,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
    feed: &DecodedFeed,
) -> Result<Counts, (PersistStage, sqlx::Error)> {
    let tables = SnapshotTable::for_kind(kind);

    let mut retention = 0;
    for &table in tables {
        retention += tx
            .delete_older_than(table, cutoff)
            .await
            .map_err(|e| (PersistStage::RetentionPurge, e))?;
    }

    let mut snapshot = 0;
    for &table in tables {
        snapshot += tx
            .delete_all(table)
            .await
            .map_err(|e| (PersistStage::SnapshotDelete, e))?;
    }

    let insert = |e| (PersistStage::Insert, e);
    let inserted = match kind {
        FeedKind::TripUpdates => {
            tx.insert_trip_updates(&rows.trip_updates)
                .await
                .map_err(insert)?
                + tx
                    .insert_stop_time_updates(&rows.stop_time_updates)
                    .await
                    .map_err(insert)?
        }
        FeedKind::ServiceAlerts => tx
            .insert_service_alerts(&rows.service_alerts)
            .await
            .map_err(insert)?,
    };

    tx.upsert_feed_state(&FeedStateRow {
        feed_kind: kind,
        fetched_at: now,
        feed_timestamp: feed.header_timestamp(),
        entity_count: i64::try_from(rows.entity_count(kind)).unwrap_or(i64::MAX),
    })
    .await
    .map_err(|e| (PersistStage::FeedState, e))?;

    Ok(Counts {
        retention,
        snapshot,
        inserted,
    })
}

/// Rolls back, returning whether `ROLLBACK` succeeded. The connection is
/// released either way.
/// Oldest `updated_at` that survives the purge. A window reaching past the
/// representable range keeps everything.
fn retention_cutoff(now: DateTime<Utc>, retention_hours: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::hours(i64::from(retention_hours)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn release<T: SnapshotTx>(tx: T, kind: FeedKind) -> bool {
    match tx.rollback().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(feed_kind = %kind, error = %e, "snapshot rollback failed");
            false
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};

    /// Committed table contents and bookkeeping shared by the double.
    #[derive(Debug, Default)]
    struct MemoryState {
        tables: HashMap<&'static str, Vec<DateTime<Utc>>>,
        alerts: Vec<ServiceAlertRow>,
        feed_state: HashMap<FeedKind, FeedStateRow>,
        statements: Vec<String>,
        checked_out: usize,
        lock_held_elsewhere: bool,
        fail_on: Option<&'static str>,
    }

    #[derive(Debug, Clone, Default)]
    struct MemoryStore {
        state: Arc<Mutex<MemoryState>>,
    }

    impl MemoryStore {
        fn state(&self) -> MutexGuard<'_, MemoryState> {
            let Ok(guard) = self.state.lock() else {
                panic!("memory store poisoned");
            };
            guard
        }

        fn seed(&self, table: SnapshotTable, updated_at: &[DateTime<Utc>]) {
            self.state()
                .tables
                .entry(table.name())
                .or_default()
                .extend_from_slice(updated_at);
        }

        fn rows(&self, table: SnapshotTable) -> usize {
            self.state().tables.get(table.name()).map_or(0, Vec::len)
        }
    }

    /// Works on a private copy of the tables; `commit` publishes it.
    #[derive(Debug)]
    struct MemoryTx {
        store: MemoryStore,
        tables: HashMap<&'static str, Vec<DateTime<Utc>>>,
        alerts: Vec<ServiceAlertRow>,
        feed_state: Option<FeedStateRow>,
    }

    impl MemoryTx {
        fn record(&self, statement: String) -> Result<(), sqlx::Error> {
            let mut state = self.store.state();
            let failing = state.fail_on.is_some_and(|f| statement.starts_with(f));
            state.statements.push(statement);
            if failing {
                return Err(sqlx::Error::Protocol("injected failure".to_string()));
            }
            Ok(())
        }

        fn insert(&mut self, table: SnapshotTable, n: usize, at: DateTime<Utc>) -> u64 {
            self.tables
                .entry(table.name())
                .or_default()
                .extend(std::iter::repeat_n(at, n));
            n as u64
        }

        fn finish(self, statement: &str, publish: bool) {
            let mut state = self.store.state();
            state.statements.push(statement.to_string());
            if publish {
                state.tables = self.tables;
                state.alerts = self.alerts;
                if let Some(fs) = self.feed_state {
                    state.feed_state.insert(fs.feed_kind, fs);
                }
            }
            state.checked_out -= 1;
        }
    }

    #[async_trait]
    impl SnapshotStore for MemoryStore {
        type Tx = MemoryTx;

        async fn begin(&self) -> Result<MemoryTx, sqlx::Error> {
            let mut state = self.state();
            state.checked_out += 1;
            state.statements.push("BEGIN".to_string());
            Ok(MemoryTx {
                store: self.clone(),
                tables: state.tables.clone(),
                alerts: state.alerts.clone(),
                feed_state: None,
            })
        }
    }

    #[async_trait]
    impl SnapshotTx for MemoryTx {
        async fn try_advisory_xact_lock(&mut self, lock_id: i64) -> Result<bool, sqlx::Error> {
            self.record(format!("LOCK {lock_id}"))?;
            Ok(!self.store.state().lock_held_elsewhere)
        }

        async fn delete_older_than(
            &mut self,
            table: SnapshotTable,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, sqlx::Error> {
            self.record(format!("RETENTION {}", table.name()))?;
            let rows = self.tables.entry(table.name()).or_default();
            let before = rows.len();
            rows.retain(|at| *at >= cutoff);
            Ok((before - rows.len()) as u64)
        }

        async fn delete_all(&mut self, table: SnapshotTable) -> Result<u64, sqlx::Error> {
            self.record(format!("DELETE {}", table.name()))?;
            let n = self.tables.remove(table.name()).map_or(0, |r| r.len());
            if table == SnapshotTable::ServiceAlerts {
                self.alerts.clear();
            }
            Ok(n as u64)
        }

        async fn insert_trip_updates(
            &mut self,
            rows: &[TripUpdateRow],
        ) -> Result<u64, sqlx::Error> {
            self.record(format!("INSERT {}", SnapshotTable::TripUpdates.name()))?;
            let at = rows.first().map_or_else(Utc::now, |r| r.updated_at);
            Ok(self.insert(SnapshotTable::TripUpdates, rows.len(), at))
        }

        async fn insert_stop_time_updates(
            &mut self,
            rows: &[StopTimeUpdateRow],
        ) -> Result<u64, sqlx::Error> {
            self.record(format!("INSERT {}", SnapshotTable::StopTimeUpdates.name()))?;
            let at = rows.first().map_or_else(Utc::now, |r| r.updated_at);
            Ok(self.insert(SnapshotTable::StopTimeUpdates, rows.len(), at))
        }

        async fn insert_service_alerts(
            &mut self,
            rows: &[ServiceAlertRow],
        ) -> Result<u64, sqlx::Error> {
            self.record(format!("INSERT {}", SnapshotTable::ServiceAlerts.name()))?;
            let at = rows.first().map_or_else(Utc::now, |r| r.updated_at);
            self.alerts.extend_from_slice(rows);
            Ok(self.insert(SnapshotTable::ServiceAlerts, rows.len(), at))
        }

        async fn upsert_feed_state(&mut self, state: &FeedStateRow) -> Result<(), sqlx::Error> {
            self.record(format!("FEED_STATE {}", state.feed_kind))?;
            self.feed_state = Some(state.clone());
            Ok(())
        }

        async fn commit(self) -> Result<(), sqlx::Error> {
            self.finish("COMMIT", true);
            Ok(())
        }

        async fn rollback(self) -> Result<(), sqlx::Error> {
            self.finish("ROLLBACK", false);
            Ok(())
        }
    }

    fn feed(json: serde_json::Value) -> DecodedFeed {
        let Ok(feed) = serde_json::from_value(json) else {
            panic!("test feed should deserialize");
        };
        feed
    }

    fn trip_feed(trips: usize) -> DecodedFeed {
        let entities: Vec<_> = (0..trips)
            .map(|i| {
                serde_json::json!({
                    "id": format!("e{i}"),
                    "trip_update": {
                        "trip": { "trip_id": format!("T{i}") },
                        "stop_time_update": [ { "stop_sequence": 1, "stop_id": "A" } ]
                    }
                })
            })
            .collect();
        feed(serde_json::json!({ "header": { "timestamp": 1_700_000_000u64 }, "entity": entities }))
    }

    #[tokio::test]
    async fn retention_runs_before_snapshot_replace_for_every_table() {
        let store = MemoryStore::default();
        let Ok(outcome) = persist(
            &store,
            FeedKind::TripUpdates,
            &trip_feed(2),
            &PersistOptions::for_kind(FeedKind::TripUpdates),
        )
        .await
        else {
            panic!("persist should succeed");
        };
        assert!(matches!(outcome, PersistOutcome::Committed(_)));

        let statements = store.state().statements.clone();
        assert_eq!(
            statements,
            vec![
                "BEGIN",
                "LOCK 84955834373456",
                "RETENTION rt_stop_time_updates",
                "RETENTION rt_trip_updates",
                "DELETE rt_stop_time_updates",
                "DELETE rt_trip_updates",
                "INSERT rt_trip_updates",
                "INSERT rt_stop_time_updates",
                "FEED_STATE trip_updates",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn replace_leaves_exactly_the_new_snapshot() {
        let store = MemoryStore::default();
        let now = Utc::now();
        let old = now - Duration::hours(5);
        store.seed(SnapshotTable::TripUpdates, &[old, old, now, now, now]);
        store.seed(SnapshotTable::StopTimeUpdates, &[old, now]);

        let Ok(PersistOutcome::Committed(report)) = persist(
            &store,
            FeedKind::TripUpdates,
            &trip_feed(3),
            &PersistOptions::for_kind(FeedKind::TripUpdates),
        )
        .await
        else {
            panic!("persist should commit");
        };

        assert_eq!(report.deleted_by_retention_rows, 3);
        assert_eq!(report.deleted_by_snapshot_rows, 4);
        assert_eq!(report.inserted_rows, 6);
        assert_eq!(report.tx_diagnostics, TxDiagnostics::committed());
        assert_eq!(store.rows(SnapshotTable::TripUpdates), 3);
        assert_eq!(store.rows(SnapshotTable::StopTimeUpdates), 3);
        assert_eq!(store.state().checked_out, 0);

        let state = store.state();
        let Some(fs) = state.feed_state.get(&FeedKind::TripUpdates) else {
            panic!("feed state should be recorded");
        };
        assert_eq!(fs.entity_count, 3);
        assert_eq!(fs.feed_timestamp.map(|t| t.timestamp()), Some(1_700_000_000));
    }

    #[tokio::test]
    async fn oversized_retention_window_purges_nothing() {
        let store = MemoryStore::default();
        let old = Utc::now() - Duration::hours(5);
        store.seed(SnapshotTable::TripUpdates, &[old, old]);

        let options = PersistOptions {
            retention_hours: u32::MAX,
            ..PersistOptions::for_kind(FeedKind::TripUpdates)
        };
        let Ok(PersistOutcome::Committed(report)) =
            persist(&store, FeedKind::TripUpdates, &trip_feed(1), &options).await
        else {
            panic!("persist should commit");
        };
        assert_eq!(report.deleted_by_retention_rows, 0);
        assert_eq!(report.deleted_by_snapshot_rows, 2);
        assert_eq!(store.rows(SnapshotTable::TripUpdates), 1);

        let now = Utc::now();
        assert_eq!(retention_cutoff(now, u32::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(retention_cutoff(now, 2), now - Duration::hours(2));
    }

    #[tokio::test]
    async fn failure_mid_transaction_rolls_back_and_releases() {
        let store = MemoryStore::default();
        store.seed(SnapshotTable::ServiceAlerts, &[Utc::now()]);
        store.state().fail_on = Some("INSERT rt_service_alerts");

        let alerts = feed(serde_json::json!({
            "entity": [ { "id": "a1", "alert": { "header_text": "Plain text only" } } ]
        }));
        let Err(err) = persist(
            &store,
            FeedKind::ServiceAlerts,
            &alerts,
            &PersistOptions::for_kind(FeedKind::ServiceAlerts),
        )
        .await
        else {
            panic!("persist should fail");
        };

        assert_eq!(err.stage, PersistStage::Insert);
        assert_eq!(err.feed_kind, FeedKind::ServiceAlerts);
        assert!(err.tx_diagnostics.transaction_client_used);
        assert!(!err.tx_diagnostics.transaction_committed);
        assert!(err.tx_diagnostics.transaction_rolled_back);
        assert!(err.tx_diagnostics.client_released);

        let state = store.state();
        assert_eq!(state.checked_out, 0);
        assert_eq!(state.statements.last().map(String::as_str), Some("ROLLBACK"));
        assert_eq!(state.tables.get("rt_service_alerts").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn lock_held_elsewhere_skips_without_writing() {
        let store = MemoryStore::default();
        store.seed(SnapshotTable::TripUpdates, &[Utc::now()]);
        store.state().lock_held_elsewhere = true;

        let Ok(PersistOutcome::Skipped { tx_diagnostics }) = persist(
            &store,
            FeedKind::TripUpdates,
            &trip_feed(4),
            &PersistOptions::for_kind(FeedKind::TripUpdates),
        )
        .await
        else {
            panic!("persist should skip");
        };

        assert!(!tx_diagnostics.transaction_committed);
        assert!(tx_diagnostics.client_released);
        let state = store.state();
        assert_eq!(state.checked_out, 0);
        assert_eq!(state.statements, vec!["BEGIN", "LOCK 84955834373456", "ROLLBACK"]);
        assert_eq!(state.tables.get("rt_trip_updates").map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn stored_alert_texts_read_back_normalized() {
        let store = MemoryStore::default();
        let alerts = feed(serde_json::json!({
            "entity": [
                { "id": "plain", "alert": { "header_text": "Plain text only" } },
                { "id": "multi", "alert": { "description_text": { "translation": [
                    { "text": "Gleis 3 gesperrt", "language": "de" },
                    { "text": "Voie 3 fermée", "language": "fr" },
                    { "text": "Binario 3 chiuso", "language": "it" }
                ]}}}
            ]
        }));
        let options = PersistOptions {
            default_language: "en".to_string(),
            ..PersistOptions::for_kind(FeedKind::ServiceAlerts)
        };
        let Ok(PersistOutcome::Committed(report)) =
            persist(&store, FeedKind::ServiceAlerts, &alerts, &options).await
        else {
            panic!("persist should commit");
        };
        assert_eq!(report.inserted_rows, 2);

        let state = store.state();
        let Some(plain) = state.alerts.iter().find(|a| a.alert_id == "plain") else {
            panic!("plain alert missing");
        };
        assert_eq!(
            plain.header_translations,
            serde_json::json!([{ "language": "en", "text": "Plain text only" }])
        );
        let Some(multi) = state.alerts.iter().find(|a| a.alert_id == "multi") else {
            panic!("translated alert missing");
        };
        let Some(list) = multi.description_translations.as_array() else {
            panic!("translations should be an array");
        };
        let languages: Vec<_> = list.iter().filter_map(|t| t["language"].as_str()).collect();
        assert_eq!(languages, vec!["de", "fr", "it"]);
    }

    #[test]
    fn diagnostics_serialize_camel_case() {
        let Ok(json) = serde_json::to_value(TxDiagnostics::rolled_back(true)) else {
            panic!("serialization failed");
        };
        assert_eq!(json["transactionRolledBack"], true);
        assert_eq!(json["clientReleased"], true);
        assert_eq!(json["transactionCommitted"], false);
    }
}
