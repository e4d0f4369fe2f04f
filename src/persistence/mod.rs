//! Persistence layer: realtime snapshot storage and the DB-bound
//! stationboard collaborators.
//!
//! [`snapshot::persist`] replaces the stored snapshot of one feed kind
//! inside a single transaction guarded by an advisory lock. The algorithm
//! is written against the [`SnapshotStore`] trait; [`PgSnapshotStore`] is
//! the `sqlx::PgPool` implementation. [`PgStopResolver`] and
//! [`PgStationboardBuilder`] read the static schedule and the snapshots to
//! serve the stationboard route.

pub mod models;
pub mod postgres;
pub mod snapshot;
pub mod stationboard_query;
pub mod stop_lookup;

pub use models::{SnapshotRows, SnapshotTable};
pub use postgres::PgSnapshotStore;
pub use snapshot::{
    PersistError, PersistOptions, PersistOutcome, PersistReport, SnapshotStore, SnapshotTx,
    TxDiagnostics, persist,
};
pub use stationboard_query::PgStationboardBuilder;
pub use stop_lookup::PgStopResolver;
