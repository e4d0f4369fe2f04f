//! PostgreSQL implementation of the snapshot store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};

use super::models::{
    FeedStateRow, ServiceAlertRow, SnapshotTable, StopTimeUpdateRow, TripUpdateRow,
};
use super::snapshot::{SnapshotStore, SnapshotTx};

/// Rows per multi-row `INSERT`; keeps bind parameters well under the
/// protocol limit of 65535.
const INSERT_CHUNK: usize = 1_000;

/// PostgreSQL-backed snapshot store using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PgSnapshotStore {
    pool: PgPool,
}

impl PgSnapshotStore {
    /// Creates a new store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// An open snapshot transaction. Owns its pooled connection, which returns
/// to the pool when the value is committed, rolled back or dropped.
#[derive(Debug)]
pub struct PgSnapshotTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    type Tx = PgSnapshotTx;

    async fn begin(&self) -> Result<PgSnapshotTx, sqlx::Error> {
        Ok(PgSnapshotTx {
            tx: self.pool.begin().await?,
        })
    }
}

#[async_trait]
impl SnapshotTx for PgSnapshotTx {
    async fn try_advisory_xact_lock(&mut self, lock_id: i64) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
            .bind(lock_id)
            .fetch_one(&mut *self.tx)
            .await
    }

    async fn delete_older_than(
        &mut self,
        table: SnapshotTable,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let sql = format!("DELETE FROM {} WHERE updated_at < $1", table.name());
        let result = sqlx::query(&sql)
            .bind(cutoff)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&mut self, table: SnapshotTable) -> Result<u64, sqlx::Error> {
        let sql = format!("DELETE FROM {}", table.name());
        let result = sqlx::query(&sql).execute(&mut *self.tx).await?;
        Ok(result.rows_affected())
    }

    async fn insert_trip_updates(&mut self, rows: &[TripUpdateRow]) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO rt_trip_updates (trip_id, route_id, start_date, start_time, \
                 schedule_relationship, vehicle_id, delay_seconds, measured_at, updated_at) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(&row.trip_id)
                    .push_bind(&row.route_id)
                    .push_bind(&row.start_date)
                    .push_bind(&row.start_time)
                    .push_bind(&row.schedule_relationship)
                    .push_bind(&row.vehicle_id)
                    .push_bind(row.delay_seconds)
                    .push_bind(row.measured_at)
                    .push_bind(row.updated_at);
            });
            inserted += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_stop_time_updates(
        &mut self,
        rows: &[StopTimeUpdateRow],
    ) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO rt_stop_time_updates (trip_id, stop_id, stop_sequence, route_id, \
                 start_date, arrival_delay, arrival_time, departure_delay, departure_time, \
                 schedule_relationship, updated_at) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(&row.trip_id)
                    .push_bind(&row.stop_id)
                    .push_bind(row.stop_sequence)
                    .push_bind(&row.route_id)
                    .push_bind(&row.start_date)
                    .push_bind(row.arrival_delay)
                    .push_bind(row.arrival_time)
                    .push_bind(row.departure_delay)
                    .push_bind(row.departure_time)
                    .push_bind(&row.schedule_relationship)
                    .push_bind(row.updated_at);
            });
            inserted += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn insert_service_alerts(
        &mut self,
        rows: &[ServiceAlertRow],
    ) -> Result<u64, sqlx::Error> {
        let mut inserted = 0;
        for chunk in rows.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Postgres>::new(
                "INSERT INTO rt_service_alerts (alert_id, cause, effect, informed_entities, \
                 active_periods, header_translations, description_translations, \
                 url_translations, updated_at) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(&row.alert_id)
                    .push_bind(&row.cause)
                    .push_bind(&row.effect)
                    .push_bind(&row.informed_entities)
                    .push_bind(&row.active_periods)
                    .push_bind(&row.header_translations)
                    .push_bind(&row.description_translations)
                    .push_bind(&row.url_translations)
                    .push_bind(row.updated_at);
            });
            inserted += qb.build().execute(&mut *self.tx).await?.rows_affected();
        }
        Ok(inserted)
    }

    async fn upsert_feed_state(&mut self, state: &FeedStateRow) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO rt_feed_state (feed_kind, fetched_at, feed_timestamp, entity_count) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (feed_kind) DO UPDATE SET fetched_at = EXCLUDED.fetched_at, \
             feed_timestamp = EXCLUDED.feed_timestamp, entity_count = EXCLUDED.entity_count",
        )
        .bind(state.feed_kind.as_str())
        .bind(state.fetched_at)
        .bind(state.feed_timestamp)
        .bind(state.entity_count)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        self.tx.commit().await
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        self.tx.rollback().await
    }
}
