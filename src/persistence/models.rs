//! Database models for realtime snapshot rows.
//!
//! A decoded feed is flattened into these rows by [`SnapshotRows::from_feed`]
//! before anything touches the database, so the conversion can be tested
//! without a connection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::feed::{Alert, DecodedFeed, FeedKind, TranslatedText, TripUpdate};

/// Sequence stored when a stop time update carries none.
pub const UNKNOWN_STOP_SEQUENCE: i32 = -1;

/// Realtime snapshot tables, in the order they are purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotTable {
    /// Per-stop predictions, child of [`SnapshotTable::TripUpdates`].
    StopTimeUpdates,
    /// One row per trip.
    TripUpdates,
    /// One row per alert.
    ServiceAlerts,
}

impl SnapshotTable {
    /// SQL table name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StopTimeUpdates => "rt_stop_time_updates",
            Self::TripUpdates => "rt_trip_updates",
            Self::ServiceAlerts => "rt_service_alerts",
        }
    }

    /// Tables written by `kind`, children before parents.
    #[must_use]
    pub const fn for_kind(kind: FeedKind) -> &'static [Self] {
        match kind {
            FeedKind::TripUpdates => &[Self::StopTimeUpdates, Self::TripUpdates],
            FeedKind::ServiceAlerts => &[Self::ServiceAlerts],
        }
    }
}

/// A row of `rt_trip_updates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripUpdateRow {
    /// Static trip id, primary key.
    pub trip_id: String,
    /// Static route id.
    pub route_id: Option<String>,
    /// Service date, `YYYYMMDD`.
    pub start_date: Option<String>,
    /// Start time, `HH:MM:SS`.
    pub start_time: Option<String>,
    /// `SCHEDULED`, `CANCELED`, ...
    pub schedule_relationship: Option<String>,
    /// Vehicle serving the trip.
    pub vehicle_id: Option<String>,
    /// Trip-level delay in seconds.
    pub delay_seconds: Option<i32>,
    /// Producer measurement time.
    pub measured_at: Option<DateTime<Utc>>,
    /// Ingestion time.
    pub updated_at: DateTime<Utc>,
}

/// A row of `rt_stop_time_updates`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopTimeUpdateRow {
    /// Trip this prediction belongs to.
    pub trip_id: String,
    /// Stop, empty when the feed only gave a sequence.
    pub stop_id: String,
    /// Stop sequence, [`UNKNOWN_STOP_SEQUENCE`] when absent.
    pub stop_sequence: i32,
    /// Route of the trip.
    pub route_id: Option<String>,
    /// Service date of the trip.
    pub start_date: Option<String>,
    /// Arrival delay in seconds.
    pub arrival_delay: Option<i32>,
    /// Predicted arrival.
    pub arrival_time: Option<DateTime<Utc>>,
    /// Departure delay in seconds.
    pub departure_delay: Option<i32>,
    /// Predicted departure.
    pub departure_time: Option<DateTime<Utc>>,
    /// `SCHEDULED`, `SKIPPED`, `NO_DATA`.
    pub schedule_relationship: Option<String>,
    /// Ingestion time.
    pub updated_at: DateTime<Utc>,
}

/// A row of `rt_service_alerts`. JSON columns hold normalised arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAlertRow {
    /// Feed entity id, primary key.
    pub alert_id: String,
    /// Cause name.
    pub cause: Option<String>,
    /// Effect name.
    pub effect: Option<String>,
    /// `[{agency_id, route_id, route_type, trip_id, stop_id}]`.
    pub informed_entities: serde_json::Value,
    /// `[{start, end}]` in POSIX seconds.
    pub active_periods: serde_json::Value,
    /// `[{language, text}]`.
    pub header_translations: serde_json::Value,
    /// `[{language, text}]`.
    pub description_translations: serde_json::Value,
    /// `[{language, text}]`.
    pub url_translations: serde_json::Value,
    /// Ingestion time.
    pub updated_at: DateTime<Utc>,
}

/// The `rt_feed_state` row written with every committed snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedStateRow {
    /// Feed kind key.
    pub feed_kind: FeedKind,
    /// Ingestion time; compared by `since_rt`.
    pub fetched_at: DateTime<Utc>,
    /// Producer header timestamp.
    pub feed_timestamp: Option<DateTime<Utc>>,
    /// Rows written to the kind's primary table.
    pub entity_count: i64,
}

/// Everything one snapshot writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotRows {
    /// Trip rows.
    pub trip_updates: Vec<TripUpdateRow>,
    /// Stop-level rows.
    pub stop_time_updates: Vec<StopTimeUpdateRow>,
    /// Alert rows.
    pub service_alerts: Vec<ServiceAlertRow>,
}

impl SnapshotRows {
    /// Flattens the entities of `feed` relevant to `kind`.
    ///
    /// Entities without a trip id are skipped. Duplicate keys keep the last
    /// occurrence, in first-seen position.
    #[must_use]
    pub fn from_feed(
        kind: FeedKind,
        feed: &DecodedFeed,
        now: DateTime<Utc>,
        default_language: &str,
    ) -> Self {
        match kind {
            FeedKind::TripUpdates => {
                let mut trips = Vec::new();
                let mut stops = Vec::new();
                for update in feed.entities.iter().filter_map(|e| e.trip_update.as_ref()) {
                    let Some(trip_id) = update.trip.trip_id.as_deref().filter(|t| !t.is_empty())
                    else {
                        continue;
                    };
                    trips.push(trip_row(trip_id, update, now));
                    stops.extend(stop_rows(trip_id, update, now));
                }
                Self {
                    trip_updates: last_wins(trips, |r| r.trip_id.clone()),
                    stop_time_updates: last_wins(stops, |r| {
                        (r.trip_id.clone(), r.stop_id.clone(), r.stop_sequence)
                    }),
                    service_alerts: Vec::new(),
                }
            }
            FeedKind::ServiceAlerts => {
                let alerts = feed
                    .entities
                    .iter()
                    .filter(|e| !e.id.is_empty())
                    .filter_map(|e| {
                        e.alert
                            .as_ref()
                            .map(|a| alert_row(&e.id, a, now, default_language))
                    })
                    .collect();
                Self {
                    service_alerts: last_wins(alerts, |r| r.alert_id.clone()),
                    ..Self::default()
                }
            }
        }
    }

    /// Rows that will land in the kind's primary table.
    #[must_use]
    pub fn entity_count(&self, kind: FeedKind) -> usize {
        match kind {
            FeedKind::TripUpdates => self.trip_updates.len(),
            FeedKind::ServiceAlerts => self.service_alerts.len(),
        }
    }

    /// All rows across tables.
    #[must_use]
    pub fn total(&self) -> usize {
        self.trip_updates.len() + self.stop_time_updates.len() + self.service_alerts.len()
    }
}

fn trip_row(trip_id: &str, update: &TripUpdate, now: DateTime<Utc>) -> TripUpdateRow {
    TripUpdateRow {
        trip_id: trip_id.to_string(),
        route_id: update.trip.route_id.clone(),
        start_date: update.trip.start_date.clone(),
        start_time: update.trip.start_time.clone(),
        schedule_relationship: update.trip.schedule_relationship.clone(),
        vehicle_id: update.vehicle.as_ref().and_then(|v| v.id.clone()),
        delay_seconds: update.delay,
        measured_at: update
            .timestamp
            .and_then(|t| i64::try_from(t).ok())
            .and_then(|t| DateTime::from_timestamp(t, 0)),
        updated_at: now,
    }
}

fn stop_rows<'a>(
    trip_id: &'a str,
    update: &'a TripUpdate,
    now: DateTime<Utc>,
) -> impl Iterator<Item = StopTimeUpdateRow> + 'a {
    update
        .stop_time_updates
        .iter()
        .filter(|s| s.stop_id.is_some() || s.stop_sequence.is_some())
        .map(move |s| StopTimeUpdateRow {
            trip_id: trip_id.to_string(),
            stop_id: s.stop_id.clone().unwrap_or_default(),
            stop_sequence: s
                .stop_sequence
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(UNKNOWN_STOP_SEQUENCE),
            route_id: update.trip.route_id.clone(),
            start_date: update.trip.start_date.clone(),
            arrival_delay: s.arrival.and_then(|e| e.delay),
            arrival_time: s
                .arrival
                .and_then(|e| e.time)
                .and_then(|t| DateTime::from_timestamp(t, 0)),
            departure_delay: s.departure.and_then(|e| e.delay),
            departure_time: s
                .departure
                .and_then(|e| e.time)
                .and_then(|t| DateTime::from_timestamp(t, 0)),
            schedule_relationship: s.schedule_relationship.clone(),
            updated_at: now,
        })
}

fn alert_row(id: &str, alert: &Alert, now: DateTime<Utc>, default_language: &str) -> ServiceAlertRow {
    let texts = |t: Option<&TranslatedText>| {
        let list = t.map(|t| t.normalize(default_language)).unwrap_or_default();
        serde_json::to_value(list).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    };

    let informed_entities = alert
        .informed_entities
        .iter()
        .map(|e| {
            serde_json::json!({
                "agency_id": e.agency_id,
                "route_id": e.route_id,
                "route_type": e.route_type,
                "trip_id": e.trip.as_ref().and_then(|t| t.trip_id.clone()),
                "stop_id": e.stop_id,
            })
        })
        .collect();
    let active_periods = alert
        .active_periods
        .iter()
        .map(|p| serde_json::json!({ "start": p.start, "end": p.end }))
        .collect();

    ServiceAlertRow {
        alert_id: id.to_string(),
        cause: alert.cause.clone(),
        effect: alert.effect.clone(),
        informed_entities: serde_json::Value::Array(informed_entities),
        active_periods: serde_json::Value::Array(active_periods),
        header_translations: texts(alert.header_text.as_ref()),
        description_translations: texts(alert.description_text.as_ref()),
        url_translations: texts(alert.url.as_ref()),
        updated_at: now,
    }
}

/// Collapses duplicate keys, keeping the last row in the first row's slot.
fn last_wins<T, K, F>(rows: Vec<T>, key: F) -> Vec<T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut slots: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<T> = Vec::with_capacity(rows.len());
    for row in rows {
        let k = key(&row);
        match slots.get(&k).copied() {
            Some(i) => {
                if let Some(slot) = out.get_mut(i) {
                    *slot = row;
                }
            }
            None => {
                slots.insert(k, out.len());
                out.push(row);
            }
        }
    }
    out
}
