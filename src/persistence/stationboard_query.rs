//! PostgreSQL stationboard builder.
//!
//! Reads the static timetable for a station and its platforms, overlays the
//! persisted realtime snapshot, and attaches matching service alerts. The
//! service day follows GTFS: stop times count seconds from "noon minus 12h"
//! of the service date in the feed's timezone, so trips started yesterday
//! and still running after midnight are found through yesterday's date.

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::Deserialize;
use sqlx::PgPool;

use super::stop_lookup::{PgStopResolver, candidate_ids};
use crate::domain::collaborators::{BuildError, ResolveError, StationboardBuilder, StopResolver};
use crate::domain::feed::{FeedKind, LocalizedText};
use crate::domain::rt_meta::{AlertsMetaInput, REASON_DISABLED, RtMetaInput};
use crate::domain::stationboard::{
    BoardPayload, BuildRequest, IncludeAlerts, Lang, StationInput,
};

/// Departures returned when the request carries no `limit`.
pub const DEFAULT_LIMIT: u32 = 20;
/// Look-ahead window when the request carries no `window_minutes`.
pub const DEFAULT_WINDOW_MINUTES: u32 = 180;
/// Scheduled departures this far in the past are still read, so delayed
/// trains do not vanish from the board.
const DELAY_LOOKBACK_SECS: i32 = 900;

/// Reason reported when the realtime snapshot is older than the threshold.
pub const REASON_STALE: &str = "stale";
/// Reason reported when no departures fall inside the window.
pub const REASON_NO_DEPARTURES: &str = "no_departures_in_window";

const DEPARTURES_SQL: &str = "\
SELECT st.trip_id, st.stop_id, st.departure_secs, t.route_id, r.route_short_name, \
       t.trip_headsign, s.platform_code, \
       rt.departure_delay, rt.departure_time, rt.schedule_relationship AS stop_relationship, \
       tu.schedule_relationship AS trip_relationship, tu.delay_seconds AS trip_delay \
FROM stop_times st \
JOIN trips t ON t.trip_id = st.trip_id \
JOIN routes r ON r.route_id = t.route_id \
JOIN stops s ON s.stop_id = st.stop_id \
LEFT JOIN LATERAL ( \
    SELECT u.departure_delay, u.departure_time, u.schedule_relationship \
    FROM rt_stop_time_updates u \
    WHERE $6 AND u.trip_id = st.trip_id \
      AND (u.start_date IS NULL OR u.start_date = $5) \
      AND (u.stop_sequence = st.stop_sequence OR u.stop_id = st.stop_id) \
    ORDER BY (u.stop_sequence = st.stop_sequence) DESC \
    LIMIT 1 \
) rt ON TRUE \
LEFT JOIN rt_trip_updates tu \
    ON $6 AND tu.trip_id = st.trip_id AND (tu.start_date IS NULL OR tu.start_date = $5) \
WHERE st.stop_id = ANY($1) \
  AND t.service_id = ANY($2) \
  AND st.departure_secs BETWEEN $3 AND $4 \
ORDER BY st.departure_secs";

/// How `debug_rt` alters realtime merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtMode {
    /// Merge when the snapshot is fresh.
    Normal,
    /// Never merge.
    Disabled,
    /// Merge regardless of age.
    Force,
}

impl RtMode {
    /// Interprets the `debug_rt` switch. Unknown values mean [`RtMode::Normal`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("0" | "off" | "disable" | "disabled" | "static") => Self::Disabled,
            Some("force" | "ignore_freshness") => Self::Force,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DepartureRow {
    trip_id: String,
    stop_id: String,
    departure_secs: i32,
    route_id: String,
    route_short_name: Option<String>,
    trip_headsign: Option<String>,
    platform_code: Option<String>,
    departure_delay: Option<i32>,
    departure_time: Option<DateTime<Utc>>,
    stop_relationship: Option<String>,
    trip_relationship: Option<String>,
    trip_delay: Option<i32>,
}

/// A departure before serialization, ordered by its effective time.
#[derive(Debug, Clone, PartialEq)]
struct Departure {
    trip_id: String,
    route_id: String,
    line: String,
    destination: Option<String>,
    stop_id: String,
    platform: Option<String>,
    scheduled: DateTime<Utc>,
    realtime: Option<DateTime<Utc>>,
    cancelled: bool,
}

impl Departure {
    fn from_row(row: DepartureRow, service_day_base: DateTime<Utc>) -> Self {
        let scheduled = service_day_base + TimeDelta::seconds(i64::from(row.departure_secs));
        let realtime = row.departure_time.or_else(|| {
            row.departure_delay
                .or(row.trip_delay)
                .map(|d| scheduled + TimeDelta::seconds(i64::from(d)))
        });
        let cancelled = row
            .trip_relationship
            .as_deref()
            .is_some_and(|r| r.eq_ignore_ascii_case("CANCELED"))
            || row
                .stop_relationship
                .as_deref()
                .is_some_and(|r| r.eq_ignore_ascii_case("SKIPPED"));

        Self {
            line: row.route_short_name.unwrap_or_else(|| row.route_id.clone()),
            trip_id: row.trip_id,
            route_id: row.route_id,
            destination: row.trip_headsign,
            stop_id: row.stop_id,
            platform: row.platform_code,
            scheduled,
            realtime,
            cancelled,
        }
    }

    fn effective(&self) -> DateTime<Utc> {
        self.realtime.unwrap_or(self.scheduled)
    }

    fn to_json(&self, alerts: Vec<serde_json::Value>) -> serde_json::Value {
        let delay_min = self
            .realtime
            .map(|rt| rt.signed_duration_since(self.scheduled).num_minutes());
        let mut value = serde_json::json!({
            "tripId": self.trip_id,
            "routeId": self.route_id,
            "line": self.line,
            "destination": self.destination,
            "stopId": self.stop_id,
            "platform": self.platform,
            "scheduledDeparture": self.scheduled.to_rfc3339(),
            "realtimeDeparture": self.realtime.map(|t| t.to_rfc3339()),
            "delayMin": delay_min,
            "cancelled": self.cancelled,
        });
        if !alerts.is_empty() {
            if let Some(obj) = value.as_object_mut() {
                obj.insert("alerts".to_string(), serde_json::Value::Array(alerts));
            }
        }
        value
    }
}

#[derive(Debug, Default, Deserialize)]
struct InformedEntity {
    route_id: Option<String>,
    trip_id: Option<String>,
    stop_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ActivePeriod {
    start: Option<u64>,
    end: Option<u64>,
}

/// A stored alert, decoded from its JSON columns.
#[derive(Debug, Default)]
struct StoredAlert {
    id: String,
    effect: Option<String>,
    entities: Vec<InformedEntity>,
    periods: Vec<ActivePeriod>,
    header: Vec<LocalizedText>,
    description: Vec<LocalizedText>,
}

impl StoredAlert {
    fn is_active(&self, now: DateTime<Utc>) -> bool {
        let now = u64::try_from(now.timestamp()).unwrap_or(0);
        self.periods.is_empty()
            || self.periods.iter().any(|p| {
                p.start.is_none_or(|s| s <= now) && p.end.is_none_or(|e| e == 0 || now <= e)
            })
    }

    fn applies_to(&self, departure: &Departure, station_stops: &[String]) -> bool {
        self.entities.iter().any(|e| {
            e.trip_id.as_deref() == Some(departure.trip_id.as_str())
                || e.route_id.as_deref() == Some(departure.route_id.as_str())
                || e.stop_id
                    .as_ref()
                    .is_some_and(|s| *s == departure.stop_id || station_stops.contains(s))
        })
    }

    fn to_json(&self, lang: Option<Lang>) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "effect": self.effect,
            "header": pick_text(&self.header, lang),
            "description": pick_text(&self.description, lang),
        })
    }
}

/// Text in the requested language, else the first available one.
fn pick_text(texts: &[LocalizedText], lang: Option<Lang>) -> Option<String> {
    lang.and_then(|l| {
        texts
            .iter()
            .find(|t| Lang::parse(&t.language) == Some(l))
    })
    .or_else(|| texts.first())
    .map(|t| t.text.clone())
}

/// Start of the GTFS service day for `date`: local noon minus twelve hours.
#[must_use]
pub fn service_day_base(tz: &Tz, date: NaiveDate) -> Option<DateTime<Utc>> {
    let noon = date.and_hms_opt(12, 0, 0)?;
    let noon = tz.from_local_datetime(&noon).earliest()?;
    Some(noon.with_timezone(&Utc) - TimeDelta::hours(12))
}

fn weekday_column(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Realtime metadata for a trip-updates snapshot fetched at `fetched_at`.
fn rt_meta_input(
    fetched_at: Option<DateTime<Utc>>,
    mode: RtMode,
    freshness_threshold_ms: i64,
    now: DateTime<Utc>,
) -> RtMetaInput {
    let fresh = fetched_at
        .is_some_and(|t| now.signed_duration_since(t).num_milliseconds() <= freshness_threshold_ms);
    let applied = fetched_at.is_some()
        && match mode {
            RtMode::Normal => fresh,
            RtMode::Force => true,
            RtMode::Disabled => false,
        };
    let reason = match mode {
        RtMode::Disabled if fetched_at.is_some() => Some(REASON_DISABLED.to_string()),
        _ if fetched_at.is_some() && !applied => Some(REASON_STALE.to_string()),
        _ => None,
    };
    RtMetaInput {
        available: Some(fetched_at.is_some()),
        applied: Some(applied),
        reason,
        fetched_at,
        freshness_threshold_ms: Some(freshness_threshold_ms),
        ..Default::default()
    }
}

/// An id no candidate of which is in `stops` is the client's mistake
/// (`unknown_stop`, 400); lookup failures are internal.
fn resolve_failure(stop_id: &str, err: ResolveError) -> BuildError {
    match err {
        ResolveError::UnknownStop(_) => BuildError::UnknownStop {
            stop_id: stop_id.to_string(),
            tried: candidate_ids(stop_id),
        },
        ResolveError::Lookup(e) => BuildError::Internal(e),
    }
}

fn internal(e: sqlx::Error) -> BuildError {
    BuildError::Internal(e.to_string())
}

/// Builds stationboards from the static schedule and realtime snapshots.
#[derive(Debug, Clone)]
pub struct PgStationboardBuilder {
    pool: PgPool,
    resolver: PgStopResolver,
    tz: Tz,
    freshness_threshold_ms: i64,
}

impl PgStationboardBuilder {
    /// Creates a builder reading service days in `tz`.
    #[must_use]
    pub fn new(pool: PgPool, tz: Tz, freshness_threshold_ms: i64) -> Self {
        Self {
            resolver: PgStopResolver::new(pool.clone()),
            pool,
            tz,
            freshness_threshold_ms,
        }
    }

    async fn feed_fetched_at(&self, kind: FeedKind) -> Result<Option<DateTime<Utc>>, BuildError> {
        sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT fetched_at FROM rt_feed_state WHERE feed_kind = $1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)
    }

    async fn station_stops(&self, root: &str) -> Result<(Option<String>, Vec<String>), BuildError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT stop_id, stop_name FROM stops WHERE stop_id = $1 OR parent_station = $1",
        )
        .bind(root)
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        let name = rows
            .iter()
            .find(|(id, _)| id == root)
            .or_else(|| rows.first())
            .map(|(_, name)| name.clone());
        Ok((name, rows.into_iter().map(|(id, _)| id).collect()))
    }

    async fn active_services(&self, date: NaiveDate) -> Result<Vec<String>, BuildError> {
        let sql = format!(
            "SELECT service_id FROM calendar \
             WHERE {} AND start_date <= $1 AND end_date >= $1 \
             UNION SELECT service_id FROM calendar_dates WHERE date = $1 AND exception_type = 1 \
             EXCEPT SELECT service_id FROM calendar_dates WHERE date = $1 AND exception_type = 2",
            weekday_column(date.weekday())
        );
        sqlx::query_scalar::<_, String>(&sql)
            .bind(date)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
    }

    async fn departures_for_day(
        &self,
        date: NaiveDate,
        stops: &[String],
        now: DateTime<Utc>,
        window_minutes: u32,
        apply_rt: bool,
    ) -> Result<(usize, Vec<Departure>), BuildError> {
        let Some(base) = service_day_base(&self.tz, date) else {
            return Ok((0, Vec::new()));
        };
        let services = self.active_services(date).await?;
        if services.is_empty() {
            return Ok((0, Vec::new()));
        }

        let from = i32::try_from(now.signed_duration_since(base).num_seconds()).unwrap_or(i32::MAX);
        let window = i32::try_from(window_minutes).unwrap_or(i32::MAX).saturating_mul(60);
        let rows = sqlx::query_as::<_, DepartureRow>(DEPARTURES_SQL)
            .bind(stops)
            .bind(&services)
            .bind(from.saturating_sub(DELAY_LOOKBACK_SECS))
            .bind(from.saturating_add(window))
            .bind(date.format("%Y%m%d").to_string())
            .bind(apply_rt)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;

        Ok((
            services.len(),
            rows.into_iter().map(|r| Departure::from_row(r, base)).collect(),
        ))
    }

    async fn load_alerts(&self, now: DateTime<Utc>) -> Result<Vec<StoredAlert>, BuildError> {
        let rows = sqlx::query_as::<
            _,
            (String, Option<String>, serde_json::Value, serde_json::Value, serde_json::Value, serde_json::Value),
        >(
            "SELECT alert_id, effect, informed_entities, active_periods, \
             header_translations, description_translations FROM rt_service_alerts",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        Ok(rows
            .into_iter()
            .map(|(id, effect, entities, periods, header, description)| StoredAlert {
                id,
                effect,
                entities: serde_json::from_value(entities).unwrap_or_default(),
                periods: serde_json::from_value(periods).unwrap_or_default(),
                header: serde_json::from_value(header).unwrap_or_default(),
                description: serde_json::from_value(description).unwrap_or_default(),
            })
            .filter(|a| a.is_active(now))
            .collect())
    }
}

#[async_trait]
impl StationboardBuilder for PgStationboardBuilder {
    async fn build(&self, request: BuildRequest) -> Result<BoardPayload, BuildError> {
        let now = Utc::now();
        let identity = self
            .resolver
            .resolve(&request.stop_id)
            .await
            .map_err(|e| resolve_failure(&request.stop_id, e))?;

        let root = identity.resolved_root_id;
        let (station_name, stops) = self.station_stops(&root).await?;
        if stops.is_empty() {
            return Err(BuildError::StopNotFound {
                stop_id: request.stop_id.clone(),
                tried: vec![root.clone()],
                details: serde_json::json!({ "reason": "root_without_stops", "rootId": root }),
            });
        }

        let rt_mode = RtMode::parse(request.debug_rt.as_deref());
        let rt = rt_meta_input(
            self.feed_fetched_at(FeedKind::TripUpdates).await?,
            rt_mode,
            self.freshness_threshold_ms,
            now,
        );
        let apply_rt = rt.applied.unwrap_or(false);

        let limit = usize::try_from(request.limit.unwrap_or(DEFAULT_LIMIT)).unwrap_or(usize::MAX);
        let window_minutes = request.window_minutes.unwrap_or(DEFAULT_WINDOW_MINUTES);
        let today = now.with_timezone(&self.tz).date_naive();
        let service_dates: Vec<NaiveDate> = today.pred_opt().into_iter().chain([today]).collect();

        let mut departures = Vec::new();
        let mut services_per_day = Vec::with_capacity(service_dates.len());
        for date in &service_dates {
            let (services, mut day) = self
                .departures_for_day(*date, &stops, now, window_minutes, apply_rt)
                .await?;
            services_per_day.push(serde_json::json!({ "date": date.to_string(), "services": services }));
            departures.append(&mut day);
        }
        departures.retain(|d| d.effective() >= now);
        departures.sort_by(|a, b| a.effective().cmp(&b.effective()).then(a.scheduled.cmp(&b.scheduled)));
        departures.truncate(limit);

        let alerts_fetched_at = self.feed_fetched_at(FeedKind::ServiceAlerts).await?;
        let (alerts, alerts_meta) = if request.include_alerts == IncludeAlerts::Off {
            (Vec::new(), None)
        } else {
            let alerts = if alerts_fetched_at.is_some() {
                self.load_alerts(now).await?
            } else {
                Vec::new()
            };
            let meta = AlertsMetaInput {
                available: Some(alerts_fetched_at.is_some()),
                applied: Some(alerts_fetched_at.is_some()),
                fetched_at: alerts_fetched_at,
                ..Default::default()
            };
            (alerts, Some(meta))
        };

        let departures_json: Vec<serde_json::Value> = departures
            .iter()
            .map(|d| {
                let attached = alerts
                    .iter()
                    .filter(|a| a.applies_to(d, &stops))
                    .map(|a| a.to_json(request.lang))
                    .collect();
                d.to_json(attached)
            })
            .collect();

        let no_service = departures_json.is_empty().then(|| {
            serde_json::json!({
                "reason": REASON_NO_DEPARTURES,
                "windowMinutes": window_minutes,
                "from": now.to_rfc3339(),
                "serviceDays": services_per_day,
            })
        });

        let debug = request.debug.then(|| {
            serde_json::json!({
                "rootStopId": root,
                "resolvedStopId": identity.resolved_stop_id,
                "childStops": stops,
                "serviceDays": services_per_day,
                "rtMode": format!("{rt_mode:?}"),
                "alertsLoaded": alerts.len(),
            })
        });

        Ok(BoardPayload {
            station: Some(StationInput {
                id: Some(root),
                name: station_name.or(request.station_name),
            }),
            departures: Some(departures_json),
            rt: Some(rt),
            alerts: alerts_meta,
            no_service,
            debug,
        })
    }
}
