//! Query parameters of `GET /api/stationboard`.

use serde::Deserialize;
use utoipa::IntoParams;

use crate::domain::stationboard::{IncludeAlerts, Lang};
use crate::service::StationboardRequest;

/// Upper bound for `limit`.
pub const MAX_LIMIT: u32 = 500;
/// Upper bound for `window_minutes`.
pub const MAX_WINDOW_MINUTES: u32 = 1_440;

/// Raw query string. Every value is taken as text so malformed numbers are
/// ignored instead of rejecting the request.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StationboardQuery {
    /// Stop to show; wins over `stationId`.
    pub stop_id: Option<String>,
    /// Station to show when `stop_id` is absent.
    #[serde(rename = "stationId")]
    pub station_id_camel: Option<String>,
    /// Alias of `stationId`.
    pub station_id: Option<String>,
    /// Display name of the station.
    #[serde(rename = "stationName")]
    pub station_name: Option<String>,
    /// `fr`, `de`, `it` or `en`; anything else is ignored.
    pub lang: Option<String>,
    /// Maximum departures, 1 to 500.
    pub limit: Option<String>,
    /// Look-ahead window in minutes, 1 to 1440.
    pub window_minutes: Option<String>,
    /// `1` or `0`; omitted means the server decides.
    pub include_alerts: Option<String>,
    /// Alias of `include_alerts`.
    #[serde(rename = "includeAlerts")]
    pub include_alerts_camel: Option<String>,
    /// Fetch timestamp of the realtime snapshot the client already has.
    pub since_rt: Option<String>,
    /// `1` attaches diagnostics.
    pub debug: Option<String>,
    /// Realtime debugging switch.
    pub debug_rt: Option<String>,
}

impl From<StationboardQuery> for StationboardRequest {
    fn from(query: StationboardQuery) -> Self {
        Self {
            stop_id: non_empty(query.stop_id),
            station_id: non_empty(query.station_id_camel).or_else(|| non_empty(query.station_id)),
            station_name: non_empty(query.station_name),
            lang: query.lang.as_deref().and_then(Lang::parse),
            limit: clamped(query.limit.as_deref(), MAX_LIMIT),
            window_minutes: clamped(query.window_minutes.as_deref(), MAX_WINDOW_MINUTES),
            include_alerts: IncludeAlerts::parse(
                non_empty(query.include_alerts)
                    .or_else(|| non_empty(query.include_alerts_camel))
                    .as_deref(),
            ),
            since_rt: query.since_rt,
            debug: matches!(
                query.debug.as_deref().map(str::trim),
                Some("1" | "true" | "yes")
            ),
            debug_rt: non_empty(query.debug_rt),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl StationboardQuery {
    /// Collects raw `key=value` pairs. The first occurrence of a key wins,
    /// so repeated parameters never reject the request; unknown keys are
    /// ignored.
    #[must_use]
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut query = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "stop_id" => &mut query.stop_id,
                "stationId" => &mut query.station_id_camel,
                "station_id" => &mut query.station_id,
                "stationName" => &mut query.station_name,
                "lang" => &mut query.lang,
                "limit" => &mut query.limit,
                "window_minutes" => &mut query.window_minutes,
                "include_alerts" => &mut query.include_alerts,
                "includeAlerts" => &mut query.include_alerts_camel,
                "since_rt" => &mut query.since_rt,
                "debug" => &mut query.debug,
                "debug_rt" => &mut query.debug_rt,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        query
    }
}

fn clamped(raw: Option<&str>, max: u32) -> Option<u32> {
    let n: i64 = raw?.trim().parse().ok()?;
    u32::try_from(n.clamp(1, i64::from(max))).ok()
}
