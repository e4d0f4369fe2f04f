//! Stationboard request and response value types.
//!
//! The builder returns a loosely shaped [`BoardPayload`]; the route handler
//! turns it into a [`StationboardResponse`] with [`StationboardResponse::normalize`]
//! before caching or serving it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::rt_meta::{
    AlertsMeta, AlertsMetaInput, InstanceInfo, REASON_DISABLED, RtDefaults, RtMeta, RtMetaInput,
};

/// Board languages understood by the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    /// French.
    Fr,
    /// German.
    De,
    /// Italian.
    It,
    /// English.
    En,
}

impl Lang {
    /// Parses a language tag, keeping only the primary subtag
    /// (`"de-CH"` → `De`). Unsupported languages yield `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let primary = raw.trim().split(['-', '_']).next()?.to_ascii_lowercase();
        match primary.as_str() {
            "fr" => Some(Self::Fr),
            "de" => Some(Self::De),
            "it" => Some(Self::It),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    /// Two-letter code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fr => "fr",
            Self::De => "de",
            Self::It => "it",
            Self::En => "en",
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client preference for service alerts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncludeAlerts {
    /// Builder decides.
    #[default]
    Auto,
    /// Alerts requested.
    On,
    /// Alerts suppressed.
    Off,
}

impl IncludeAlerts {
    /// Parses `include_alerts`; anything other than a recognised boolean
    /// spelling means [`IncludeAlerts::Auto`].
    #[must_use]
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("1" | "true" | "yes" | "on") => Self::On,
            Some("0" | "false" | "no" | "off") => Self::Off,
            _ => Self::Auto,
        }
    }

    /// Token used in the response cache key.
    #[must_use]
    pub const fn cache_token(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "alerts1",
            Self::Off => "alerts0",
        }
    }
}

/// Input handed to the stationboard builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Stop to build the board for (`stop_id` wins over `stationId`).
    pub stop_id: String,
    /// `stationId` as received, for diagnostics.
    pub station_id: Option<String>,
    /// Display name supplied by the client.
    pub station_name: Option<String>,
    /// Board language.
    pub lang: Option<Lang>,
    /// Maximum number of departures.
    pub limit: Option<u32>,
    /// Look-ahead window.
    pub window_minutes: Option<u32>,
    /// Alerts preference.
    pub include_alerts: IncludeAlerts,
    /// Attach builder diagnostics to the payload.
    pub debug: bool,
    /// Realtime debugging switch forwarded to the builder.
    pub debug_rt: Option<String>,
}

/// Station reference as reported by the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationInput {
    /// Canonical station id.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
}

/// Raw builder output. Every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardPayload {
    /// Station the board belongs to.
    pub station: Option<StationInput>,
    /// Departures in display order.
    pub departures: Option<Vec<serde_json::Value>>,
    /// Realtime metadata.
    pub rt: Option<RtMetaInput>,
    /// Alerts metadata.
    pub alerts: Option<AlertsMetaInput>,
    /// Structured explanation of an empty board.
    pub no_service: Option<serde_json::Value>,
    /// Builder diagnostics.
    pub debug: Option<serde_json::Value>,
}

/// Station block of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Station {
    /// Canonical station id.
    pub id: String,
    /// Display name.
    pub name: String,
}

/// Canonical stationboard response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StationboardResponse {
    /// Station the board belongs to.
    pub station: Station,
    /// Departures in display order; never null.
    #[schema(value_type = Vec<Object>)]
    pub departures: Vec<serde_json::Value>,
    /// Realtime metadata.
    pub rt: RtMeta,
    /// Alerts metadata.
    pub alerts: AlertsMeta,
    /// Structured explanation of an empty board, passed through verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub no_service: Option<serde_json::Value>,
    /// Builder diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub debug: Option<serde_json::Value>,
}

/// Context needed to complete a [`BoardPayload`].
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Request the payload was built for.
    pub request: &'a BuildRequest,
    /// Realtime defaults.
    pub rt_defaults: &'a RtDefaults,
    /// Serving instance.
    pub instance: &'a InstanceInfo,
    /// Normalisation time.
    pub now: DateTime<Utc>,
}

impl StationboardResponse {
    /// Coerces a builder payload into the canonical response shape.
    #[must_use]
    pub fn normalize(payload: BoardPayload, ctx: NormalizeContext<'_>) -> Self {
        let station = payload.station.unwrap_or_default();
        let station = Station {
            id: station
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| ctx.request.stop_id.clone()),
            name: station
                .name
                .or_else(|| ctx.request.station_name.clone())
                .unwrap_or_default(),
        };

        let departures = payload
            .departures
            .unwrap_or_default()
            .into_iter()
            .filter(|d| !d.is_null())
            .collect();

        let alerts_input = payload.alerts.or_else(|| {
            (ctx.request.include_alerts == IncludeAlerts::Off).then(|| AlertsMetaInput {
                reason: Some(REASON_DISABLED.to_string()),
                ..Default::default()
            })
        });

        Self {
            station,
            departures,
            rt: RtMeta::from_input(payload.rt, ctx.rt_defaults, ctx.instance, ctx.now),
            alerts: AlertsMeta::from_input(alerts_input, ctx.now),
            no_service: payload.no_service.filter(|v| !v.is_null()),
            debug: payload.debug.filter(|v| !v.is_null()),
        }
    }
}
