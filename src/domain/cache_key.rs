//! Deterministic response-cache key.
//!
//! The key depends only on the semantic request parameters, never on the
//! order they appeared in the query string. Values are percent-encoded so
//! the key is always a valid header value (it is echoed in `x-md-cache-key`).

use std::fmt;

use super::stationboard::{IncludeAlerts, Lang};

const KEY_VERSION: &str = "sb1";

/// Parameters that identify a cacheable stationboard response.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheKeyParts<'a> {
    /// `stop_id` as received.
    pub stop_id: Option<&'a str>,
    /// `stationId` as received.
    pub station_id: Option<&'a str>,
    /// `stationName` as received.
    pub station_name: Option<&'a str>,
    /// Normalised language.
    pub lang: Option<Lang>,
    /// Normalised limit.
    pub limit: Option<u32>,
    /// Normalised window.
    pub window_minutes: Option<u32>,
    /// Alerts mode.
    pub include_alerts: IncludeAlerts,
}

/// Response-cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds the key from its parts.
    #[must_use]
    pub fn new(parts: CacheKeyParts<'_>) -> Self {
        let text = |v: Option<&str>| {
            v.map(str::trim)
                .map(|s| urlencoding::encode(s).into_owned())
                .unwrap_or_default()
        };
        let number = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();

        Self(format!(
            "{KEY_VERSION}|stop={}|station={}|name={}|lang={}|limit={}|window={}|{}",
            text(parts.stop_id),
            text(parts.station_id),
            text(parts.station_name),
            parts.lang.map(Lang::as_str).unwrap_or_default(),
            number(parts.limit),
            number(parts.window_minutes),
            parts.include_alerts.cache_token(),
        ))
    }

    /// Key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
