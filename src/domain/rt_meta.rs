//! Realtime and alerts freshness metadata.
//!
//! The stationboard builder reports what it knows about the realtime and
//! alert snapshots it merged as *partial* values ([`RtMetaInput`],
//! [`AlertsMetaInput`]); any field may be missing. [`RtMeta::from_input`] and
//! [`AlertsMeta::from_input`] turn those into fully populated values with
//! documented defaults, so serialized responses never carry holes.
//!
//! Invariant enforced by both constructors: `applied == true` implies
//! `available == true` and `reason == "applied"`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reason reported when realtime data was merged.
pub const REASON_APPLIED: &str = "applied";
/// Default reason when no snapshot was available.
pub const REASON_MISSING: &str = "missing";
/// Default reason when a snapshot existed but was not merged.
pub const REASON_NOT_APPLIED: &str = "not_applied";
/// Reason used when the client disabled alerts.
pub const REASON_DISABLED: &str = "disabled";

/// Identity of the process instance that produced a response.
///
/// Each instance owns its own response cache; exposing the identity lets
/// clients and operators tell which instance answered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    /// Stable id for the lifetime of the process.
    pub id: String,
    /// Scheduler allocation id, when deployed under one.
    pub alloc_id: Option<String>,
    /// Host name.
    pub host: Option<String>,
    /// OS process id.
    pub pid: u32,
    /// Build identifier.
    pub build: String,
}

/// Partial realtime metadata as reported by the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtMetaInput {
    /// Whether a realtime snapshot exists.
    pub available: Option<bool>,
    /// Whether it was merged into the departures.
    pub applied: Option<bool>,
    /// Machine-readable reason.
    pub reason: Option<String>,
    /// Feed the snapshot came from.
    pub feed_key: Option<String>,
    /// Fetch timestamp of the snapshot.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Snapshot age at build time.
    pub cache_age_ms: Option<i64>,
    /// Maximum age at which realtime is still merged.
    pub freshness_threshold_ms: Option<i64>,
}

/// Defaults used to complete a partial [`RtMetaInput`].
#[derive(Debug, Clone)]
pub struct RtDefaults {
    /// Feed key echoed when the builder names none.
    pub feed_key: String,
    /// Freshness threshold echoed when the builder names none.
    pub freshness_threshold_ms: i64,
}

/// Fully populated realtime metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RtMeta {
    /// Whether a realtime snapshot exists.
    pub available: bool,
    /// Whether it was merged into the departures.
    pub applied: bool,
    /// Machine-readable reason (`applied`, `missing`, `stale`, ...).
    pub reason: String,
    /// Feed the snapshot came from.
    pub feed_key: String,
    /// Fetch timestamp of the snapshot, millisecond precision.
    #[serde(default, with = "millis_rfc3339")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub fetched_at: Option<DateTime<Utc>>,
    /// Snapshot age at build time.
    pub cache_age_ms: Option<i64>,
    /// Maximum age at which realtime is still merged.
    pub freshness_threshold_ms: i64,
    /// Instance that produced the response.
    pub instance: InstanceInfo,
}

impl RtMeta {
    /// Completes a partial value.
    ///
    /// Missing `cache_age_ms` is derived from `fetched_at` and `now`.
    #[must_use]
    pub fn from_input(
        input: Option<RtMetaInput>,
        defaults: &RtDefaults,
        instance: &InstanceInfo,
        now: DateTime<Utc>,
    ) -> Self {
        let input = input.unwrap_or_default();
        let fetched_at = input.fetched_at;
        let applied = input.applied.unwrap_or(false);
        let available = applied || input.available.unwrap_or(fetched_at.is_some());
        let cache_age_ms = input.cache_age_ms.or_else(|| {
            fetched_at.map(|t| now.signed_duration_since(t).num_milliseconds().max(0))
        });

        Self {
            available,
            applied,
            reason: resolve_reason(applied, available, input.reason),
            feed_key: input
                .feed_key
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| defaults.feed_key.clone()),
            fetched_at,
            cache_age_ms,
            freshness_threshold_ms: input
                .freshness_threshold_ms
                .unwrap_or(defaults.freshness_threshold_ms),
            instance: instance.clone(),
        }
    }
}

/// Partial alerts metadata as reported by the builder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsMetaInput {
    /// Whether an alerts snapshot exists.
    pub available: Option<bool>,
    /// Whether alerts were attached to the departures.
    pub applied: Option<bool>,
    /// Machine-readable reason.
    pub reason: Option<String>,
    /// Fetch timestamp of the alerts snapshot.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Snapshot age in seconds.
    pub age_seconds: Option<i64>,
}

/// Fully populated alerts metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertsMeta {
    /// Whether an alerts snapshot exists.
    pub available: bool,
    /// Whether alerts were attached to the departures.
    pub applied: bool,
    /// Machine-readable reason.
    pub reason: String,
    /// Fetch timestamp of the alerts snapshot.
    #[serde(default, with = "millis_rfc3339")]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub fetched_at: Option<DateTime<Utc>>,
    /// Snapshot age in seconds.
    pub age_seconds: Option<i64>,
}

impl AlertsMeta {
    /// Completes a partial value; see [`RtMeta::from_input`].
    #[must_use]
    pub fn from_input(input: Option<AlertsMetaInput>, now: DateTime<Utc>) -> Self {
        let input = input.unwrap_or_default();
        let fetched_at = input.fetched_at;
        let applied = input.applied.unwrap_or(false);
        let available = applied || input.available.unwrap_or(fetched_at.is_some());
        let age_seconds = input
            .age_seconds
            .or_else(|| fetched_at.map(|t| now.signed_duration_since(t).num_seconds().max(0)));

        Self {
            available,
            applied,
            reason: resolve_reason(applied, available, input.reason),
            fetched_at,
            age_seconds,
        }
    }
}

fn resolve_reason(applied: bool, available: bool, reason: Option<String>) -> String {
    if applied {
        return REASON_APPLIED.to_string();
    }
    match reason {
        Some(r) if !r.is_empty() && r != REASON_APPLIED => r,
        _ if available => REASON_NOT_APPLIED.to_string(),
        _ => REASON_MISSING.to_string(),
    }
}

/// Serializes timestamps as RFC 3339 with millisecond precision, the
/// representation clients echo back in `since_rt`.
pub mod millis_rfc3339 {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializer half.
    ///
    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => serializer.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializer half.
    ///
    /// # Errors
    ///
    /// Fails on non-RFC 3339 strings.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<DateTime<Utc>>::deserialize(deserializer)
    }
}
