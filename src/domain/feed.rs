//! Decoded GTFS-Realtime feed model.
//!
//! [`DecodedFeed`] is what the snapshot persistor consumes. It mirrors the
//! GTFS-RT message tree closely enough to deserialize the JSON rendering of a
//! feed directly, and can be built from a protobuf
//! [`gtfs_realtime::FeedMessage`] via [`decode_feed`] or `From`.
//!
//! Alert texts are the one place where upstream producers disagree: some
//! send a `TranslatedString` (`{"translation": [...]}`), others a bare string.
//! [`TranslatedText`] accepts both and [`TranslatedText::normalize`] turns
//! either into a uniform list of [`LocalizedText`].

use std::fmt;

use chrono::{DateTime, Utc};
use prost::Message;
use serde::{Deserialize, Serialize};

/// Realtime feed kinds handled by the persistor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// GTFS-RT `TripUpdate` entities.
    TripUpdates,
    /// GTFS-RT `Alert` entities.
    ServiceAlerts,
}

impl FeedKind {
    /// Stable string form, used as the `rt_feed_state` key and in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TripUpdates => "trip_updates",
            Self::ServiceAlerts => "service_alerts",
        }
    }

    /// Well-known advisory lock key guarding writes of this feed kind.
    #[must_use]
    pub const fn default_write_lock_id(self) -> i64 {
        match self {
            Self::TripUpdates => 0x4D44_5254_5550,
            Self::ServiceAlerts => 0x4D44_5254_414C,
        }
    }

    /// Retention window applied when the caller does not pass one.
    #[must_use]
    pub const fn default_retention_hours(self) -> u32 {
        match self {
            Self::TripUpdates => 2,
            Self::ServiceAlerts => 6,
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A complete feed snapshot after decoding.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DecodedFeed {
    /// Feed header.
    #[serde(default)]
    pub header: FeedHeader,
    /// Entities in feed order.
    #[serde(default, rename = "entity")]
    pub entities: Vec<FeedEntity>,
}

/// Feed-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedHeader {
    /// Producer timestamp in POSIX seconds.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// One entity of the feed. Exactly one payload is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeedEntity {
    /// Entity id, unique within the message.
    pub id: String,
    /// Trip update payload.
    #[serde(default)]
    pub trip_update: Option<TripUpdate>,
    /// Service alert payload.
    #[serde(default)]
    pub alert: Option<Alert>,
}

/// Realtime progress of one trip.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TripUpdate {
    /// Trip this update applies to.
    #[serde(default)]
    pub trip: TripDescriptor,
    /// Vehicle serving the trip.
    #[serde(default)]
    pub vehicle: Option<VehicleDescriptor>,
    /// Per-stop predictions.
    #[serde(default, rename = "stop_time_update")]
    pub stop_time_updates: Vec<StopTimeUpdate>,
    /// Measurement time in POSIX seconds.
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Trip-level delay in seconds.
    #[serde(default)]
    pub delay: Option<i32>,
}

/// Identifies a trip instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripDescriptor {
    /// Static `trip_id`.
    #[serde(default)]
    pub trip_id: Option<String>,
    /// Static `route_id`.
    #[serde(default)]
    pub route_id: Option<String>,
    /// Service date, `YYYYMMDD`.
    #[serde(default)]
    pub start_date: Option<String>,
    /// Start time, `HH:MM:SS`.
    #[serde(default)]
    pub start_time: Option<String>,
    /// Schedule relationship name (`SCHEDULED`, `CANCELED`, ...).
    #[serde(default)]
    pub schedule_relationship: Option<String>,
}

/// Vehicle identification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct VehicleDescriptor {
    /// Internal vehicle id.
    #[serde(default)]
    pub id: Option<String>,
}

/// Prediction for one stop of a trip.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StopTimeUpdate {
    /// Static `stop_sequence`.
    #[serde(default)]
    pub stop_sequence: Option<u32>,
    /// Static `stop_id`.
    #[serde(default)]
    pub stop_id: Option<String>,
    /// Arrival prediction.
    #[serde(default)]
    pub arrival: Option<StopTimeEvent>,
    /// Departure prediction.
    #[serde(default)]
    pub departure: Option<StopTimeEvent>,
    /// Schedule relationship name (`SCHEDULED`, `SKIPPED`, ...).
    #[serde(default)]
    pub schedule_relationship: Option<String>,
}

/// Delay and/or absolute time of an arrival or departure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct StopTimeEvent {
    /// Delay in seconds.
    #[serde(default)]
    pub delay: Option<i32>,
    /// Predicted time in POSIX seconds.
    #[serde(default)]
    pub time: Option<i64>,
}

/// Service alert.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Alert {
    /// Periods during which the alert is shown.
    #[serde(default, rename = "active_period")]
    pub active_periods: Vec<TimeRange>,
    /// Stops, routes and trips the alert refers to.
    #[serde(default, rename = "informed_entity")]
    pub informed_entities: Vec<EntitySelector>,
    /// Cause name.
    #[serde(default)]
    pub cause: Option<String>,
    /// Effect name (`NO_SERVICE`, `DETOUR`, ...).
    #[serde(default)]
    pub effect: Option<String>,
    /// Link with more information.
    #[serde(default)]
    pub url: Option<TranslatedText>,
    /// Short summary.
    #[serde(default)]
    pub header_text: Option<TranslatedText>,
    /// Full text.
    #[serde(default)]
    pub description_text: Option<TranslatedText>,
}

/// Half-open interval in POSIX seconds; a missing bound is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    /// Start, inclusive.
    #[serde(default)]
    pub start: Option<u64>,
    /// End, exclusive.
    #[serde(default)]
    pub end: Option<u64>,
}

/// Reference from an alert to a GTFS entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EntitySelector {
    /// Agency.
    #[serde(default)]
    pub agency_id: Option<String>,
    /// Route.
    #[serde(default)]
    pub route_id: Option<String>,
    /// GTFS route type.
    #[serde(default)]
    pub route_type: Option<i32>,
    /// Trip.
    #[serde(default)]
    pub trip: Option<TripDescriptor>,
    /// Stop.
    #[serde(default)]
    pub stop_id: Option<String>,
}

/// A text in one language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    /// BCP-47 language tag.
    pub language: String,
    /// Text content.
    pub text: String,
}

/// Alert text as sent upstream: either a bare string or a translation list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TranslatedText {
    /// Single untranslated string.
    Plain(String),
    /// GTFS-RT `TranslatedString`.
    Translated {
        /// Translations in feed order.
        #[serde(default)]
        translation: Vec<Translation>,
    },
}

/// One entry of a `TranslatedString`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    /// Text content.
    pub text: String,
    /// Language tag, may be absent for the feed's default language.
    #[serde(default)]
    pub language: Option<String>,
}

impl TranslatedText {
    /// Flattens either representation into `{language, text}` pairs.
    ///
    /// Entries with blank text are dropped; entries without a language get
    /// `default_language`. Order and minority languages are preserved.
    #[must_use]
    pub fn normalize(&self, default_language: &str) -> Vec<LocalizedText> {
        match self {
            Self::Plain(text) if text.trim().is_empty() => Vec::new(),
            Self::Plain(text) => vec![LocalizedText {
                language: default_language.to_string(),
                text: text.clone(),
            }],
            Self::Translated { translation } => translation
                .iter()
                .filter(|t| !t.text.trim().is_empty())
                .map(|t| LocalizedText {
                    language: t
                        .language
                        .as_deref()
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .unwrap_or(default_language)
                        .to_string(),
                    text: t.text.clone(),
                })
                .collect(),
        }
    }
}

impl DecodedFeed {
    /// Producer timestamp of the feed header, if present and representable.
    #[must_use]
    pub fn header_timestamp(&self) -> Option<DateTime<Utc>> {
        self.header
            .timestamp
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }
}

/// Decodes protobuf bytes into a [`DecodedFeed`].
///
/// # Errors
///
/// Returns the [`prost::DecodeError`] if the bytes are not a valid
/// `FeedMessage`.
pub fn decode_feed(bytes: &[u8]) -> Result<DecodedFeed, prost::DecodeError> {
    let message = gtfs_realtime::FeedMessage::decode(bytes)?;
    Ok(DecodedFeed::from(&message))
}

// ── Protobuf conversion ─────────────────────────────────────────────────

impl From<&gtfs_realtime::FeedMessage> for DecodedFeed {
    fn from(message: &gtfs_realtime::FeedMessage) -> Self {
        Self {
            header: FeedHeader {
                timestamp: message.header.timestamp,
            },
            entities: message
                .entity
                .iter()
                .map(|entity| FeedEntity {
                    id: entity.id.clone(),
                    trip_update: entity.trip_update.as_ref().map(convert_trip_update),
                    alert: entity.alert.as_ref().map(convert_alert),
                })
                .collect(),
        }
    }
}

fn convert_trip_descriptor(trip: &gtfs_realtime::TripDescriptor) -> TripDescriptor {
    TripDescriptor {
        trip_id: trip.trip_id.clone(),
        route_id: trip.route_id.clone(),
        start_date: trip.start_date.clone(),
        start_time: trip.start_time.clone(),
        schedule_relationship: trip
            .schedule_relationship
            .and_then(trip_relationship_name)
            .map(str::to_string),
    }
}

fn convert_trip_update(update: &gtfs_realtime::TripUpdate) -> TripUpdate {
    TripUpdate {
        trip: convert_trip_descriptor(&update.trip),
        vehicle: update.vehicle.as_ref().map(|v| VehicleDescriptor { id: v.id.clone() }),
        stop_time_updates: update
            .stop_time_update
            .iter()
            .map(|stu| StopTimeUpdate {
                stop_sequence: stu.stop_sequence,
                stop_id: stu.stop_id.clone(),
                arrival: stu.arrival.as_ref().map(|e| StopTimeEvent {
                    delay: e.delay,
                    time: e.time,
                }),
                departure: stu.departure.as_ref().map(|e| StopTimeEvent {
                    delay: e.delay,
                    time: e.time,
                }),
                schedule_relationship: stu
                    .schedule_relationship
                    .and_then(stop_relationship_name)
                    .map(str::to_string),
            })
            .collect(),
        timestamp: update.timestamp,
        delay: update.delay,
    }
}

fn convert_translated(text: &gtfs_realtime::TranslatedString) -> TranslatedText {
    TranslatedText::Translated {
        translation: text
            .translation
            .iter()
            .map(|t| Translation {
                text: t.text.clone(),
                language: t.language.clone(),
            })
            .collect(),
    }
}

fn convert_alert(alert: &gtfs_realtime::Alert) -> Alert {
    Alert {
        active_periods: alert
            .active_period
            .iter()
            .map(|p| TimeRange {
                start: p.start,
                end: p.end,
            })
            .collect(),
        informed_entities: alert
            .informed_entity
            .iter()
            .map(|e| EntitySelector {
                agency_id: e.agency_id.clone(),
                route_id: e.route_id.clone(),
                route_type: e.route_type,
                trip: e.trip.as_ref().map(convert_trip_descriptor),
                stop_id: e.stop_id.clone(),
            })
            .collect(),
        cause: alert.cause.and_then(cause_name).map(str::to_string),
        effect: alert.effect.and_then(effect_name).map(str::to_string),
        url: alert.url.as_ref().map(convert_translated),
        header_text: alert.header_text.as_ref().map(convert_translated),
        description_text: alert.description_text.as_ref().map(convert_translated),
    }
}

fn trip_relationship_name(code: i32) -> Option<&'static str> {
    Some(match code {
        0 => "SCHEDULED",
        1 => "ADDED",
        2 => "UNSCHEDULED",
        3 => "CANCELED",
        5 => "REPLACEMENT",
        6 => "DUPLICATED",
        7 => "DELETED",
        8 => "NEW",
        _ => return None,
    })
}

fn stop_relationship_name(code: i32) -> Option<&'static str> {
    Some(match code {
        0 => "SCHEDULED",
        1 => "SKIPPED",
        2 => "NO_DATA",
        3 => "UNSCHEDULED",
        _ => return None,
    })
}

fn cause_name(code: i32) -> Option<&'static str> {
    Some(match code {
        1 => "UNKNOWN_CAUSE",
        2 => "OTHER_CAUSE",
        3 => "TECHNICAL_PROBLEM",
        4 => "STRIKE",
        5 => "DEMONSTRATION",
        6 => "ACCIDENT",
        7 => "HOLIDAY",
        8 => "WEATHER",
        9 => "MAINTENANCE",
        10 => "CONSTRUCTION",
        11 => "POLICE_ACTIVITY",
        12 => "MEDICAL_EMERGENCY",
        _ => return None,
    })
}

fn effect_name(code: i32) -> Option<&'static str> {
    Some(match code {
        1 => "NO_SERVICE",
        2 => "REDUCED_SERVICE",
        3 => "SIGNIFICANT_DELAYS",
        4 => "DETOUR",
        5 => "ADDITIONAL_SERVICE",
        6 => "MODIFIED_SERVICE",
        7 => "OTHER_EFFECT",
        8 => "UNKNOWN_EFFECT",
        9 => "STOP_MOVED",
        10 => "NO_EFFECT",
        11 => "ACCESSIBILITY_ISSUE",
        _ => return None,
    })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_normalizes_to_single_default_language_entry() {
        let text = TranslatedText::Plain("Plain text only".to_string());
        let normalized = text.normalize("de");
        assert_eq!(
            normalized,
            vec![LocalizedText {
                language: "de".to_string(),
                text: "Plain text only".to_string(),
            }]
        );
    }

    #[test]
    fn translations_keep_every_language() {
        let text = TranslatedText::Translated {
            translation: vec![
                Translation {
                    text: "Bauarbeiten".to_string(),
                    language: Some("de".to_string()),
                },
                Translation {
                    text: "Travaux".to_string(),
                    language: Some("fr".to_string()),
                },
                Translation {
                    text: "Lavori".to_string(),
                    language: None,
                },
            ],
        };
        let normalized = text.normalize("de");
        let langs: Vec<&str> = normalized.iter().map(|t| t.language.as_str()).collect();
        assert_eq!(langs, ["de", "fr", "de"]);
        assert_eq!(normalized.get(1).map(|t| t.text.as_str()), Some("Travaux"));
    }

    #[test]
    fn blank_entries_are_dropped() {
        let text = TranslatedText::Translated {
            translation: vec![Translation {
                text: "  ".to_string(),
                language: Some("en".to_string()),
            }],
        };
        assert!(text.normalize("de").is_empty());
        assert!(TranslatedText::Plain(String::new()).normalize("de").is_empty());
    }

    #[test]
    fn json_feed_accepts_both_text_shapes() {
        let json = serde_json::json!({
            "header": { "timestamp": 1_700_000_000u64 },
            "entity": [
                { "id": "a1", "alert": { "header_text": "Plain text only" } },
                { "id": "a2", "alert": { "header_text": { "translation": [
                    { "text": "Umleitung", "language": "de" },
                    { "text": "Déviation", "language": "fr" }
                ] } } }
            ]
        });
        let Ok(feed) = serde_json::from_value::<DecodedFeed>(json) else {
            panic!("feed should deserialize");
        };
        assert_eq!(feed.entities.len(), 2);
        let Some(first) = feed.entities.first().and_then(|e| e.alert.as_ref()) else {
            panic!("first alert missing");
        };
        assert!(matches!(first.header_text, Some(TranslatedText::Plain(_))));
        let Some(second) = feed.entities.get(1).and_then(|e| e.alert.as_ref()) else {
            panic!("second alert missing");
        };
        let Some(header) = &second.header_text else {
            panic!("second header missing");
        };
        assert_eq!(header.normalize("en").len(), 2);
        assert_eq!(
            feed.header_timestamp().map(|t| t.timestamp()),
            Some(1_700_000_000)
        );
    }

    #[test]
    fn protobuf_message_converts_enums_to_names() {
        let message = gtfs_realtime::FeedMessage {
            entity: vec![
                gtfs_realtime::FeedEntity {
                    id: "tu-1".to_string(),
                    trip_update: Some(gtfs_realtime::TripUpdate {
                        trip: gtfs_realtime::TripDescriptor {
                            trip_id: Some("trip-1".to_string()),
                            schedule_relationship: Some(3),
                            ..Default::default()
                        },
                        stop_time_update: vec![gtfs_realtime::trip_update::StopTimeUpdate {
                            stop_sequence: Some(4),
                            stop_id: Some("8501120:0:3".to_string()),
                            schedule_relationship: Some(1),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                gtfs_realtime::FeedEntity {
                    id: "al-1".to_string(),
                    alert: Some(gtfs_realtime::Alert {
                        effect: Some(4),
                        header_text: Some(gtfs_realtime::TranslatedString {
                            translation: vec![gtfs_realtime::translated_string::Translation {
                                text: "Detour".to_string(),
                                language: Some("en".to_string()),
                            }],
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let feed = DecodedFeed::from(&message);
        let Some(update) = feed.entities.first().and_then(|e| e.trip_update.as_ref()) else {
            panic!("trip update missing");
        };
        assert_eq!(update.trip.schedule_relationship.as_deref(), Some("CANCELED"));
        assert_eq!(
            update
                .stop_time_updates
                .first()
                .and_then(|s| s.schedule_relationship.as_deref()),
            Some("SKIPPED")
        );
        let Some(alert) = feed.entities.get(1).and_then(|e| e.alert.as_ref()) else {
            panic!("alert missing");
        };
        assert_eq!(alert.effect.as_deref(), Some("DETOUR"));
    }

    #[test]
    fn decode_rejects_garbage() {
        let bad: &[u8] = &[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
        assert!(decode_feed(bad).is_err());
    }

    #[test]
    fn feed_kind_lock_ids_differ() {
        assert_ne!(
            FeedKind::TripUpdates.default_write_lock_id(),
            FeedKind::ServiceAlerts.default_write_lock_id()
        );
        assert_eq!(FeedKind::ServiceAlerts.default_retention_hours(), 6);
        assert_eq!(FeedKind::TripUpdates.to_string(), "trip_updates");
    }
}
