//! Canonical stop identity and conflict detection.
//!
//! A stop id may name a platform (child stop) or a station (parent). Two ids
//! denote the same physical stop when they share a canonical root.

use serde::{Deserialize, Serialize};

/// Result of resolving a client-supplied stop id. Derived per request,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedStopIdentity {
    /// The stop the input resolved to.
    pub resolved_stop_id: String,
    /// Canonical parent-level id of that stop.
    pub resolved_root_id: String,
}

impl ResolvedStopIdentity {
    /// Identity of a stop that is its own root.
    #[must_use]
    pub fn root(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            resolved_stop_id: id.clone(),
            resolved_root_id: id,
        }
    }
}

/// `{stop, root}` pair echoed in conflict diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPair {
    /// Resolved stop.
    pub stop: String,
    /// Canonical root.
    pub root: String,
}

impl From<&ResolvedStopIdentity> for ResolvedPair {
    fn from(identity: &ResolvedStopIdentity) -> Self {
        Self {
            stop: identity.resolved_stop_id.clone(),
            root: identity.resolved_root_id.clone(),
        }
    }
}

/// Both identifiers as received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedIds {
    /// `stop_id` query value.
    pub stop_id: String,
    /// `stationId` query value.
    #[serde(rename = "stationId")]
    pub station_id: String,
}

/// Both identifiers as resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedIds {
    /// Resolution of `stop_id`.
    pub stop_id: ResolvedPair,
    /// Resolution of `stationId`.
    #[serde(rename = "stationId")]
    pub station_id: ResolvedPair,
}

/// Diagnostic payload of a `conflicting_stop_id` rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityConflict {
    /// Which parameter takes precedence when both agree.
    pub precedence: &'static str,
    /// Values as received.
    pub received: ReceivedIds,
    /// Values as resolved.
    pub resolved: ResolvedIds,
}

/// Compares the resolutions of `stop_id` and `stationId`.
///
/// A side that failed to resolve is `None` and never produces a conflict;
/// only two resolved identities with different roots do.
#[must_use]
pub fn detect_conflict(
    stop_id: &str,
    station_id: &str,
    stop_resolved: Option<&ResolvedStopIdentity>,
    station_resolved: Option<&ResolvedStopIdentity>,
) -> Option<IdentityConflict> {
    let (stop, station) = (stop_resolved?, station_resolved?);
    if stop.resolved_root_id == station.resolved_root_id {
        return None;
    }
    Some(IdentityConflict {
        precedence: "stop_id",
        received: ReceivedIds {
            stop_id: stop_id.to_string(),
            station_id: station_id.to_string(),
        },
        resolved: ResolvedIds {
            stop_id: stop.into(),
            station_id: station.into(),
        },
    })
}
