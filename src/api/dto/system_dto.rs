//! Response bodies of the system endpoints.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::rt_meta::InstanceInfo;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always `healthy` when the process answers.
    pub status: String,
    /// Server time, RFC 3339.
    pub timestamp: String,
    /// Crate version.
    pub version: String,
    /// Serving instance id.
    pub instance: String,
}

/// Serving instance and its response cache occupancy.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceResponse {
    /// Process identity.
    pub instance: InstanceInfo,
    /// Response cache occupancy.
    pub cache: CacheStatsDto,
}

/// Response cache occupancy.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsDto {
    /// Stored entries.
    pub entries: usize,
    /// Capacity before insertion-order eviction.
    pub capacity: usize,
    /// Builds currently running.
    pub in_flight: usize,
}
