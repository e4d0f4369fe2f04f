//! Stationboard service: the orchestration behind `GET /api/stationboard`.
//!
//! One call to [`StationboardService::handle`] walks a request through
//! `since_rt` validation, stop id selection, the identity-conflict check,
//! the timeout-guarded build (shared between identical concurrent
//! requests), stale-cache degradation, normalisation, the cache write and
//! freshness negotiation.
//!
//! The builder runs on its own task. Losing the timeout race only stops
//! this request from waiting; the task keeps running to completion and its
//! result is dropped unless another waiter picks it up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

use crate::config::StationboardSettings;
use crate::domain::cache_key::{CacheKey, CacheKeyParts};
use crate::domain::collaborators::{BuildError, StationboardBuilder, StopResolver};
use crate::domain::response_cache::ResponseCache;
use crate::domain::rt_meta::InstanceInfo;
use crate::domain::stationboard::{
    BoardPayload, BuildRequest, IncludeAlerts, Lang, NormalizeContext, StationboardResponse,
};
use crate::domain::stop_identity::{ResolvedStopIdentity, detect_conflict};
use crate::error::ApiError;

type BuildOutcome = Result<BoardPayload, BuildError>;
type SharedBuild = Shared<BoxFuture<'static, BuildOutcome>>;
type InFlight = Arc<Mutex<HashMap<String, SharedBuild>>>;

/// Normalised stationboard query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StationboardRequest {
    /// `stop_id`; wins over `station_id`.
    pub stop_id: Option<String>,
    /// `stationId` / `station_id`.
    pub station_id: Option<String>,
    /// `stationName`.
    pub station_name: Option<String>,
    /// Supported language, if any.
    pub lang: Option<Lang>,
    /// Clamped departure limit.
    pub limit: Option<u32>,
    /// Clamped look-ahead window.
    pub window_minutes: Option<u32>,
    /// Alerts mode.
    pub include_alerts: IncludeAlerts,
    /// Raw `since_rt`.
    pub since_rt: Option<String>,
    /// `debug=1`.
    pub debug: bool,
    /// Raw `debug_rt`.
    pub debug_rt: Option<String>,
}

impl StationboardRequest {
    /// Cache key of this request.
    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(CacheKeyParts {
            stop_id: self.stop_id.as_deref(),
            station_id: self.station_id.as_deref(),
            station_name: self.station_name.as_deref(),
            lang: self.lang,
            limit: self.limit,
            window_minutes: self.window_minutes,
            include_alerts: self.include_alerts,
        })
    }

    fn cacheable(&self) -> bool {
        !self.debug && self.debug_rt.is_none()
    }
}

/// Successful outcome of a stationboard request.
#[derive(Debug, Clone)]
pub enum BoardOutcome {
    /// Freshly built response.
    Fresh(Arc<StationboardResponse>),
    /// Cached response served because the builder timed out.
    Stale {
        /// Cached response, verbatim.
        response: Arc<StationboardResponse>,
        /// Time since it was cached.
        age: Duration,
    },
    /// Realtime snapshot unchanged since `since_rt`; no body is sent.
    NotModified(Arc<StationboardResponse>),
}

impl BoardOutcome {
    /// Response the outcome was derived from.
    #[must_use]
    pub fn response(&self) -> &StationboardResponse {
        match self {
            Self::Fresh(r) | Self::NotModified(r) | Self::Stale { response: r, .. } => r,
        }
    }
}

/// Result of [`StationboardService::handle`]; the cache key is reported
/// even for failed requests.
#[derive(Debug)]
pub struct StationboardReply {
    /// Cache key of the request.
    pub cache_key: CacheKey,
    /// Response or error.
    pub outcome: Result<BoardOutcome, ApiError>,
}

/// Cache occupancy, reported by `GET /api/instance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Stored entries.
    pub entries: usize,
    /// Capacity.
    pub capacity: usize,
    /// Builds currently running.
    pub in_flight: usize,
}

/// Route handler orchestration, shared by all request tasks.
pub struct StationboardService {
    resolver: Arc<dyn StopResolver>,
    builder: Arc<dyn StationboardBuilder>,
    cache: ResponseCache,
    in_flight: InFlight,
    settings: StationboardSettings,
    instance: InstanceInfo,
}

impl fmt::Debug for StationboardService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StationboardService")
            .field("resolver", &self.resolver)
            .field("builder", &self.builder)
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

impl StationboardService {
    /// Creates a new `StationboardService` with an empty cache.
    #[must_use]
    pub fn new(
        resolver: Arc<dyn StopResolver>,
        builder: Arc<dyn StationboardBuilder>,
        settings: StationboardSettings,
        instance: InstanceInfo,
    ) -> Self {
        Self {
            resolver,
            builder,
            cache: ResponseCache::new(settings.cache_capacity, settings.stale_max_age),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            settings,
            instance,
        }
    }

    /// Identity of this process.
    #[must_use]
    pub fn instance(&self) -> &InstanceInfo {
        &self.instance
    }

    /// Current cache occupancy.
    pub async fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.len().await,
            capacity: self.cache.capacity(),
            in_flight: self.in_flight.lock().await.len(),
        }
    }

    /// Answers one stationboard request.
    pub async fn handle(&self, request: StationboardRequest) -> StationboardReply {
        let cache_key = request.cache_key();
        let outcome = self.run(&request, &cache_key).await;
        StationboardReply { cache_key, outcome }
    }

    async fn run(
        &self,
        request: &StationboardRequest,
        cache_key: &CacheKey,
    ) -> Result<BoardOutcome, ApiError> {
        let since_rt = request
            .since_rt
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .map(|raw| parse_since_rt(raw).ok_or_else(|| ApiError::InvalidSinceRt(raw.to_string())))
            .transpose()?;

        let stop_id = request
            .stop_id
            .clone()
            .or_else(|| request.station_id.clone())
            .ok_or(ApiError::MissingStopId)?;

        if let (Some(stop), Some(station)) = (&request.stop_id, &request.station_id) {
            self.check_conflict(stop, station).await?;
        }

        let build_request = BuildRequest {
            stop_id,
            station_id: request.station_id.clone(),
            station_name: request.station_name.clone(),
            lang: request.lang,
            limit: request.limit,
            window_minutes: request.window_minutes,
            include_alerts: request.include_alerts,
            debug: request.debug,
            debug_rt: request.debug_rt.clone(),
        };

        let build = self.start_build(cache_key, &build_request).await;
        let payload = match tokio::time::timeout(self.settings.timeout, build).await {
            Ok(Ok(payload)) => payload,
            Ok(Err(err)) => return Err(self.map_build_error(err, request.debug)),
            Err(_) => return self.degrade(cache_key).await,
        };

        let response = Arc::new(StationboardResponse::normalize(
            payload,
            NormalizeContext {
                request: &build_request,
                rt_defaults: &self.settings.rt_defaults,
                instance: &self.instance,
                now: Utc::now(),
            },
        ));

        if request.cacheable() {
            self.cache
                .insert(cache_key.clone(), Arc::clone(&response))
                .await;
        }

        let unchanged = match (since_rt, response.rt.fetched_at) {
            (Some(since), Some(fetched)) => since.timestamp_millis() == fetched.timestamp_millis(),
            _ => false,
        };
        if unchanged {
            return Ok(BoardOutcome::NotModified(response));
        }
        Ok(BoardOutcome::Fresh(response))
    }

    /// Rejects `stop_id`/`stationId` pairs that resolve to different roots.
    /// A side that fails to resolve is treated as unresolved.
    async fn check_conflict(&self, stop_id: &str, station_id: &str) -> Result<(), ApiError> {
        let (stop, station) = tokio::join!(
            self.resolve_quietly(stop_id),
            self.resolve_quietly(station_id)
        );
        match detect_conflict(stop_id, station_id, stop.as_ref(), station.as_ref()) {
            Some(conflict) => {
                tracing::info!(
                    stop_id,
                    station_id,
                    stop_root = %conflict.resolved.stop_id.root,
                    station_root = %conflict.resolved.station_id.root,
                    "conflicting stop identifiers"
                );
                Err(ApiError::ConflictingStopId(Box::new(conflict)))
            }
            None => Ok(()),
        }
    }

    async fn resolve_quietly(&self, input: &str) -> Option<ResolvedStopIdentity> {
        match self.resolver.resolve(input).await {
            Ok(identity) => Some(identity),
            Err(err) => {
                tracing::debug!(input, error = %err, "stop id left unresolved");
                None
            }
        }
    }

    /// Returns the shared build for this request, spawning it unless an
    /// identical one is already running.
    async fn start_build(&self, cache_key: &CacheKey, request: &BuildRequest) -> SharedBuild {
        let flight_key = format!(
            "{cache_key}|debug={}|debug_rt={}",
            u8::from(request.debug),
            urlencoding::encode(request.debug_rt.as_deref().unwrap_or_default())
        );

        let mut in_flight = self.in_flight.lock().await;
        if let Some(existing) = in_flight.get(&flight_key) {
            tracing::debug!(key = %flight_key, "joining in-flight stationboard build");
            return existing.clone();
        }

        let builder = Arc::clone(&self.builder);
        let registry = Arc::clone(&self.in_flight);
        let task_key = flight_key.clone();
        let task_request = request.clone();
        // The builder runs in its own task so a panic surfaces as a
        // `JoinError` here and the registry entry is still removed.
        let handle = tokio::spawn(async move {
            let outcome = tokio::spawn(async move { builder.build(task_request).await })
                .await
                .unwrap_or_else(|join_err| {
                    Err(BuildError::Internal(format!("builder task failed: {join_err}")))
                });
            registry.lock().await.remove(&task_key);
            outcome
        });

        let shared = async move {
            handle.await.unwrap_or_else(|join_err| {
                Err(BuildError::Internal(format!("builder task failed: {join_err}")))
            })
        }
        .boxed()
        .shared();

        in_flight.insert(flight_key, shared.clone());
        shared
    }

    /// Serves a cached response after a timeout, or fails with 504.
    async fn degrade(&self, cache_key: &CacheKey) -> Result<BoardOutcome, ApiError> {
        let timeout_ms = u64::try_from(self.settings.timeout.as_millis()).unwrap_or(u64::MAX);
        match self.cache.get(cache_key).await {
            Some(hit) => {
                tracing::info!(
                    key = %cache_key,
                    age_ms = u64::try_from(hit.age.as_millis()).unwrap_or(u64::MAX),
                    "stationboard timed out, serving stale response"
                );
                Ok(BoardOutcome::Stale {
                    response: hit.response,
                    age: hit.age,
                })
            }
            None => {
                tracing::warn!(key = %cache_key, timeout_ms, "stationboard timed out without usable cache");
                Err(ApiError::Timeout { timeout_ms })
            }
        }
    }

    fn map_build_error(&self, err: BuildError, debug: bool) -> ApiError {
        match err {
            BuildError::StopNotFound {
                stop_id,
                tried,
                details,
            } => ApiError::StopNotFound {
                stop_id,
                tried,
                details: debug.then_some(details),
            },
            BuildError::UnknownStop { stop_id, tried } => ApiError::UnknownStop { stop_id, tried },
            BuildError::Internal(detail) => {
                tracing::error!(error = %detail, "stationboard build failed");
                ApiError::Failed {
                    detail: self.settings.expose_internal_errors.then_some(detail),
                }
            }
        }
    }
}

/// Parses `since_rt`. Accepts RFC 3339, a naive ISO date-time (taken as
/// UTC) or a bare date (midnight UTC).
#[must_use]
pub fn parse_since_rt(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
