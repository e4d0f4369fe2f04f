//! Stationboard handler: `GET /api/stationboard`.
//!
//! The handler itself only translates between HTTP and
//! [`crate::service::StationboardService`]; all decisions happen there.
//! Every response, errors included, carries the `x-md-*` diagnostic headers
//! and the caching headers.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::header::{CACHE_CONTROL, VARY};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tokio::time::Instant;

use crate::api::dto::StationboardQuery;
use crate::app_state::AppState;
use crate::domain::cache_key::{CacheKey, CacheKeyParts};
use crate::domain::rt_meta::REASON_MISSING;
use crate::domain::stationboard::StationboardResponse;
use crate::error::{ApiError, ErrorResponse};
use crate::service::{BoardOutcome, StationboardReply};

const X_MD_REQUEST_ID: HeaderName = HeaderName::from_static("x-md-request-id");
const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
const X_MD_INSTANCE: HeaderName = HeaderName::from_static("x-md-instance");
const X_MD_CACHE_KEY: HeaderName = HeaderName::from_static("x-md-cache-key");
const X_MD_RT_APPLIED: HeaderName = HeaderName::from_static("x-md-rt-applied");
const X_MD_RT_REASON: HeaderName = HeaderName::from_static("x-md-rt-reason");
const X_MD_RT_AGE_MS: HeaderName = HeaderName::from_static("x-md-rt-age-ms");
const X_MD_BACKEND_TOTAL_MS: HeaderName = HeaderName::from_static("x-md-backend-total-ms");
const X_MD_STALE: HeaderName = HeaderName::from_static("x-md-stale");
const X_MD_STALE_REASON: HeaderName = HeaderName::from_static("x-md-stale-reason");
const CDN_CACHE_CONTROL: HeaderName = HeaderName::from_static("cdn-cache-control");

const CACHE_OK: &str = "public, max-age=10, stale-while-revalidate=20";
const CDN_CACHE_OK: &str = "public, max-age=10, stale-while-revalidate=30";
const CACHE_STALE: &str = "public, max-age=0, stale-while-revalidate=15";
const CACHE_CLIENT_ERROR: &str = "public, max-age=5";
const CACHE_NONE: &str = "no-store";
const VARY_VALUE: &str = "Origin, Accept-Encoding";

const STALE_REASON_TIMEOUT: &str = "stationboard_timeout";
const MAX_REQUEST_ID_LEN: usize = 128;

/// `GET /api/stationboard` — Departures for one stop.
#[utoipa::path(
    get,
    path = "/api/stationboard",
    tag = "Stationboard",
    summary = "Departure board for a stop",
    description = "Merges the static timetable with the latest realtime snapshot. \
        `stop_id` wins over `stationId`; both must resolve to the same stop when both are given. \
        With `since_rt` equal to the current `rt.fetchedAt` the server answers 204.",
    params(StationboardQuery),
    responses(
        (status = 200, description = "Departure board", body = StationboardResponse),
        (status = 204, description = "Realtime snapshot unchanged since `since_rt`"),
        (status = 400, description = "Undecodable query, missing, conflicting or invalid parameters, or unknown stop", body = ErrorResponse),
        (status = 404, description = "Stop not found", body = ErrorResponse),
        (status = 500, description = "Unexpected failure", body = ErrorResponse),
        (status = 504, description = "Build timed out and no cached board was usable", body = ErrorResponse),
    )
)]
pub async fn get_stationboard(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<Vec<(String, String)>>, QueryRejection>,
) -> Response {
    let started = Instant::now();
    let request_id = request_id(&headers);

    let reply = match query {
        Ok(Query(pairs)) => {
            let query = StationboardQuery::from_pairs(pairs);
            state.stationboard.handle(query.into()).await
        }
        Err(rejection) => StationboardReply {
            cache_key: CacheKey::new(CacheKeyParts::default()),
            outcome: Err(ApiError::InvalidQuery(rejection.body_text())),
        },
    };
    let StationboardReply { cache_key, outcome } = reply;

    let (mut response, board, cache_control, cdn_cache_control) = match outcome {
        Ok(BoardOutcome::Fresh(board)) => (
            Json(board.as_ref()).into_response(),
            Some(board),
            CACHE_OK,
            CDN_CACHE_OK,
        ),
        Ok(BoardOutcome::NotModified(board)) => (
            StatusCode::NO_CONTENT.into_response(),
            Some(board),
            CACHE_OK,
            CDN_CACHE_OK,
        ),
        Ok(BoardOutcome::Stale { response, .. }) => {
            let mut r = Json(response.as_ref()).into_response();
            set(r.headers_mut(), X_MD_STALE, "1");
            set(r.headers_mut(), X_MD_STALE_REASON, STALE_REASON_TIMEOUT);
            (r, Some(response), CACHE_STALE, CACHE_STALE)
        }
        Err(err) => {
            let control = if err.status_code().is_server_error() {
                CACHE_NONE
            } else {
                CACHE_CLIENT_ERROR
            };
            (err.into_response(), None, control, control)
        }
    };

    let rt = board.as_deref().map(|b: &StationboardResponse| &b.rt);
    let out = response.headers_mut();
    set(out, X_MD_REQUEST_ID, &request_id);
    set(out, X_MD_INSTANCE, &state.stationboard.instance().id);
    set(out, X_MD_CACHE_KEY, cache_key.as_str());
    set(
        out,
        X_MD_RT_APPLIED,
        if rt.is_some_and(|m| m.applied) { "1" } else { "0" },
    );
    set(
        out,
        X_MD_RT_REASON,
        rt.map_or(REASON_MISSING, |m| m.reason.as_str()),
    );
    set(
        out,
        X_MD_RT_AGE_MS,
        &rt.and_then(|m| m.cache_age_ms).unwrap_or(-1).to_string(),
    );
    set(
        out,
        X_MD_BACKEND_TOTAL_MS,
        &started.elapsed().as_millis().to_string(),
    );
    set(out, CACHE_CONTROL, cache_control);
    set(out, CDN_CACHE_CONTROL, cdn_cache_control);
    set(out, VARY, VARY_VALUE);

    response
}

/// Stationboard routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/api/stationboard", get(get_stationboard))
}

/// Inbound `x-md-request-id` or `x-request-id`, else a fresh UUID.
fn request_id(headers: &HeaderMap) -> String {
    [X_MD_REQUEST_ID, X_REQUEST_ID]
        .iter()
        .filter_map(|name| headers.get(name))
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .find(|id| !id.is_empty() && id.len() <= MAX_REQUEST_ID_LEN)
        .map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string)
}

/// Inserts a header, skipping values that are not valid header text.
fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "dropping invalid header value"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_request_id_is_reused() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(request_id(&headers), "abc-123");

        headers.insert(X_MD_REQUEST_ID, HeaderValue::from_static("md-1"));
        assert_eq!(request_id(&headers), "md-1");
    }

    #[test]
    fn missing_request_id_is_generated() {
        let id = request_id(&HeaderMap::new());
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }
}
