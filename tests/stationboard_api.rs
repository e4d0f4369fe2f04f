//! HTTP-level tests of `GET /api/stationboard` against in-memory
//! collaborators.

#![allow(clippy::panic)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use chrono::{TimeZone, Utc};
use tokio::sync::Mutex;
use tower::ServiceExt;

use stationboard_gateway::api;
use stationboard_gateway::app_state::AppState;
use stationboard_gateway::config::StationboardSettings;
use stationboard_gateway::domain::collaborators::{
    BuildError, ResolveError, StationboardBuilder, StopResolver,
};
use stationboard_gateway::domain::rt_meta::{InstanceInfo, RtMetaInput};
use stationboard_gateway::domain::stationboard::{BoardPayload, BuildRequest, StationInput};
use stationboard_gateway::domain::stop_identity::ResolvedStopIdentity;
use stationboard_gateway::service::StationboardService;

/// `rt.fetchedAt` reported by [`FakeBuilder`]: 2023-11-14T22:13:20Z.
const FETCHED_AT_SECS: i64 = 1_700_000_000;
const FETCHED_AT: &str = "2023-11-14T22:13:20.000Z";

#[derive(Debug)]
struct FakeResolver {
    roots: HashMap<&'static str, &'static str>,
}

impl FakeResolver {
    fn new() -> Self {
        Self {
            roots: HashMap::from([
                ("8501120:0:3", "8501120"),
                ("8501120", "8501120"),
                ("8501200", "8501200"),
            ]),
        }
    }
}

#[async_trait]
impl StopResolver for FakeResolver {
    async fn resolve(&self, input: &str) -> Result<ResolvedStopIdentity, ResolveError> {
        self.roots
            .get(input)
            .map(|root| ResolvedStopIdentity {
                resolved_stop_id: input.to_string(),
                resolved_root_id: (*root).to_string(),
            })
            .ok_or_else(|| ResolveError::UnknownStop(input.to_string()))
    }
}

/// Answers after `delay_ms`; the station name tells which call produced a
/// board (`Renens` for the first, `Morges` afterwards).
#[derive(Debug, Default)]
struct FakeBuilder {
    calls: AtomicUsize,
    delay_ms: AtomicU64,
    requested: Mutex<Vec<String>>,
}

impl FakeBuilder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StationboardBuilder for FakeBuilder {
    async fn build(&self, request: BuildRequest) -> Result<BoardPayload, BuildError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requested.lock().await.push(request.stop_id.clone());
        tokio::time::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst))).await;

        if request.stop_id == "missing" {
            return Err(BuildError::StopNotFound {
                stop_id: request.stop_id,
                tried: vec!["missing".to_string(), "Parentmissing".to_string()],
                details: serde_json::json!({ "reason": "unknown_stop" }),
            });
        }

        if request.stop_id == "bogus" {
            return Err(BuildError::UnknownStop {
                stop_id: request.stop_id,
                tried: vec!["bogus".to_string(), "Parentbogus".to_string()],
            });
        }

        let (line, name) = if call == 0 { ("R1", "Renens") } else { ("R2", "Morges") };
        Ok(BoardPayload {
            station: Some(StationInput {
                id: Some(request.stop_id),
                name: Some(name.to_string()),
            }),
            departures: Some(vec![serde_json::json!({ "line": line })]),
            rt: Some(RtMetaInput {
                applied: Some(true),
                fetched_at: Utc.timestamp_opt(FETCHED_AT_SECS, 0).single(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }
}

fn app(builder: &Arc<FakeBuilder>, timeout: Duration) -> Router {
    let settings = StationboardSettings {
        timeout,
        ..Default::default()
    };
    let instance = InstanceInfo {
        id: "inst-test".to_string(),
        alloc_id: None,
        host: None,
        pid: 1,
        build: "test".to_string(),
    };
    let service = StationboardService::new(
        Arc::new(FakeResolver::new()),
        Arc::clone(builder) as Arc<dyn StationboardBuilder>,
        settings,
        instance,
    );
    api::build_router().with_state(AppState {
        stationboard: Arc::new(service),
    })
}

async fn get(app: &Router, query: &str) -> Response<Body> {
    let Ok(request) = Request::builder()
        .uri(format!("/api/stationboard?{query}"))
        .body(Body::empty())
    else {
        panic!("invalid request");
    };
    let Ok(response) = app.clone().oneshot(request).await else {
        panic!("router failed");
    };
    response
}

async fn json(response: Response<Body>) -> serde_json::Value {
    let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body read failed");
    };
    let Ok(value) = serde_json::from_slice(&bytes) else {
        panic!("body is not JSON");
    };
    value
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

#[tokio::test]
async fn same_root_builds_once_with_stop_id() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=8501120:0:3&stationId=8501120").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(builder.calls(), 1);
    assert_eq!(*builder.requested.lock().await, vec!["8501120:0:3".to_string()]);

    let body = json(response).await;
    assert_eq!(body["station"]["name"], "Renens");
    assert_eq!(body["departures"][0]["line"], "R1");
    assert_eq!(body["rt"]["applied"], true);
    assert_eq!(body["rt"]["instance"]["id"], "inst-test");
    assert!(body["alerts"].is_object());
}

#[tokio::test]
async fn different_roots_are_rejected_without_building() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=8501120:0:3&stationId=8501200").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(builder.calls(), 0);

    let body = json(response).await;
    assert_eq!(body["error"], "conflicting_stop_id");
}

#[tokio::test]
async fn unresolved_side_does_not_block() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=8501120:0:3&stationId=nowhere").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*builder.requested.lock().await, vec!["8501120:0:3".to_string()]);
}

#[tokio::test]
async fn missing_stop_id_is_bad_request() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "lang=fr").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&response, "cache-control"), Some("public, max-age=5"));
    assert_eq!(json(response).await["error"], "missing_stop_id");
    assert_eq!(builder.calls(), 0);
}

#[tokio::test]
async fn station_id_alone_is_used_as_stop() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "station_id=8501120").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(*builder.requested.lock().await, vec!["8501120".to_string()]);
}

#[tokio::test]
async fn since_rt_equal_to_fetched_at_is_not_modified() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, &format!("stop_id=8501120&since_rt={FETCHED_AT}")).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(header(&response, "x-md-rt-applied"), Some("1"));
    let Ok(bytes) = axum::body::to_bytes(response.into_body(), usize::MAX).await else {
        panic!("body read failed");
    };
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn since_rt_older_returns_board() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=8501120&since_rt=2023-11-14T22:13:19.000Z").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["rt"]["fetchedAt"], FETCHED_AT);
}

#[tokio::test]
async fn invalid_since_rt_wins_over_missing_stop() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "since_rt=yesterday").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json(response).await["error"], "invalid_since_rt");
    assert_eq!(builder.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn timeout_serves_stale_cached_board() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_millis(100));

    let first = get(&app, "stop_id=8501120").await;
    assert_eq!(first.status(), StatusCode::OK);
    assert!(header(&first, "x-md-stale").is_none());

    builder.delay_ms.store(10_000, Ordering::SeqCst);
    let second = get(&app, "stop_id=8501120").await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(header(&second, "x-md-stale"), Some("1"));
    assert_eq!(header(&second, "x-md-stale-reason"), Some("stationboard_timeout"));
    assert_eq!(
        header(&second, "cache-control"),
        Some("public, max-age=0, stale-while-revalidate=15")
    );

    let body = json(second).await;
    assert_eq!(body["station"]["name"], "Renens");
    assert_eq!(body["departures"][0]["line"], "R1");
}

#[tokio::test(start_paused = true)]
async fn timeout_without_cache_is_gateway_timeout() {
    let builder = Arc::new(FakeBuilder::default());
    builder.delay_ms.store(10_000, Ordering::SeqCst);
    let app = app(&builder, Duration::from_millis(100));

    let response = get(&app, "stop_id=8501120").await;
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(header(&response, "cache-control"), Some("no-store"));
    assert_eq!(header(&response, "x-md-rt-reason"), Some("missing"));
    assert_eq!(header(&response, "x-md-rt-age-ms"), Some("-1"));
    assert_eq!(json(response).await["error"], "stationboard_timeout");
}

#[tokio::test]
async fn unknown_stop_is_not_found_with_tried() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json(response).await;
    assert_eq!(body["error"], "stop_not_found");
    assert_eq!(body["tried"], serde_json::json!(["missing", "Parentmissing"]));
    assert!(body.get("details").is_none());

    let response = get(&app, "stop_id=missing&debug=1").await;
    assert_eq!(json(response).await["details"]["reason"], "unknown_stop");
}

#[tokio::test]
async fn unresolvable_stop_is_bad_request_with_tried() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=bogus").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(header(&response, "cache-control"), Some("public, max-age=5"));
    let body = json(response).await;
    assert_eq!(body["error"], "unknown_stop");
    assert_eq!(body["stop_id"], "bogus");
    assert_eq!(body["tried"], serde_json::json!(["bogus", "Parentbogus"]));
}

#[tokio::test]
async fn repeated_stop_id_uses_first_value() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(&app, "stop_id=8501120&stop_id=8501200").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-md-request-id").is_some());
    assert_eq!(
        header(&response, "cache-control"),
        Some("public, max-age=10, stale-while-revalidate=20")
    );
    assert_eq!(*builder.requested.lock().await, vec!["8501120".to_string()]);
}

#[tokio::test]
async fn repeated_since_rt_is_still_validated() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let response = get(
        &app,
        &format!("stop_id=8501120&since_rt=yesterday&since_rt={FETCHED_AT}"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(header(&response, "x-md-request-id").is_some());
    assert_eq!(json(response).await["error"], "invalid_since_rt");
    assert_eq!(builder.calls(), 0);
}

#[tokio::test]
async fn diagnostic_headers_are_present() {
    let builder = Arc::new(FakeBuilder::default());
    let app = app(&builder, Duration::from_secs(5));

    let Ok(request) = Request::builder()
        .uri("/api/stationboard?stop_id=8501120&lang=de&limit=5")
        .header("x-request-id", "req-42")
        .body(Body::empty())
    else {
        panic!("invalid request");
    };
    let Ok(response) = app.clone().oneshot(request).await else {
        panic!("router failed");
    };

    assert_eq!(header(&response, "x-md-request-id"), Some("req-42"));
    assert_eq!(header(&response, "x-md-instance"), Some("inst-test"));
    assert_eq!(header(&response, "x-md-rt-applied"), Some("1"));
    assert_eq!(header(&response, "x-md-rt-reason"), Some("applied"));
    assert!(header(&response, "x-md-backend-total-ms").is_some());
    assert!(header(&response, "x-md-rt-age-ms").is_some_and(|v| v != "-1"));
    assert!(header(&response, "x-md-cache-key").is_some_and(|k| k.starts_with("sb1|")));
    assert_eq!(
        header(&response, "cache-control"),
        Some("public, max-age=10, stale-while-revalidate=20")
    );
    assert_eq!(
        header(&response, "cdn-cache-control"),
        Some("public, max-age=10, stale-while-revalidate=30")
    );
    assert_eq!(header(&response, "vary"), Some("Origin, Accept-Encoding"));
}
