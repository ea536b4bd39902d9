use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use eventgate::application::cache_access::CacheAccess;
use eventgate::application::ingest::IngestionCoordinator;
use eventgate::application::query::QueryService;
use eventgate::application::retry::RetryPolicy;
use eventgate::cache::{CacheConfig, DisabledCache, EventCache, MemoryCache};
use eventgate::domain::normalize::{EventNormalizer, NormalizerConfig};
use eventgate::infra::db::InMemoryEventsRepo;
use eventgate::infra::http::{
    self, AdminState, ApiRateLimiter, ApiState, HealthProbe, RouterState,
};
use eventgate_api_types::{
    BatchIngestResponse, CacheClearResponse, CacheStatsResponse, CircuitState, EventBody,
    EventListResponse, HealthResponse, HealthStatus, IngestResponse, IngestStatus,
};

struct TestApp {
    public: Router,
    admin: Router,
}

fn build_app(cache: Arc<dyn EventCache>, write_limit: u32) -> TestApp {
    build_app_with(cache, write_limit, NormalizerConfig::default())
}

fn build_app_with(
    cache: Arc<dyn EventCache>,
    write_limit: u32,
    normalizer: NormalizerConfig,
) -> TestApp {
    let repo = Arc::new(InMemoryEventsRepo::new());
    let access = CacheAccess::new(
        cache,
        Duration::from_millis(50),
        Duration::from_secs(300),
        Duration::from_secs(120),
    );
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
        operation_timeout: Duration::from_secs(1),
    };

    let ingest = Arc::new(IngestionCoordinator::new(
        EventNormalizer::new(normalizer),
        access.clone(),
        repo.clone(),
        retry,
        false,
    ));
    let query = QueryService::new(access.clone(), repo.clone(), retry);
    let health = HealthProbe::new(repo, access.clone());

    let public = http::build_router(RouterState {
        api: ApiState {
            ingest,
            query,
            rate_limiter: Arc::new(ApiRateLimiter::new(Duration::from_secs(60), write_limit)),
        },
        health: health.clone(),
    });
    let admin = http::build_admin_router(AdminState {
        health,
        cache: access,
    });

    TestApp { public, admin }
}

fn memory_app() -> TestApp {
    build_app(Arc::new(MemoryCache::new(&CacheConfig::default())), 1_000)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build")
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body should collect")
        .to_bytes()
        .to_vec();
    (status, headers, body)
}

fn decode<T: serde::de::DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).expect("response body should decode")
}

#[tokio::test]
async fn ingest_then_read_back() {
    let app = memory_app();
    let event = json!({ "source_id": "ch1", "external_id": 100, "payload": "hello" });

    let (status, _, body) = send(&app.public, post_json("/events", &event)).await;
    assert_eq!(status, StatusCode::CREATED);
    let accepted: IngestResponse = decode(&body);
    assert_eq!(accepted.status, IngestStatus::Accepted);
    assert_eq!(accepted.sequence, Some(100));
    let key = accepted.dedup_key.expect("accepted events carry a key");

    let (status, _, body) = send(&app.public, post_json("/events", &event)).await;
    assert_eq!(status, StatusCode::OK);
    let duplicate: IngestResponse = decode(&body);
    assert_eq!(duplicate.status, IngestStatus::Duplicate);
    assert_eq!(duplicate.dedup_key.as_deref(), Some(key.as_str()));

    let (status, _, body) = send(&app.public, get(&format!("/events/{key}"))).await;
    assert_eq!(status, StatusCode::OK);
    let stored: EventBody = decode(&body);
    assert_eq!(stored.source_id, "ch1");
    assert_eq!(stored.external_id, "100");
    assert_eq!(stored.payload, json!("hello"));

    let (status, _, body) = send(&app.public, get("/events?source_id=ch1")).await;
    assert_eq!(status, StatusCode::OK);
    let page: EventListResponse = decode(&body);
    assert_eq!(page.items.len(), 1);
    assert!(page.next_cursor.is_none());
}

#[tokio::test]
async fn invalid_events_are_rejected_with_reason() {
    let app = memory_app();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/events")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request should build");
    let (status, _, body) = send(&app.public, request).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let rejected: IngestResponse = decode(&body);
    assert_eq!(rejected.status, IngestStatus::Rejected);
    assert_eq!(rejected.reason.as_deref(), Some("malformed_event"));

    let (status, _, body) = send(
        &app.public,
        post_json("/events", &json!({ "source_id": "ch1", "payload": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let rejected: IngestResponse = decode(&body);
    assert_eq!(rejected.reason.as_deref(), Some("missing_external_id"));
}

#[tokio::test]
async fn read_errors_map_to_status_codes() {
    let app = memory_app();

    let (status, _, body) = send(&app.public, get("/events")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = decode(&body);
    assert_eq!(error["error"]["code"], "bad_request");

    let (status, _, body) = send(&app.public, get("/events/does-not-exist")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: Value = decode(&body);
    assert_eq!(error["error"]["code"], "not_found");

    let (status, _, body) = send(&app.public, get("/events?source_id=ch1&cursor=%21%21")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = decode(&body);
    assert_eq!(error["error"]["code"], "invalid_cursor");
}

#[tokio::test]
async fn batch_reports_each_event_in_order() {
    let app = memory_app();
    let batch = json!({
        "events": [
            { "source_id": "b", "external_id": "1" },
            { "source_id": "b", "external_id": "1" },
            { "external_id": "2" },
        ]
    });

    let (status, _, body) = send(&app.public, post_json("/events/batch", &batch)).await;
    assert_eq!(status, StatusCode::OK);
    let response: BatchIngestResponse = decode(&body);
    let statuses: Vec<IngestStatus> = response.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            IngestStatus::Accepted,
            IngestStatus::Duplicate,
            IngestStatus::Rejected
        ]
    );
    assert_eq!(response.results[2].reason.as_deref(), Some("missing_source_id"));

    let (status, _, _) = send(&app.public, post_json("/events/batch", &json!({ "nope": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_streams_ndjson() {
    let app = memory_app();
    for n in 1..=3 {
        let event = json!({ "source_id": "exp", "external_id": n });
        let (status, _, _) = send(&app.public, post_json("/events", &event)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, headers, body) = send(&app.public, get("/events/export?source_id=exp&after=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/x-ndjson")
    );

    let text = String::from_utf8(body).expect("utf-8 body");
    let sequences: Vec<i64> = text
        .lines()
        .map(|line| decode::<EventBody>(line.as_bytes()).sequence)
        .collect();
    assert_eq!(sequences, vec![2, 3]);
}

#[tokio::test]
async fn writes_are_rate_limited_per_client() {
    let app = build_app(Arc::new(MemoryCache::new(&CacheConfig::default())), 2);
    let limited = |external_id: u32| {
        let mut request = post_json(
            "/events",
            &json!({ "source_id": "rl", "external_id": external_id }),
        );
        request
            .headers_mut()
            .insert("x-client-id", "ingestor-1".parse().expect("header value"));
        request
    };

    for n in 0..2 {
        let (status, headers, _) = send(&app.public, limited(n)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert!(headers.contains_key("x-ratelimit-remaining"));
    }

    let (status, headers, body) = send(&app.public, limited(3)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        headers.get(header::RETRY_AFTER).and_then(|v| v.to_str().ok()),
        Some("60")
    );
    let error: Value = decode(&body);
    assert_eq!(error["error"]["code"], "rate_limited");

    // reads are never limited
    let (status, _, _) = send(&app.public, get("/events?source_id=rl")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_degraded_cache_without_failing() {
    let app = build_app(Arc::new(DisabledCache::new()), 1_000);

    for (router, uri) in [(&app.public, "/health"), (&app.admin, "/admin/health")] {
        let (status, _, body) = send(router, get(uri)).await;
        assert_eq!(status, StatusCode::OK);
        let health: HealthResponse = decode(&body);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.persistence.status, HealthStatus::Healthy);
        assert_eq!(health.cache.status, HealthStatus::Degraded);
        assert_eq!(health.cache_circuit.state, CircuitState::Closed);
    }

    // ingestion keeps working without a cache
    let event = json!({ "source_id": "d", "external_id": "1" });
    let (status, _, _) = send(&app.public, post_json("/events", &event)).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _, body) = send(&app.public, post_json("/events", &event)).await;
    assert_eq!(status, StatusCode::OK);
    let duplicate: IngestResponse = decode(&body);
    assert_eq!(duplicate.reason.as_deref(), Some("already_persisted"));
}

#[tokio::test]
async fn admin_cache_stats_and_clear() {
    let app = memory_app();
    let event = json!({ "source_id": "adm", "external_id": "1" });
    let (_, _, body) = send(&app.public, post_json("/events", &event)).await;
    let key = decode::<IngestResponse>(&body)
        .dedup_key
        .expect("accepted events carry a key");
    let (status, _, _) = send(&app.public, get(&format!("/events/{key}"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&app.admin, get("/admin/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    let stats: CacheStatsResponse = decode(&body);
    assert_eq!(stats.backend, "memory");
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, Some(1));
    assert_eq!(stats.claims_granted, 1);
    assert_eq!(stats.circuit.state, CircuitState::Closed);
    assert_eq!(stats.circuit.consecutive_failures, 0);

    let clear = Request::builder()
        .method(Method::POST)
        .uri("/admin/cache/clear")
        .body(Body::empty())
        .expect("request should build");
    let (status, _, body) = send(&app.admin, clear).await;
    assert_eq!(status, StatusCode::OK);
    let cleared: CacheClearResponse = decode(&body);
    // the record plus its claim
    assert_eq!(cleared.removed, 2);

    // admin routes are not exposed on the public listener
    let (status, _, _) = send(&app.public, get("/admin/cache/stats")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = memory_app();

    let (_, headers, _) = send(&app.public, get("/health")).await;
    let generated = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .expect("request id header");
    assert!(!generated.is_empty());

    let mut request = get("/health");
    request
        .headers_mut()
        .insert("x-request-id", "trace-42".parse().expect("header value"));
    let (_, headers, _) = send(&app.public, request).await;
    assert_eq!(
        headers.get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("trace-42")
    );
}

#[tokio::test]
async fn list_and_export_honour_an_upper_bound() {
    let app = memory_app();
    for n in 1..=6 {
        let event = json!({ "source_id": "win", "external_id": n });
        let (status, _, _) = send(&app.public, post_json("/events", &event)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _, body) = send(&app.public, get("/events?source_id=win&after=1&until=4")).await;
    assert_eq!(status, StatusCode::OK);
    let page: EventListResponse = decode(&body);
    let sequences: Vec<i64> = page.items.iter().map(|item| item.sequence).collect();
    assert_eq!(sequences, vec![2, 3, 4]);

    let (status, _, body) = send(&app.public, get("/events/export?source_id=win&until=2")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(body).expect("utf-8 body");
    let sequences: Vec<i64> = text
        .lines()
        .map(|line| decode::<EventBody>(line.as_bytes()).sequence)
        .collect();
    assert_eq!(sequences, vec![1, 2]);
}

#[tokio::test]
async fn body_size_follows_the_configured_payload_limit() {
    let app = build_app_with(
        Arc::new(MemoryCache::new(&CacheConfig::default())),
        1_000,
        NormalizerConfig {
            max_payload_bytes: 3 * 1024 * 1024,
            ..NormalizerConfig::default()
        },
    );

    // larger than axum's 2 MiB default, within the configured payload limit
    let large = json!({
        "source_id": "big",
        "external_id": "1",
        "payload": "x".repeat(2_500_000),
    });
    let (status, _, body) = send(&app.public, post_json("/events", &large)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(decode::<IngestResponse>(&body).status, IngestStatus::Accepted);

    // passes the transport limit, refused by the normalizer
    let over_payload = json!({
        "source_id": "big",
        "external_id": "2",
        "payload": "x".repeat(4 * 1024 * 1024),
    });
    let (status, _, body) = send(&app.public, post_json("/events", &over_payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        decode::<IngestResponse>(&body).reason.as_deref(),
        Some("payload_too_large")
    );

    // over the transport limit: same reason, never malformed_event
    let over_body = json!({
        "source_id": "big",
        "external_id": "3",
        "payload": "x".repeat(7 * 1024 * 1024),
    });
    let (status, _, body) = send(&app.public, post_json("/events", &over_body)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let rejected: IngestResponse = decode(&body);
    assert_eq!(rejected.status, IngestStatus::Rejected);
    assert_eq!(rejected.reason.as_deref(), Some("payload_too_large"));
}

#[tokio::test]
async fn oversized_body_with_default_limits_is_payload_too_large() {
    let app = memory_app();
    let event = json!({
        "source_id": "big",
        "external_id": "1",
        "payload": "x".repeat(3 * 1024 * 1024),
    });

    let (status, _, body) = send(&app.public, post_json("/events", &event)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        decode::<IngestResponse>(&body).reason.as_deref(),
        Some("payload_too_large")
    );
}

#[tokio::test]
async fn admin_endpoints_report_an_open_cache_circuit() {
    let app = build_app(Arc::new(DisabledCache::new()), 1_000);

    // each ingestion makes two failing cache calls; five in a row open the circuit
    for n in 1..=3 {
        let event = json!({ "source_id": "cb", "external_id": n });
        let (status, _, _) = send(&app.public, post_json("/events", &event)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, _, body) = send(&app.admin, get("/admin/cache/stats")).await;
    assert_eq!(status, StatusCode::OK);
    let stats: CacheStatsResponse = decode(&body);
    assert_eq!(stats.circuit.state, CircuitState::Open);
    assert_eq!(stats.circuit.times_opened, 1);
    assert!(stats.circuit.rejected >= 1);

    let (status, _, body) = send(&app.admin, get("/admin/health")).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = decode(&body);
    assert_eq!(health.status, HealthStatus::Degraded);
    assert_eq!(health.cache.status, HealthStatus::Degraded);
    assert_eq!(health.cache_circuit.state, CircuitState::Open);
}
