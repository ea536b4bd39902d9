use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use serde_json::json;

use eventgate::application::cache_access::CacheAccess;
use eventgate::application::ingest::IngestionCoordinator;
use eventgate::application::query::QueryService;
use eventgate::application::repos::RepoError;
use eventgate::application::retry::RetryPolicy;
use eventgate::cache::{CacheConfig, DisabledCache, EventCache, MemoryCache};
use eventgate::domain::events::{DedupKey, IngestionResult};
use eventgate::domain::normalize::EventNormalizer;
use eventgate::infra::db::InMemoryEventsRepo;

fn quick_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
        operation_timeout: Duration::from_secs(1),
    }
}

fn access(cache: Arc<dyn EventCache>) -> CacheAccess {
    CacheAccess::new(
        cache,
        Duration::from_millis(50),
        Duration::from_secs(60),
        Duration::from_secs(60),
    )
}

#[tokio::test]
async fn gateway_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // single-slot cache: the second accepted event evicts the first
    let tiny: Arc<dyn EventCache> = Arc::new(MemoryCache::new(&CacheConfig {
        max_entries: 1,
        ..Default::default()
    }));
    let repo = Arc::new(InMemoryEventsRepo::new());
    let coordinator = IngestionCoordinator::new(
        EventNormalizer::default(),
        access(tiny.clone()),
        repo.clone(),
        quick_retry(),
        false,
    );
    let query = QueryService::new(access(tiny), repo, quick_retry());

    let mut keys = Vec::new();
    for external_id in ["1", "2"] {
        let result = coordinator
            .ingest_value(json!({ "source_id": "m", "external_id": external_id }))
            .await
            .expect("in-memory persistence");
        match result {
            IngestionResult::Accepted(record) => keys.push(record.dedup_key),
            other => panic!("expected accepted, got {other:?}"),
        }
    }

    // hit on the survivor, miss on the evicted record and on an unknown key
    query.get_event(&keys[1]).await.expect("cached");
    query.get_event(&keys[0]).await.expect("from persistence");
    assert!(query.get_event(&DedupKey::new("missing")).await.is_err());

    // degraded cache
    let disabled = access(Arc::new(DisabledCache::new()));
    assert!(disabled.get(&keys[0]).await.is_err());

    // one transient failure, then success
    let attempts = AtomicU32::new(0);
    let value = quick_retry()
        .run("metrics_retry", || async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(RepoError::Timeout)
            } else {
                Ok(1)
            }
        })
        .await
        .expect("second attempt succeeds");
    assert_eq!(value, 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "eventgate_ingest_total",
        "eventgate_ingest_ms",
        "eventgate_cache_hit_total",
        "eventgate_cache_miss_total",
        "eventgate_cache_evict_total",
        "eventgate_cache_unavailable_total",
        "eventgate_persistence_retry_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
