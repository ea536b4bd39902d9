use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Registers help text for every metric the gateway emits. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "eventgate_ingest_total",
            Unit::Count,
            "Ingestion calls by outcome (accepted, duplicate, rejected, failed)."
        );
        describe_histogram!(
            "eventgate_ingest_ms",
            Unit::Milliseconds,
            "End-to-end ingestion latency in milliseconds."
        );
        describe_counter!(
            "eventgate_cache_hit_total",
            Unit::Count,
            "Total number of cache lookups that found a live record."
        );
        describe_counter!(
            "eventgate_cache_miss_total",
            Unit::Count,
            "Total number of cache lookups that found nothing."
        );
        describe_counter!(
            "eventgate_cache_evict_total",
            Unit::Count,
            "Total number of cache records dropped for capacity or expiry."
        );
        describe_counter!(
            "eventgate_cache_unavailable_total",
            Unit::Count,
            "Total number of cache calls that failed or timed out (degraded mode)."
        );
        describe_counter!(
            "eventgate_cache_breaker_rejected_total",
            Unit::Count,
            "Total number of cache calls skipped because the cache circuit was open."
        );
        describe_counter!(
            "eventgate_cache_breaker_transition_total",
            Unit::Count,
            "Cache circuit state changes, labelled by the state entered."
        );
        describe_counter!(
            "eventgate_persistence_retry_total",
            Unit::Count,
            "Total number of persistence retries after transient failures."
        );
    });
}
