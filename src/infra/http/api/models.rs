//! Conversions between domain values and the wire types in `eventgate-api-types`.

use axum::http::StatusCode;
use eventgate_api_types::{
    CacheStatsResponse, CircuitState as ApiCircuitState, CircuitStatus, EventBody,
    IngestResponse, IngestStatus,
};
use serde::Deserialize;
use time::format_description::well_known::Rfc3339;

use crate::application::circuit_breaker::{BreakerSnapshot, CircuitState};
use crate::application::ingest::IngestError;
use crate::cache::CacheStats;
use crate::domain::events::{EventRecord, IngestionResult};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventListQuery {
    pub source_id: Option<String>,
    pub after: Option<i64>,
    /// Inclusive upper sequence bound.
    pub until: Option<i64>,
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

pub fn event_to_api(record: EventRecord) -> EventBody {
    let received_at = record
        .received_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| record.received_at.to_string());

    EventBody {
        dedup_key: record.dedup_key.into_inner(),
        source_id: record.source_id,
        external_id: record.external_id,
        sequence: record.sequence,
        payload: record.payload,
        payload_digest: record.payload_digest,
        received_at,
    }
}

/// Status code of a single `POST /events` outcome.
pub fn ingest_status_code(result: &IngestionResult) -> StatusCode {
    match result {
        IngestionResult::Accepted(_) => StatusCode::CREATED,
        IngestionResult::Duplicate { .. } => StatusCode::OK,
        IngestionResult::Rejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
    }
}

pub fn ingest_result_to_api(result: IngestionResult) -> IngestResponse {
    match result {
        IngestionResult::Accepted(record) => IngestResponse {
            status: IngestStatus::Accepted,
            dedup_key: Some(record.dedup_key.into_inner()),
            sequence: Some(record.sequence),
            reason: None,
            detail: None,
        },
        IngestionResult::Duplicate { dedup_key, reason } => IngestResponse {
            status: IngestStatus::Duplicate,
            dedup_key: Some(dedup_key.into_inner()),
            sequence: None,
            reason: Some(reason.as_str().to_string()),
            detail: None,
        },
        IngestionResult::Rejected { dedup_key, reason } => IngestResponse {
            status: IngestStatus::Rejected,
            dedup_key: dedup_key.map(|key| key.into_inner()),
            sequence: None,
            reason: Some(reason.code().to_string()),
            detail: Some(reason.detail()),
        },
    }
}

/// Batch entries report persistence failures inline instead of failing the whole request.
pub fn ingest_failure_to_api(err: &IngestError) -> IngestResponse {
    IngestResponse {
        status: IngestStatus::Failed,
        dedup_key: Some(err.dedup_key().to_string()),
        sequence: None,
        reason: Some("persistence_unavailable".to_string()),
        detail: None,
    }
}

pub fn circuit_to_api(snapshot: BreakerSnapshot) -> CircuitStatus {
    CircuitStatus {
        state: match snapshot.state {
            CircuitState::Closed => ApiCircuitState::Closed,
            CircuitState::Open => ApiCircuitState::Open,
            CircuitState::HalfOpen => ApiCircuitState::HalfOpen,
        },
        consecutive_failures: snapshot.consecutive_failures,
        rejected: snapshot.rejected,
        times_opened: snapshot.times_opened,
    }
}

pub fn cache_stats_to_api(stats: CacheStats, circuit: BreakerSnapshot) -> CacheStatsResponse {
    CacheStatsResponse {
        hit_rate: stats.hit_rate(),
        backend: stats.backend.to_string(),
        hits: stats.hits,
        misses: stats.misses,
        sets: stats.sets,
        claims_granted: stats.claims_granted,
        claims_denied: stats.claims_denied,
        evictions: stats.evictions,
        entries: stats.entries,
        circuit: circuit_to_api(circuit),
    }
}
