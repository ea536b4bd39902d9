//! Ingestion coordinator.
//!
//! Per event: normalize, gate on source order (optional), claim the key in the cache,
//! write through to persistence, then populate the cache. Persistence decides what is a
//! duplicate; the claim only saves redundant writes. Cache trouble never blocks an
//! ingestion, persistence trouble always reaches the caller.

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, instrument};

use crate::application::cache_access::CacheAccess;
use crate::application::ordering::{SequenceCheck, SequenceSlot, SourceSequencer};
use crate::application::repos::{EventsRepo, InsertOutcome, RepoError};
use crate::application::retry::RetryPolicy;
use crate::domain::events::{
    DedupKey, DuplicateReason, EventRecord, IngestionResult, RawEvent, RejectReason,
};
use crate::domain::normalize::EventNormalizer;

const METRIC_INGEST_TOTAL: &str = "eventgate_ingest_total";
const METRIC_INGEST_MS: &str = "eventgate_ingest_ms";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("persistence unavailable while ingesting `{dedup_key}`")]
    PersistenceUnavailable {
        dedup_key: DedupKey,
        #[source]
        source: RepoError,
    },
}

impl IngestError {
    pub fn dedup_key(&self) -> &DedupKey {
        match self {
            IngestError::PersistenceUnavailable { dedup_key, .. } => dedup_key,
        }
    }
}

pub struct IngestionCoordinator {
    normalizer: EventNormalizer,
    cache: CacheAccess,
    repo: Arc<dyn EventsRepo>,
    retry: RetryPolicy,
    sequencer: Option<SourceSequencer>,
}

impl IngestionCoordinator {
    pub fn new(
        normalizer: EventNormalizer,
        cache: CacheAccess,
        repo: Arc<dyn EventsRepo>,
        retry: RetryPolicy,
        enforce_source_ordering: bool,
    ) -> Self {
        Self {
            normalizer,
            cache,
            repo,
            retry,
            sequencer: enforce_source_ordering.then(SourceSequencer::new),
        }
    }

    pub fn enforces_source_ordering(&self) -> bool {
        self.sequencer.is_some()
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.normalizer.config().max_payload_bytes
    }

    /// Ingests an arbitrary JSON value; anything but an object is rejected as malformed.
    pub async fn ingest_value(&self, value: Value) -> Result<IngestionResult, IngestError> {
        match RawEvent::from_value(value) {
            Ok(raw) => self.ingest(raw).await,
            Err(err) => {
                let result = IngestionResult::rejected(RejectReason::Validation(err));
                record_outcome(&result, Instant::now());
                Ok(result)
            }
        }
    }

    /// Ingests events one after another, so per-source order follows input order.
    pub async fn ingest_batch(
        &self,
        values: Vec<Value>,
    ) -> Vec<Result<IngestionResult, IngestError>> {
        let mut results = Vec::with_capacity(values.len());
        for value in values {
            results.push(self.ingest_value(value).await);
        }
        results
    }

    #[instrument(skip_all)]
    pub async fn ingest(&self, raw: RawEvent) -> Result<IngestionResult, IngestError> {
        let started_at = Instant::now();
        let outcome = self.run(raw).await;
        match &outcome {
            Ok(result) => record_outcome(result, started_at),
            Err(err) => {
                counter!(METRIC_INGEST_TOTAL, "outcome" => "failed").increment(1);
                error!(
                    dedup_key = %err.dedup_key(),
                    error = %err,
                    "Ingestion failed: persistence unavailable"
                );
            }
        }
        outcome
    }

    async fn run(&self, raw: RawEvent) -> Result<IngestionResult, IngestError> {
        let record = match self.normalizer.normalize(raw) {
            Ok(record) => record,
            Err(err) => return Ok(IngestionResult::rejected(RejectReason::Validation(err))),
        };

        let Some(sequencer) = &self.sequencer else {
            return self.claim_and_persist(record, None).await;
        };

        let source_id = record.source_id.clone();
        let mut slot = sequencer
            .acquire(&source_id, || {
                self.retry
                    .run("max_sequence", || self.repo.max_sequence(&source_id))
            })
            .await
            .map_err(|source| IngestError::PersistenceUnavailable {
                dedup_key: record.dedup_key.clone(),
                source,
            })?;

        if let SequenceCheck::Late { last_released } = slot.check(record.sequence) {
            return self.resolve_late(record, last_released).await;
        }

        self.claim_and_persist(record, Some(&mut slot)).await
    }

    /// A late event is only a violation if nothing with its key was persisted before.
    async fn resolve_late(
        &self,
        record: EventRecord,
        last_released: i64,
    ) -> Result<IngestionResult, IngestError> {
        let existing = self
            .retry
            .run("find_event", || self.repo.find_event(&record.dedup_key))
            .await
            .map_err(|source| IngestError::PersistenceUnavailable {
                dedup_key: record.dedup_key.clone(),
                source,
            })?;

        if existing.is_some() {
            return Ok(IngestionResult::Duplicate {
                dedup_key: record.dedup_key,
                reason: DuplicateReason::AlreadyPersisted,
            });
        }

        Ok(IngestionResult::Rejected {
            dedup_key: Some(record.dedup_key),
            reason: RejectReason::OrderingViolation {
                sequence: record.sequence,
                last_released,
            },
        })
    }

    async fn claim_and_persist(
        &self,
        record: EventRecord,
        slot: Option<&mut SequenceSlot>,
    ) -> Result<IngestionResult, IngestError> {
        let claim = match self.cache.try_claim(&record.dedup_key).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                return Ok(IngestionResult::Duplicate {
                    dedup_key: record.dedup_key,
                    reason: DuplicateReason::ClaimHeld,
                });
            }
            // degraded: persistence uniqueness still arbitrates
            Err(_) => None,
        };

        let outcome = self
            .retry
            .run("insert_if_absent", || self.repo.insert_if_absent(&record))
            .await;

        match outcome {
            Ok(InsertOutcome::Accepted) => Ok(self.accept(record, slot).await),
            Ok(InsertOutcome::Conflict) => match self.reconcile(&record).await {
                Some(existing) if existing == record => {
                    // an earlier attempt committed before its reply was lost
                    debug!(
                        dedup_key = %record.dedup_key,
                        "Conflict matched this attempt's own commit"
                    );
                    Ok(self.accept(record, slot).await)
                }
                _ => Ok(IngestionResult::Duplicate {
                    dedup_key: record.dedup_key,
                    reason: DuplicateReason::AlreadyPersisted,
                }),
            },
            Err(source) => {
                if let Some(token) = &claim {
                    let _ = self.cache.release(&record.dedup_key, token).await;
                }
                Err(IngestError::PersistenceUnavailable {
                    dedup_key: record.dedup_key,
                    source,
                })
            }
        }
    }

    async fn accept(
        &self,
        record: EventRecord,
        slot: Option<&mut SequenceSlot>,
    ) -> IngestionResult {
        if let Some(slot) = slot {
            slot.release(record.sequence);
        }
        let _ = self.cache.put(&record).await;
        IngestionResult::Accepted(record)
    }

    /// Loads the persisted copy after a conflict and re-caches it. Best effort.
    async fn reconcile(&self, record: &EventRecord) -> Option<EventRecord> {
        let key = &record.dedup_key;
        match self
            .retry
            .run("find_event", || self.repo.find_event(key))
            .await
        {
            Ok(Some(existing)) => {
                if existing != *record {
                    let _ = self.cache.put(&existing).await;
                }
                Some(existing)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(dedup_key = %key, error = %err, "Could not reconcile cache after conflict");
                None
            }
        }
    }
}

fn record_outcome(result: &IngestionResult, started_at: Instant) {
    counter!(METRIC_INGEST_TOTAL, "outcome" => result.outcome_label()).increment(1);
    histogram!(METRIC_INGEST_MS, "outcome" => result.outcome_label())
        .record(started_at.elapsed().as_secs_f64() * 1000.0);

    match result {
        IngestionResult::Accepted(record) => debug!(
            dedup_key = %record.dedup_key,
            source_id = %record.source_id,
            sequence = record.sequence,
            "Event accepted"
        ),
        IngestionResult::Duplicate { dedup_key, reason } => debug!(
            dedup_key = %dedup_key,
            reason = reason.as_str(),
            "Duplicate event"
        ),
        IngestionResult::Rejected { dedup_key, reason } => info!(
            dedup_key = dedup_key.as_ref().map(DedupKey::as_str),
            reason = reason.code(),
            detail = %reason.detail(),
            "Event rejected"
        ),
    }
}
