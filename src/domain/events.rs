//! Canonical event records and per-call ingestion outcomes.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use super::error::ValidationError;

/// Globally unique identifier derived from an event's identity (and, by policy, its content).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DedupKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An accepted event. Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub dedup_key: DedupKey,
    pub source_id: String,
    pub external_id: String,
    pub sequence: i64,
    pub payload: Value,
    /// Hex SHA-256 of the canonical payload serialization.
    pub payload_digest: String,
    pub received_at: OffsetDateTime,
}

/// Loosely-typed inbound record as it arrives from a feed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawEvent {
    fields: Map<String, Value>,
}

impl RawEvent {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            _ => Err(ValidationError::Malformed),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn take(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }
}

impl TryFrom<Value> for RawEvent {
    type Error = ValidationError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateReason {
    /// Another ingestion of the same key is in flight or finished within the claim window.
    ClaimHeld,
    /// The persistent store already holds a record with this key.
    AlreadyPersisted,
}

impl DuplicateReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DuplicateReason::ClaimHeld => "claim_held",
            DuplicateReason::AlreadyPersisted => "already_persisted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    Validation(ValidationError),
    /// The event arrived after a later sequence of the same source was released.
    OrderingViolation { sequence: i64, last_released: i64 },
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Validation(err) => err.code(),
            RejectReason::OrderingViolation { .. } => "ordering_violation",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            RejectReason::Validation(err) => err.to_string(),
            RejectReason::OrderingViolation {
                sequence,
                last_released,
            } => format!(
                "sequence {sequence} arrived after sequence {last_released} was released"
            ),
        }
    }
}

/// Outcome of one ingestion call. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestionResult {
    Accepted(EventRecord),
    Duplicate {
        dedup_key: DedupKey,
        reason: DuplicateReason,
    },
    Rejected {
        dedup_key: Option<DedupKey>,
        reason: RejectReason,
    },
}

impl IngestionResult {
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected {
            dedup_key: None,
            reason,
        }
    }

    pub fn outcome_label(&self) -> &'static str {
        match self {
            IngestionResult::Accepted(_) => "accepted",
            IngestionResult::Duplicate { .. } => "duplicate",
            IngestionResult::Rejected { .. } => "rejected",
        }
    }

    pub fn dedup_key(&self) -> Option<&DedupKey> {
        match self {
            IngestionResult::Accepted(record) => Some(&record.dedup_key),
            IngestionResult::Duplicate { dedup_key, .. } => Some(dedup_key),
            IngestionResult::Rejected { dedup_key, .. } => dedup_key.as_ref(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, IngestionResult::Accepted(_))
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, IngestionResult::Duplicate { .. })
    }
}
