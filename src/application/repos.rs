//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::application::pagination::{CursorPage, EventCursor, PageRequest, PaginationError};
use crate::domain::events::{DedupKey, EventRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence unavailable: {0}")]
    Unavailable(String),
    #[error("persistence operation timed out")]
    Timeout,
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error(transparent)]
    Pagination(#[from] PaginationError),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }

    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RepoError::Unavailable(_) | RepoError::Timeout)
    }
}

/// Result of a conditional insert keyed by `dedup_key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Accepted,
    /// A record with the same key already exists; nothing was written.
    Conflict,
}

#[derive(Debug, Clone, Default)]
pub struct EventQueryFilter {
    pub source_id: String,
    /// Exclusive lower bound on `sequence`.
    pub after_sequence: Option<i64>,
    /// Inclusive upper bound on `sequence`.
    pub up_to_sequence: Option<i64>,
}

impl EventQueryFilter {
    pub fn for_source(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait EventsRepo: Send + Sync {
    /// Writes `record` unless its key is already present. Atomic with respect to the key.
    async fn insert_if_absent(&self, record: &EventRecord) -> Result<InsertOutcome, RepoError>;

    async fn find_event(&self, key: &DedupKey) -> Result<Option<EventRecord>, RepoError>;

    /// Events of one source in ascending `(sequence, dedup_key)` order.
    async fn list_events(
        &self,
        filter: &EventQueryFilter,
        page: PageRequest<EventCursor>,
    ) -> Result<CursorPage<EventRecord>, RepoError>;

    async fn max_sequence(&self, source_id: &str) -> Result<Option<i64>, RepoError>;

    async fn health_check(&self) -> Result<(), RepoError>;

    fn backend_name(&self) -> &'static str;
}

/// Next cursor for a page that was filled to `limit`.
pub fn next_event_cursor(records: &[EventRecord], limit: u32) -> Option<String> {
    if records.len() as u32 == limit {
        records
            .last()
            .map(|record| EventCursor::for_record(record).encode())
    } else {
        None
    }
}
