//! Shared cursor pagination helpers.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::events::{DedupKey, EventRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventCursorPayload {
    sequence: i64,
    dedup_key: String,
}

/// Cursor for walking a source's events in ascending `(sequence, dedup_key)` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCursor {
    sequence: i64,
    dedup_key: DedupKey,
}

impl EventCursor {
    pub fn new(sequence: i64, dedup_key: DedupKey) -> Self {
        Self {
            sequence,
            dedup_key,
        }
    }

    pub fn for_record(record: &EventRecord) -> Self {
        Self::new(record.sequence, record.dedup_key.clone())
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }

    pub fn dedup_key(&self) -> &DedupKey {
        &self.dedup_key
    }

    pub fn encode(&self) -> String {
        let payload = serde_json::json!({
            "sequence": self.sequence,
            "dedup_key": self.dedup_key.as_str(),
        });
        URL_SAFE_NO_PAD.encode(payload.to_string())
    }

    pub fn decode(cursor: &str) -> Result<Self, PaginationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(cursor)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        let payload: EventCursorPayload = serde_json::from_slice(&bytes)
            .map_err(|err| PaginationError::InvalidCursor(err.to_string()))?;
        Ok(Self {
            sequence: payload.sequence,
            dedup_key: DedupKey::new(payload.dedup_key),
        })
    }
}

/// Cursor-aware pagination request.
#[derive(Debug, Clone)]
pub struct PageRequest<C> {
    pub limit: u32,
    pub cursor: Option<C>,
}

impl<C> PageRequest<C> {
    pub fn new(limit: u32, cursor: Option<C>) -> Self {
        Self { limit, cursor }
    }
}

/// Cursor-aware page result.
#[derive(Debug, Clone, Serialize)]
pub struct CursorPage<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

impl<T> CursorPage<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_cursor: None,
        }
    }

    pub fn new(items: Vec<T>, next_cursor: Option<String>) -> Self {
        Self { items, next_cursor }
    }
}

#[derive(Debug, Error)]
pub enum PaginationError {
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}
