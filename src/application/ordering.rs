//! Per-source sequencing gate used when `enforce_source_ordering` is on.
//!
//! Ingestions of one source run one at a time under that source's lock. An event whose
//! sequence is at or below the last released sequence is a late arrival. The lock is
//! held across the whole ingestion so that release order equals persistence order.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::application::repos::RepoError;

#[derive(Debug, Default)]
struct SourceMark {
    seeded: bool,
    last_released: Option<i64>,
}

#[derive(Debug, Default)]
pub struct SourceSequencer {
    sources: DashMap<String, Arc<Mutex<SourceMark>>>,
}

/// Exclusive access to one source's high-water mark.
pub struct SequenceSlot {
    guard: OwnedMutexGuard<SourceMark>,
}

/// Where an incoming sequence falls relative to the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    InOrder,
    Late { last_released: i64 },
}

impl SourceSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the source's turn. `seed` supplies the persisted high-water mark the
    /// first time a source is seen.
    pub async fn acquire<F, Fut>(&self, source_id: &str, seed: F) -> Result<SequenceSlot, RepoError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<i64>, RepoError>>,
    {
        let cell = self
            .sources
            .entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SourceMark::default())))
            .clone();
        let mut guard = cell.lock_owned().await;

        if !guard.seeded {
            guard.last_released = seed().await?;
            guard.seeded = true;
        }

        Ok(SequenceSlot { guard })
    }

    pub fn tracked_sources(&self) -> usize {
        self.sources.len()
    }
}

impl SequenceSlot {
    pub fn check(&self, sequence: i64) -> SequenceCheck {
        match self.guard.last_released {
            Some(last) if sequence <= last => SequenceCheck::Late {
                last_released: last,
            },
            _ => SequenceCheck::InOrder,
        }
    }

    pub fn last_released(&self) -> Option<i64> {
        self.guard.last_released
    }

    pub fn release(&mut self, sequence: i64) {
        let next = match self.guard.last_released {
            Some(last) => last.max(sequence),
            None => sequence,
        };
        self.guard.last_released = Some(next);
    }
}
