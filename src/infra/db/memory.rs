//! In-process `EventsRepo` with the same uniqueness and ordering rules as Postgres.

use std::collections::{BTreeSet, HashMap, hash_map::Entry};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::application::pagination::{CursorPage, EventCursor, PageRequest};
use crate::application::repos::{
    EventQueryFilter, EventsRepo, InsertOutcome, RepoError, next_event_cursor,
};
use crate::domain::events::{DedupKey, EventRecord};

#[derive(Default)]
struct Store {
    by_key: HashMap<DedupKey, EventRecord>,
    by_source: HashMap<String, BTreeSet<(i64, DedupKey)>>,
}

#[derive(Default)]
pub struct InMemoryEventsRepo {
    store: RwLock<Store>,
}

impl InMemoryEventsRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.by_key.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl EventsRepo for InMemoryEventsRepo {
    async fn insert_if_absent(&self, record: &EventRecord) -> Result<InsertOutcome, RepoError> {
        let mut guard = self.store.write().await;
        let store = &mut *guard;
        match store.by_key.entry(record.dedup_key.clone()) {
            Entry::Occupied(_) => Ok(InsertOutcome::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                store
                    .by_source
                    .entry(record.source_id.clone())
                    .or_default()
                    .insert((record.sequence, record.dedup_key.clone()));
                Ok(InsertOutcome::Accepted)
            }
        }
    }

    async fn find_event(&self, key: &DedupKey) -> Result<Option<EventRecord>, RepoError> {
        Ok(self.store.read().await.by_key.get(key).cloned())
    }

    async fn list_events(
        &self,
        filter: &EventQueryFilter,
        page: PageRequest<EventCursor>,
    ) -> Result<CursorPage<EventRecord>, RepoError> {
        let limit = page.limit.max(1);
        let store = self.store.read().await;
        let Some(index) = store.by_source.get(&filter.source_id) else {
            return Ok(CursorPage::empty());
        };

        let lower = match page.cursor {
            Some(cursor) => Bound::Excluded((cursor.sequence(), cursor.dedup_key().clone())),
            None => Bound::Unbounded,
        };

        let records: Vec<EventRecord> = index
            .range((lower, Bound::Unbounded))
            .filter(|(sequence, _)| filter.after_sequence.is_none_or(|after| *sequence > after))
            .take_while(|(sequence, _)| filter.up_to_sequence.is_none_or(|up_to| *sequence <= up_to))
            .filter_map(|(_, key)| store.by_key.get(key).cloned())
            .take(limit as usize)
            .collect();

        let next_cursor = next_event_cursor(&records, limit);
        Ok(CursorPage::new(records, next_cursor))
    }

    async fn max_sequence(&self, source_id: &str) -> Result<Option<i64>, RepoError> {
        let store = self.store.read().await;
        Ok(store
            .by_source
            .get(source_id)
            .and_then(|index| index.last())
            .map(|(sequence, _)| *sequence))
    }

    async fn health_check(&self) -> Result<(), RepoError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
