//! Read path: cached point lookups, persistence-backed range queries.

use std::sync::Arc;

use async_stream::try_stream;
use futures::Stream;
use thiserror::Error;
use tracing::instrument;

use crate::application::cache_access::CacheAccess;
use crate::application::pagination::{CursorPage, EventCursor, PageRequest, PaginationError};
use crate::application::repos::{EventQueryFilter, EventsRepo, RepoError};
use crate::application::retry::RetryPolicy;
use crate::domain::events::{DedupKey, EventRecord};

pub const DEFAULT_PAGE_LIMIT: u32 = 50;
pub const MAX_PAGE_LIMIT: u32 = 500;
const STREAM_PAGE_LIMIT: u32 = 200;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("event not found")]
    NotFound,
    #[error("persistence unavailable")]
    PersistenceUnavailable(#[source] RepoError),
    #[error(transparent)]
    InvalidCursor(#[from] PaginationError),
    #[error("failed to encode event: {0}")]
    Encoding(String),
}

impl From<RepoError> for QueryError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Pagination(err) => QueryError::InvalidCursor(err),
            other => QueryError::PersistenceUnavailable(other),
        }
    }
}

/// Parameters of one `list_events` page.
#[derive(Debug, Clone, Default)]
pub struct ListEventsQuery {
    pub source_id: String,
    /// Only events with a strictly greater sequence.
    pub after_sequence: Option<i64>,
    /// Only events with a sequence less than or equal to this one. Applies to every page.
    pub up_to_sequence: Option<i64>,
    /// Opaque continuation token; takes precedence over `after_sequence`.
    pub cursor: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Clone)]
pub struct QueryService {
    cache: CacheAccess,
    repo: Arc<dyn EventsRepo>,
    retry: RetryPolicy,
}

impl QueryService {
    pub fn new(cache: CacheAccess, repo: Arc<dyn EventsRepo>, retry: RetryPolicy) -> Self {
        Self { cache, repo, retry }
    }

    /// Cache first; a persistence hit repopulates the cache.
    #[instrument(skip(self), fields(dedup_key = %key))]
    pub async fn get_event(&self, key: &DedupKey) -> Result<EventRecord, QueryError> {
        if let Ok(Some(record)) = self.cache.get(key).await {
            return Ok(record);
        }

        let found = self
            .retry
            .run("find_event", || self.repo.find_event(key))
            .await?;

        match found {
            Some(record) => {
                let _ = self.cache.put(&record).await;
                Ok(record)
            }
            None => Err(QueryError::NotFound),
        }
    }

    /// Always served from persistence, ascending by sequence.
    #[instrument(skip(self), fields(source_id = %query.source_id))]
    pub async fn list_events(
        &self,
        query: &ListEventsQuery,
    ) -> Result<CursorPage<EventRecord>, QueryError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT);

        let cursor = query
            .cursor
            .as_deref()
            .map(EventCursor::decode)
            .transpose()?;

        let filter = EventQueryFilter {
            source_id: query.source_id.clone(),
            after_sequence: if cursor.is_some() {
                None
            } else {
                query.after_sequence
            },
            up_to_sequence: query.up_to_sequence,
        };

        self.fetch_page(&filter, PageRequest::new(limit, cursor))
            .await
    }

    /// Finite stream over the events of `source_id` in `(after_sequence, up_to_sequence]`,
    /// paged lazily.
    pub fn stream_events(
        &self,
        source_id: impl Into<String>,
        after_sequence: Option<i64>,
        up_to_sequence: Option<i64>,
    ) -> impl Stream<Item = Result<EventRecord, QueryError>> + Send + 'static {
        let service = self.clone();
        let filter = EventQueryFilter {
            source_id: source_id.into(),
            after_sequence,
            up_to_sequence,
        };

        try_stream! {
            let mut cursor: Option<EventCursor> = None;
            loop {
                let page = service
                    .fetch_page(&filter, PageRequest::new(STREAM_PAGE_LIMIT, cursor.take()))
                    .await?;
                let next = page.next_cursor.as_deref().map(EventCursor::decode).transpose()?;
                for record in page.items {
                    yield record;
                }
                match next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
        }
    }

    async fn fetch_page(
        &self,
        filter: &EventQueryFilter,
        page: PageRequest<EventCursor>,
    ) -> Result<CursorPage<EventRecord>, QueryError> {
        let page = self
            .retry
            .run("list_events", || self.repo.list_events(filter, page.clone()))
            .await?;
        Ok(page)
    }
}
