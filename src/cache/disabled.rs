use std::time::Duration;

use async_trait::async_trait;

use crate::domain::events::{DedupKey, EventRecord};

use super::stats::{CacheCounters, CacheStats};
use super::{CacheError, ClaimToken, EventCache};

const BACKEND: &str = "disabled";
const REASON: &str = "cache backend disabled by configuration";

/// Backend that keeps the gateway permanently in cache-bypass mode.
#[derive(Debug, Default)]
pub struct DisabledCache {
    counters: CacheCounters,
}

impl DisabledCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventCache for DisabledCache {
    async fn get(&self, _key: &DedupKey) -> Result<Option<EventRecord>, CacheError> {
        Err(CacheError::unavailable(REASON))
    }

    async fn put(
        &self,
        _key: &DedupKey,
        _record: &EventRecord,
        _ttl: Duration,
    ) -> Result<(), CacheError> {
        Err(CacheError::unavailable(REASON))
    }

    async fn try_claim(
        &self,
        _key: &DedupKey,
        _ttl: Duration,
    ) -> Result<Option<ClaimToken>, CacheError> {
        Err(CacheError::unavailable(REASON))
    }

    async fn release(&self, _key: &DedupKey, _token: &ClaimToken) -> Result<bool, CacheError> {
        Err(CacheError::unavailable(REASON))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Err(CacheError::unavailable(REASON))
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        Ok(0)
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(BACKEND, None)
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
