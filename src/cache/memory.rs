//! In-process cache backend.
//!
//! Records sit in an LRU bounded by `max_entries`, each with its own deadline. Claims
//! live in a separate map so that record churn can never evict an in-flight claim.
//! Expired entries are dropped lazily on access and in bulk by [`MemoryCache::sweep_expired`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;

use crate::domain::events::{DedupKey, EventRecord};

use super::config::CacheConfig;
use super::lock::lock_recovering;
use super::stats::{CacheCounters, CacheStats};
use super::{CacheError, ClaimToken, EventCache};

const BACKEND: &str = "memory";

struct Entry {
    record: EventRecord,
    expires_at: Instant,
}

struct Claim {
    token: ClaimToken,
    expires_at: Instant,
}

struct Inner {
    events: LruCache<DedupKey, Entry>,
    claims: HashMap<DedupKey, Claim>,
    claim_limit: usize,
}

pub struct MemoryCache {
    inner: Mutex<Inner>,
    counters: CacheCounters,
}

impl MemoryCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = config.max_entries_non_zero();
        Self {
            inner: Mutex::new(Inner {
                events: LruCache::new(capacity),
                claims: HashMap::new(),
                claim_limit: capacity.get(),
            }),
            counters: CacheCounters::default(),
        }
    }

    /// Drops every expired record and claim, returning how many were removed.
    pub fn sweep_expired(&self) -> u64 {
        let now = Instant::now();
        let mut inner = lock_recovering(&self.inner, "sweep_expired");

        let expired: Vec<DedupKey> = inner
            .events
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.events.pop(key);
        }

        let claims_before = inner.claims.len();
        inner.claims.retain(|_, claim| claim.expires_at > now);
        let claims_removed = claims_before - inner.claims.len();

        let removed = (expired.len() + claims_removed) as u64;
        self.counters.record_evictions(BACKEND, expired.len() as u64);
        removed
    }

    pub fn len(&self) -> usize {
        lock_recovering(&self.inner, "len").events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventCache for MemoryCache {
    async fn get(&self, key: &DedupKey) -> Result<Option<EventRecord>, CacheError> {
        let now = Instant::now();
        let mut inner = lock_recovering(&self.inner, "get");

        let lookup = inner
            .events
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.record.clone()));
        let found = match lookup {
            Some(Some(record)) => Some(record),
            Some(None) => {
                inner.events.pop(key);
                self.counters.record_evictions(BACKEND, 1);
                None
            }
            None => None,
        };

        self.counters.record_lookup(BACKEND, found.is_some());
        Ok(found)
    }

    async fn put(
        &self,
        key: &DedupKey,
        record: &EventRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            record: record.clone(),
            expires_at: Instant::now() + ttl,
        };
        let mut inner = lock_recovering(&self.inner, "put");
        if let Some((evicted, _)) = inner.events.push(key.clone(), entry)
            && &evicted != key
        {
            self.counters.record_evictions(BACKEND, 1);
        }
        self.counters.record_set();
        Ok(())
    }

    async fn try_claim(
        &self,
        key: &DedupKey,
        ttl: Duration,
    ) -> Result<Option<ClaimToken>, CacheError> {
        let now = Instant::now();
        let mut inner = lock_recovering(&self.inner, "try_claim");

        let held = inner
            .claims
            .get(key)
            .is_some_and(|claim| claim.expires_at > now);
        let granted = if held {
            None
        } else {
            if inner.claims.len() >= inner.claim_limit {
                inner.claims.retain(|_, claim| claim.expires_at > now);
            }
            let token = ClaimToken::generate();
            inner.claims.insert(
                key.clone(),
                Claim {
                    token: token.clone(),
                    expires_at: now + ttl,
                },
            );
            Some(token)
        };

        self.counters.record_claim(granted.is_some());
        Ok(granted)
    }

    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool, CacheError> {
        let mut inner = lock_recovering(&self.inner, "release");
        let owned = inner
            .claims
            .get(key)
            .is_some_and(|claim| &claim.token == token);
        if owned {
            inner.claims.remove(key);
        }
        Ok(owned)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let mut inner = lock_recovering(&self.inner, "clear");
        let removed = (inner.events.len() + inner.claims.len()) as u64;
        inner.events.clear();
        inner.claims.clear();
        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        let entries = self.len() as u64;
        self.counters.snapshot(BACKEND, Some(entries))
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}
