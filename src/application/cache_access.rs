//! Time-bounded cache calls that report, rather than propagate, backend trouble.
//!
//! Every call goes through a shared [`CircuitBreaker`]; while the circuit is open calls
//! fail fast with [`CacheError::CircuitOpen`] instead of waiting out the timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::warn;

use crate::application::circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::cache::{CacheError, ClaimToken, EventCache};
use crate::domain::events::{DedupKey, EventRecord};

const METRIC_CACHE_UNAVAILABLE: &str = "eventgate_cache_unavailable_total";

#[derive(Clone)]
pub struct CacheAccess {
    cache: Arc<dyn EventCache>,
    timeout: Duration,
    event_ttl: Duration,
    claim_ttl: Duration,
    breaker: Arc<CircuitBreaker>,
}

impl CacheAccess {
    pub fn new(
        cache: Arc<dyn EventCache>,
        timeout: Duration,
        event_ttl: Duration,
        claim_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            timeout,
            event_ttl,
            claim_ttl,
            breaker: Arc::new(CircuitBreaker::new(BreakerConfig::default())),
        }
    }

    pub fn with_breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = Arc::new(CircuitBreaker::new(config));
        self
    }

    pub fn cache(&self) -> &Arc<dyn EventCache> {
        &self.cache
    }

    pub fn circuit(&self) -> BreakerSnapshot {
        self.breaker.snapshot()
    }

    pub async fn get(&self, key: &DedupKey) -> Result<Option<EventRecord>, CacheError> {
        self.bounded("get", key, self.cache.get(key)).await
    }

    pub async fn put(&self, record: &EventRecord) -> Result<(), CacheError> {
        let key = &record.dedup_key;
        self.bounded("put", key, self.cache.put(key, record, self.event_ttl))
            .await
    }

    pub async fn try_claim(&self, key: &DedupKey) -> Result<Option<ClaimToken>, CacheError> {
        self.bounded("try_claim", key, self.cache.try_claim(key, self.claim_ttl))
            .await
    }

    /// Releases the claim only if `token` still owns it; `Ok(false)` when it has
    /// expired or passed to another holder.
    pub async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool, CacheError> {
        self.bounded("release", key, self.cache.release(key, token))
            .await
    }

    /// Bounded like every other call, but silent: health checks report the error themselves.
    /// Bypasses the breaker so an open circuit still shows the backend's real condition.
    pub async fn ping(&self) -> Result<(), CacheError> {
        match tokio::time::timeout(self.timeout, self.cache.ping()).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        }
    }

    async fn bounded<T, F>(&self, op: &'static str, key: &DedupKey, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        if !self.breaker.allow() {
            counter!(METRIC_CACHE_UNAVAILABLE, "op" => op).increment(1);
            return Err(CacheError::CircuitOpen);
        }

        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        };

        match &result {
            // a decode failure means the backend answered
            Ok(_) | Err(CacheError::Codec(_)) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }

        if let Err(err) = &result {
            counter!(METRIC_CACHE_UNAVAILABLE, "op" => op).increment(1);
            warn!(
                op,
                dedup_key = %key,
                backend = self.cache.backend_name(),
                error = %err,
                "Cache call failed, continuing in degraded mode"
            );
        }
        result
    }
}
