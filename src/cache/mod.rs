//! Eventgate cache layer.
//!
//! A TTL key-value store holding advisory copies of recently accepted events plus the
//! short-lived ingestion claims that stop concurrent writers of the same dedup key.
//! Persistence stays authoritative; every caller must cope with [`CacheError`] by
//! falling back to the persistent store.
//!
//! ## Backends
//!
//! Selected via `[cache] backend` in the settings:
//!
//! ```toml
//! [cache]
//! backend = "memory"   # or "redis", "disabled"
//! event_ttl_seconds = 300
//! claim_ttl_seconds = 120
//! # ... see config.rs for all options
//! ```

mod config;
mod disabled;
mod keys;
pub(crate) mod lock;
mod memory;
mod redis_store;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::events::{DedupKey, EventRecord};

pub use config::{CacheBackendKind, CacheConfig};
pub use disabled::DisabledCache;
pub use keys::CacheKeys;
pub use memory::MemoryCache;
pub use redis_store::RedisCache;
pub use stats::{CacheCounters, CacheStats};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("cache operation timed out")]
    Timeout,
    #[error("cache entry could not be decoded: {0}")]
    Codec(String),
    #[error("cache circuit open, call skipped")]
    CircuitOpen,
}

impl CacheError {
    pub fn unavailable(err: impl std::fmt::Display) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Proof of ownership of a claim. Only the holder's token can release it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimToken(String);

impl ClaimToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait EventCache: Send + Sync {
    /// Absence is a miss, not an error.
    async fn get(&self, key: &DedupKey) -> Result<Option<EventRecord>, CacheError>;

    /// Overwrites any existing entry.
    async fn put(&self, key: &DedupKey, record: &EventRecord, ttl: Duration)
    -> Result<(), CacheError>;

    /// Atomically reserves `key` for `ttl`. Only the first caller in the window gets a token.
    async fn try_claim(&self, key: &DedupKey, ttl: Duration)
    -> Result<Option<ClaimToken>, CacheError>;

    /// Drops a claim early so a failed ingestion can be retried immediately. A claim that
    /// expired and was taken by someone else is left alone; returns whether one was removed.
    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    /// Removes every record and claim in the gateway's namespace, returning how many went.
    async fn clear(&self) -> Result<u64, CacheError>;

    fn stats(&self) -> CacheStats;

    fn backend_name(&self) -> &'static str;
}

/// Builds the backend named by `config`.
pub async fn connect(config: &CacheConfig) -> Result<Arc<dyn EventCache>, CacheError> {
    match &config.backend {
        CacheBackendKind::Memory => Ok(Arc::new(MemoryCache::new(config))),
        CacheBackendKind::Redis { url } => {
            let cache = RedisCache::connect(url, config).await?;
            Ok(Arc::new(cache))
        }
        CacheBackendKind::Disabled => Ok(Arc::new(DisabledCache::new())),
    }
}
