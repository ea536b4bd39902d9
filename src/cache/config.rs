//! Cache configuration.
//!
//! Resolved from the `[cache]` section of the settings.

use std::num::NonZeroUsize;
use std::time::Duration;

const DEFAULT_KEY_PREFIX: &str = "eventgate";
const DEFAULT_EVENT_TTL_SECS: u64 = 300;
const DEFAULT_CLAIM_TTL_SECS: u64 = 120;
const DEFAULT_MAX_ENTRIES: usize = 10_000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_OPERATION_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackendKind {
    Memory,
    Redis { url: String },
    /// Every operation reports the cache as unavailable.
    Disabled,
}

impl CacheBackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheBackendKind::Memory => "memory",
            CacheBackendKind::Redis { .. } => "redis",
            CacheBackendKind::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Namespace prepended to every key, shared by all gateway instances.
    pub key_prefix: String,
    /// Lifetime of a cached event record.
    pub event_ttl: Duration,
    /// Lifetime of an ingestion claim.
    pub claim_ttl: Duration,
    /// Capacity of the in-process store.
    pub max_entries: usize,
    pub sweep_interval: Duration,
    /// Upper bound for one cache round trip before the caller treats the cache as unavailable.
    pub operation_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            event_ttl: Duration::from_secs(DEFAULT_EVENT_TTL_SECS),
            claim_ttl: Duration::from_secs(DEFAULT_CLAIM_TTL_SECS),
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            operation_timeout: Duration::from_millis(DEFAULT_OPERATION_TIMEOUT_MS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend.clone(),
            key_prefix: settings.key_prefix.clone(),
            event_ttl: settings.event_ttl,
            claim_ttl: settings.claim_ttl,
            max_entries: settings.max_entries.get(),
            sweep_interval: settings.sweep_interval,
            operation_timeout: settings.operation_timeout,
        }
    }
}

impl CacheConfig {
    /// Returns the entry limit as NonZeroUsize, clamping to 1 if zero.
    pub fn max_entries_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_entries).unwrap_or(NonZeroUsize::MIN)
    }
}
