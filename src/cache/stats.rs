//! Shared hit/miss bookkeeping for every cache backend.

use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;

const METRIC_CACHE_HIT: &str = "eventgate_cache_hit_total";
const METRIC_CACHE_MISS: &str = "eventgate_cache_miss_total";
const METRIC_CACHE_EVICT: &str = "eventgate_cache_evict_total";

#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    claims_granted: AtomicU64,
    claims_denied: AtomicU64,
    evictions: AtomicU64,
}

impl CacheCounters {
    pub fn record_lookup(&self, backend: &'static str, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_HIT, "backend" => backend).increment(1);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            counter!(METRIC_CACHE_MISS, "backend" => backend).increment(1);
        }
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claim(&self, granted: bool) {
        if granted {
            self.claims_granted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.claims_denied.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Entries dropped for capacity or expiry.
    pub fn record_evictions(&self, backend: &'static str, count: u64) {
        if count == 0 {
            return;
        }
        self.evictions.fetch_add(count, Ordering::Relaxed);
        counter!(METRIC_CACHE_EVICT, "backend" => backend).increment(count);
    }

    pub fn snapshot(&self, backend: &'static str, entries: Option<u64>) -> CacheStats {
        CacheStats {
            backend,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            claims_granted: self.claims_granted.load(Ordering::Relaxed),
            claims_denied: self.claims_denied.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries,
        }
    }
}

/// Point-in-time view of a backend's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub claims_granted: u64,
    pub claims_denied: u64,
    pub evictions: u64,
    /// Only known for the in-process backend.
    pub entries: Option<u64>,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
