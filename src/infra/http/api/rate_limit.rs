use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Sliding-window limiter keyed by client and route.
///
/// Buckets whose hits have all left the window are dropped at most once per window, so
/// clients that stop sending do not accumulate.
#[derive(Debug, Clone)]
pub struct ApiRateLimiter {
    window: Duration,
    max_requests: u32,
    buckets: Arc<DashMap<String, Vec<Instant>>>,
    last_prune: Arc<Mutex<Instant>>,
}

impl ApiRateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window,
            max_requests,
            buckets: Arc::new(DashMap::new()),
            last_prune: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Records the request when allowed and returns the slots left in the window.
    pub fn allow(&self, key: &str, route: &str) -> (bool, u32) {
        let bucket_key = format!("{key}:{route}");
        let now = Instant::now();
        let window = self.window;
        self.prune_if_due(now);

        let mut entry = self.buckets.entry(bucket_key).or_default();
        entry.retain(|instant| now.duration_since(*instant) < window);

        let used = u32::try_from(entry.len()).unwrap_or(u32::MAX);
        let remaining = self.max_requests.saturating_sub(used);
        if remaining == 0 {
            return (false, 0);
        }

        entry.push(now);
        // after push, one fewer slot remains
        (true, remaining.saturating_sub(1))
    }

    /// Drops every bucket with no hit inside the window; returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }

    fn prune_if_due(&self, now: Instant) {
        // another request is already pruning
        let Ok(mut last) = self.last_prune.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.window {
            return;
        }
        *last = now;
        drop(last);

        let removed = self.prune_at(now);
        if removed > 0 {
            debug!(
                target = "eventgate::http::rate_limit",
                removed,
                remaining = self.buckets.len(),
                "pruned idle rate limit buckets"
            );
        }
    }

    fn prune_at(&self, now: Instant) -> usize {
        let window = self.window;
        let before = self.buckets.len();
        self.buckets.retain(|_, hits| {
            hits.retain(|instant| now.duration_since(*instant) < window);
            !hits.is_empty()
        });
        before.saturating_sub(self.buckets.len())
    }

    pub fn retry_after_secs(&self) -> u64 {
        self.window.as_secs().max(1)
    }

    pub fn limit(&self) -> u32 {
        self.max_requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_limit_within_window() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(60), 2);

        assert_eq!(limiter.allow("client", "/events"), (true, 1));
        assert_eq!(limiter.allow("client", "/events"), (true, 0));
        assert_eq!(limiter.allow("client", "/events"), (false, 0));
    }

    #[test]
    fn buckets_are_per_client_and_route() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(60), 1);

        assert!(limiter.allow("a", "/events").0);
        assert!(limiter.allow("b", "/events").0);
        assert!(limiter.allow("a", "/events/batch").0);
        assert!(!limiter.allow("a", "/events").0);
    }

    #[test]
    fn window_expiry_frees_slots() {
        let limiter = ApiRateLimiter::new(Duration::from_millis(20), 1);

        assert!(limiter.allow("client", "/events").0);
        assert!(!limiter.allow("client", "/events").0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow("client", "/events").0);
    }

    #[test]
    fn idle_buckets_are_pruned_once_the_window_passes() {
        let limiter = ApiRateLimiter::new(Duration::from_millis(5), 10);
        for client in 0..10_000 {
            assert!(limiter.allow(&format!("client-{client}"), "/events").0);
        }
        assert!(limiter.tracked_buckets() > 1);

        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allow("late-client", "/events").0);

        assert_eq!(limiter.tracked_buckets(), 1);
    }

    #[test]
    fn prune_keeps_buckets_with_recent_hits() {
        let limiter = ApiRateLimiter::new(Duration::from_secs(60), 2);
        assert!(limiter.allow("active", "/events").0);

        assert_eq!(limiter.prune(), 0);
        assert_eq!(limiter.tracked_buckets(), 1);
        assert_eq!(limiter.allow("active", "/events"), (true, 0));
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let limiter = ApiRateLimiter::new(Duration::from_millis(20), 1);
        assert_eq!(limiter.retry_after_secs(), 1);
        assert_eq!(limiter.limit(), 1);
    }
}
