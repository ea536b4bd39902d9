//! Consecutive-failure circuit breaker for cache calls.
//!
//! `Closed` passes every call. After `failure_threshold` failures in a row the circuit
//! opens and calls are skipped for `open_for`. The next call after that runs as a trial
//! in `HalfOpen`: `success_threshold` successes close the circuit, one failure reopens it.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::{info, warn};

use crate::cache::lock::lock_recovering;

const METRIC_BREAKER_REJECTED: &str = "eventgate_cache_breaker_rejected_total";
const METRIC_BREAKER_TRANSITION: &str = "eventgate_cache_breaker_transition_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_for: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_for: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub rejected: u64,
    pub times_opened: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
    rejected: u64,
    times_opened: u64,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                success_threshold: config.success_threshold.max(1),
                ..config
            },
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
                rejected: 0,
                times_opened: 0,
            }),
        }
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }

    /// Whether a call may go to the backend now. Moves `Open` to `HalfOpen` once the
    /// open period has elapsed.
    pub fn allow(&self) -> bool {
        let mut inner = lock_recovering(&self.inner, "breaker.allow");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|opened_at| opened_at.elapsed() >= self.config.open_for);
                if cooled {
                    inner.half_open_successes = 0;
                    transition(&mut inner, CircuitState::HalfOpen);
                    true
                } else {
                    inner.rejected += 1;
                    counter!(METRIC_BREAKER_REJECTED).increment(1);
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = lock_recovering(&self.inner, "breaker.success");
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                transition(&mut inner, CircuitState::Closed);
            }
        }
    }

    pub fn record_failure(&self) {
        let mut inner = lock_recovering(&self.inner, "breaker.failure");
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if trip {
            inner.opened_at = Some(Instant::now());
            inner.times_opened += 1;
            transition(&mut inner, CircuitState::Open);
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = lock_recovering(&self.inner, "breaker.snapshot");
        BreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            rejected: inner.rejected,
            times_opened: inner.times_opened,
        }
    }
}

fn transition(inner: &mut BreakerInner, to: CircuitState) {
    let from = inner.state;
    inner.state = to;
    counter!(METRIC_BREAKER_TRANSITION, "to" => to.as_str()).increment(1);
    if to == CircuitState::Open {
        warn!(
            from = from.as_str(),
            consecutive_failures = inner.consecutive_failures,
            "Cache circuit opened, skipping cache calls"
        );
    } else {
        info!(from = from.as_str(), to = to.as_str(), "Cache circuit state changed");
    }
}
