use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Locks `lock`, recovering the guard if a previous holder panicked.
pub(crate) fn lock_recovering<'a, T>(lock: &'a Mutex<T>, op: &'static str) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            lock_kind = "mutex.lock",
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}
