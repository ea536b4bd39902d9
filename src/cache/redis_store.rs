//! Redis cache backend shared by every gateway instance.
//!
//! Records are stored as JSON strings with `PX` expiry. Claims use `SET <token> NX PX` so
//! the first writer across all instances wins, and release only deletes a claim whose
//! value still equals the caller's token.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{ErrorKind, RedisError, RedisResult, Script};
use tracing::debug;

use crate::domain::events::{DedupKey, EventRecord};

use super::config::CacheConfig;
use super::keys::CacheKeys;
use super::stats::{CacheCounters, CacheStats};
use super::{CacheError, ClaimToken, EventCache};

const BACKEND: &str = "redis";
const SCAN_BATCH: usize = 500;

const RELEASE_IF_OWNER: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

pub struct RedisCache {
    manager: ConnectionManager,
    keys: CacheKeys,
    operation_timeout: Duration,
    counters: CacheCounters,
    release_script: Script,
}

impl RedisCache {
    pub async fn connect(url: &str, config: &CacheConfig) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let manager = tokio::time::timeout(config.operation_timeout * 4, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(map_redis_error)?;

        Ok(Self {
            manager,
            keys: CacheKeys::new(config.key_prefix.clone()),
            operation_timeout: config.operation_timeout,
            counters: CacheCounters::default(),
            release_script: Script::new(RELEASE_IF_OWNER),
        })
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                debug!(op, error = %err, "Redis command failed");
                Err(map_redis_error(err))
            }
            Err(_) => {
                debug!(op, "Redis command timed out");
                Err(CacheError::Timeout)
            }
        }
    }
}

fn map_redis_error(err: RedisError) -> CacheError {
    match err.kind() {
        ErrorKind::TypeError => CacheError::Codec(err.to_string()),
        _ => CacheError::unavailable(err),
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl EventCache for RedisCache {
    async fn get(&self, key: &DedupKey) -> Result<Option<EventRecord>, CacheError> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = self
            .bounded(
                "get",
                redis::cmd("GET").arg(self.keys.event(key)).query_async(&mut conn),
            )
            .await?;

        let record = match raw {
            Some(json) => Some(
                serde_json::from_str::<EventRecord>(&json)
                    .map_err(|err| CacheError::Codec(err.to_string()))?,
            ),
            None => None,
        };
        self.counters.record_lookup(BACKEND, record.is_some());
        Ok(record)
    }

    async fn put(
        &self,
        key: &DedupKey,
        record: &EventRecord,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let json =
            serde_json::to_string(record).map_err(|err| CacheError::Codec(err.to_string()))?;
        let mut conn = self.manager.clone();
        let _: () = self
            .bounded(
                "put",
                redis::cmd("SET")
                    .arg(self.keys.event(key))
                    .arg(json)
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        self.counters.record_set();
        Ok(())
    }

    async fn try_claim(
        &self,
        key: &DedupKey,
        ttl: Duration,
    ) -> Result<Option<ClaimToken>, CacheError> {
        let token = ClaimToken::generate();
        let mut conn = self.manager.clone();
        let reply: Option<String> = self
            .bounded(
                "try_claim",
                redis::cmd("SET")
                    .arg(self.keys.claim(key))
                    .arg(token.as_str())
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        let granted = reply.is_some();
        self.counters.record_claim(granted);
        Ok(granted.then_some(token))
    }

    async fn release(&self, key: &DedupKey, token: &ClaimToken) -> Result<bool, CacheError> {
        let mut conn = self.manager.clone();
        let mut invocation = self.release_script.key(self.keys.claim(key));
        invocation.arg(token.as_str());
        let deleted: u64 = self
            .bounded("release", invocation.invoke_async(&mut conn))
            .await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.manager.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let pattern = self.keys.namespace_pattern();
        let mut conn = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, batch): (u64, Vec<String>) = self
                .bounded(
                    "clear.scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH)
                        .query_async(&mut conn),
                )
                .await?;

            if !batch.is_empty() {
                let deleted: u64 = self
                    .bounded(
                        "clear.del",
                        redis::cmd("DEL").arg(&batch).query_async(&mut conn),
                    )
                    .await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    fn stats(&self) -> CacheStats {
        self.counters.snapshot(BACKEND, None)
    }

    fn backend_name(&self) -> &'static str {
        BACKEND
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_at_least_one_millisecond() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn release_script_compares_before_deleting() {
        let compare = RELEASE_IF_OWNER.find("== ARGV[1]").expect("token comparison");
        let delete = RELEASE_IF_OWNER.find("\"DEL\"").expect("delete call");
        assert!(compare < delete);
    }

    #[test]
    fn type_errors_map_to_codec() {
        let err = RedisError::from((ErrorKind::TypeError, "bad reply"));
        assert!(matches!(map_redis_error(err), CacheError::Codec(_)));

        let err = RedisError::from((ErrorKind::IoError, "connection refused"));
        assert!(matches!(map_redis_error(err), CacheError::Unavailable(_)));
    }
}
