//! Wire types for the eventgate HTTP API.
//!
//! The server serializes these bodies and clients can deserialize them
//! without depending on the gateway itself.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a single ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    Duplicate,
    Rejected,
    /// Only produced inside batch responses, when the durable write failed.
    Failed,
}

impl IngestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestStatus::Accepted => "accepted",
            IngestStatus::Duplicate => "duplicate",
            IngestStatus::Rejected => "rejected",
            IngestStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: IngestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    /// Machine-readable reason for `duplicate`, `rejected` and `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestRequest {
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchIngestResponse {
    pub results: Vec<IngestResponse>,
}

/// Persisted event as returned by the read API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub dedup_key: String,
    pub source_id: String,
    pub external_id: String,
    pub sequence: i64,
    pub payload: Value,
    pub payload_digest: String,
    /// RFC 3339 timestamp assigned by the gateway.
    pub received_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventListResponse {
    pub items: Vec<EventBody>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// State of the breaker guarding cache calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Calls skipped while the circuit was open.
    pub rejected: u64,
    pub times_opened: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub persistence: ComponentHealth,
    pub cache: ComponentHealth,
    pub cache_circuit: CircuitStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub backend: String,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub sets: u64,
    pub claims_granted: u64,
    pub claims_denied: u64,
    pub evictions: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries: Option<u64>,
    pub circuit: CircuitStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResponse {
    pub removed: u64,
}
