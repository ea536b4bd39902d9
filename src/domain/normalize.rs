//! Turns loosely-typed feed records into canonical [`EventRecord`]s.
//!
//! The dedup key is a SHA-256 over the event's identity fields, each length-prefixed so
//! that `("ab", "c")` and `("a", "bc")` never collide. When edits are treated as new
//! events the payload digest joins the identity.

use serde_json::Value;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::error::ValidationError;
use super::events::{DedupKey, EventRecord, RawEvent};

const KEY_VERSION: &str = "v1";
const MAX_ID_LEN: usize = 255;

pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizerConfig {
    pub max_payload_bytes: usize,
    /// Include the payload digest in the dedup key, so an edited payload is a new event.
    pub treat_edits_as_new_events: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            treat_edits_as_new_events: false,
        }
    }
}

/// Pure and deterministic: the same raw event always yields the same key and digest.
#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    config: NormalizerConfig,
}

impl EventNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    pub fn normalize(&self, raw: RawEvent) -> Result<EventRecord, ValidationError> {
        self.normalize_at(raw, OffsetDateTime::now_utc())
    }

    pub fn normalize_at(
        &self,
        mut raw: RawEvent,
        received_at: OffsetDateTime,
    ) -> Result<EventRecord, ValidationError> {
        let received_at = truncate_to_micros(received_at);
        let source_id = identity_field(&raw, "source_id")?;
        let external_id = identity_field(&raw, "external_id")?;

        let payload = raw.take("payload").unwrap_or(Value::Null);
        let canonical = serde_json::to_vec(&payload)
            .map_err(|err| ValidationError::invalid("payload", err.to_string()))?;
        if canonical.len() > self.config.max_payload_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: canonical.len(),
                limit: self.config.max_payload_bytes,
            });
        }
        let payload_digest = sha256_hex(&canonical);

        let sequence = resolve_sequence(raw.get("sequence"), &external_id, received_at)?;

        let digest_part = self
            .config
            .treat_edits_as_new_events
            .then_some(payload_digest.as_str());
        let dedup_key = compute_dedup_key(&source_id, &external_id, digest_part);

        Ok(EventRecord {
            dedup_key,
            source_id,
            external_id,
            sequence,
            payload,
            payload_digest,
            received_at,
        })
    }
}

/// Persistence stores microseconds; records carry the same precision everywhere.
fn truncate_to_micros(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_nanosecond(at.nanosecond() / 1_000 * 1_000)
        .unwrap_or(at)
}

pub fn compute_dedup_key(source_id: &str, external_id: &str, digest: Option<&str>) -> DedupKey {
    let mut hasher = Sha256::new();
    for part in [Some(KEY_VERSION), Some(source_id), Some(external_id), digest]
        .into_iter()
        .flatten()
    {
        hasher.update((part.len() as u64).to_be_bytes());
        hasher.update(part.as_bytes());
    }
    DedupKey::new(hex::encode(hasher.finalize()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Accepts non-empty strings and integers; integers are rendered in decimal.
fn identity_field(raw: &RawEvent, field: &'static str) -> Result<String, ValidationError> {
    let value = match raw.get(field) {
        None | Some(Value::Null) => return Err(ValidationError::missing(field)),
        Some(Value::String(text)) => text.trim().to_string(),
        Some(Value::Number(number)) if number.is_i64() || number.is_u64() => number.to_string(),
        Some(_) => {
            return Err(ValidationError::invalid(
                field,
                "expected a string or an integer",
            ));
        }
    };

    if value.is_empty() {
        return Err(ValidationError::missing(field));
    }
    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::invalid(
            field,
            format!("longer than {MAX_ID_LEN} bytes"),
        ));
    }
    Ok(value)
}

/// Explicit `sequence`, then a numeric `external_id`, then receive time in microseconds.
fn resolve_sequence(
    explicit: Option<&Value>,
    external_id: &str,
    received_at: OffsetDateTime,
) -> Result<i64, ValidationError> {
    match explicit {
        None | Some(Value::Null) => {}
        Some(Value::Number(number)) => {
            let sequence = number
                .as_i64()
                .ok_or_else(|| ValidationError::invalid("sequence", "expected an integer"))?;
            return non_negative(sequence);
        }
        Some(Value::String(text)) => {
            let sequence = text
                .trim()
                .parse::<i64>()
                .map_err(|_| ValidationError::invalid("sequence", "expected an integer"))?;
            return non_negative(sequence);
        }
        Some(_) => return Err(ValidationError::invalid("sequence", "expected an integer")),
    }

    if let Ok(sequence) = external_id.parse::<i64>()
        && sequence >= 0
    {
        return Ok(sequence);
    }

    let micros = received_at.unix_timestamp_nanos() / 1_000;
    Ok(i64::try_from(micros).unwrap_or(i64::MAX))
}

fn non_negative(sequence: i64) -> Result<i64, ValidationError> {
    if sequence < 0 {
        return Err(ValidationError::invalid("sequence", "must not be negative"));
    }
    Ok(sequence)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn raw(value: Value) -> RawEvent {
        RawEvent::from_value(value).expect("object")
    }

    fn at() -> OffsetDateTime {
        datetime!(2024-05-01 12:00:00 UTC)
    }

    #[test]
    fn same_identity_yields_same_key() {
        let normalizer = EventNormalizer::default();
        let first = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e-1", "payload": {"a": 1}})), at())
            .unwrap();
        let second = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e-1", "payload": {"a": 2}})), at())
            .unwrap();

        assert_eq!(first.dedup_key, second.dedup_key);
        assert_ne!(first.payload_digest, second.payload_digest);
    }

    #[test]
    fn edits_become_new_events_when_configured() {
        let normalizer = EventNormalizer::new(NormalizerConfig {
            treat_edits_as_new_events: true,
            ..NormalizerConfig::default()
        });
        let first = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e-1", "payload": {"a": 1}})), at())
            .unwrap();
        let second = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e-1", "payload": {"a": 2}})), at())
            .unwrap();

        assert_ne!(first.dedup_key, second.dedup_key);
    }

    #[test]
    fn identity_parts_are_length_prefixed() {
        assert_ne!(
            compute_dedup_key("ab", "c", None),
            compute_dedup_key("a", "bc", None)
        );
    }

    #[test]
    fn payload_key_order_does_not_change_digest() {
        let normalizer = EventNormalizer::default();
        let first = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "1", "payload": {"a": 1, "b": 2}})), at())
            .unwrap();
        let second = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "1", "payload": {"b": 2, "a": 1}})), at())
            .unwrap();

        assert_eq!(first.payload_digest, second.payload_digest);
    }

    #[test]
    fn missing_identity_is_rejected() {
        let normalizer = EventNormalizer::default();
        let err = normalizer
            .normalize_at(raw(json!({"external_id": "e"})), at())
            .unwrap_err();
        assert_eq!(err.code(), "missing_source_id");

        let err = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "   "})), at())
            .unwrap_err();
        assert_eq!(err.code(), "missing_external_id");
    }

    #[test]
    fn non_scalar_identity_is_invalid() {
        let err = EventNormalizer::default()
            .normalize_at(raw(json!({"source_id": ["s"], "external_id": "e"})), at())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_field");
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let normalizer = EventNormalizer::new(NormalizerConfig {
            max_payload_bytes: 8,
            ..NormalizerConfig::default()
        });
        let err = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e", "payload": "0123456789"})), at())
            .unwrap_err();
        assert!(matches!(err, ValidationError::PayloadTooLarge { limit: 8, .. }));
    }

    #[test]
    fn sequence_prefers_explicit_then_numeric_external_id() {
        let normalizer = EventNormalizer::default();
        let explicit = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "42", "sequence": "7"})), at())
            .unwrap();
        assert_eq!(explicit.sequence, 7);

        let numeric = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": 42})), at())
            .unwrap();
        assert_eq!(numeric.sequence, 42);
        assert_eq!(numeric.external_id, "42");

        let fallback = normalizer
            .normalize_at(raw(json!({"source_id": "s", "external_id": "msg-a"})), at())
            .unwrap();
        assert_eq!(
            i128::from(fallback.sequence),
            at().unix_timestamp_nanos() / 1_000
        );
    }

    #[test]
    fn negative_sequence_is_invalid() {
        let err = EventNormalizer::default()
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e", "sequence": -1})), at())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_field");
    }

    #[test]
    fn missing_payload_normalizes_to_null() {
        let record = EventNormalizer::default()
            .normalize_at(raw(json!({"source_id": "s", "external_id": "e"})), at())
            .unwrap();
        assert_eq!(record.payload, Value::Null);
        assert_eq!(record.received_at, at());
    }

    #[test]
    fn received_at_is_truncated_to_microseconds() {
        let record = EventNormalizer::default()
            .normalize_at(
                raw(json!({"source_id": "s", "external_id": "e", "sequence": 1})),
                datetime!(2024-05-01 12:00:00.123456789 UTC),
            )
            .unwrap();
        assert_eq!(record.received_at.nanosecond(), 123_456_000);
        assert_eq!(record.received_at, datetime!(2024-05-01 12:00:00.123456 UTC));
    }
}
