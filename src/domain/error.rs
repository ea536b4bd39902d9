use thiserror::Error;

/// Client-correctable problems with an inbound event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("event must be a JSON object")]
    Malformed,
    #[error("required field `{field}` is missing or empty")]
    MissingField { field: &'static str },
    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("payload is {size} bytes, limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl ValidationError {
    pub fn missing(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::Malformed => "malformed_event",
            ValidationError::MissingField { field: "source_id" } => "missing_source_id",
            ValidationError::MissingField { field: "external_id" } => "missing_external_id",
            ValidationError::MissingField { .. } => "missing_field",
            ValidationError::InvalidField { .. } => "invalid_field",
            ValidationError::PayloadTooLarge { .. } => "payload_too_large",
        }
    }
}
