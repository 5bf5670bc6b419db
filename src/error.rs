//! Canonical error taxonomy for tool execution.
//!
//! Every failure path produces exactly one `CanonicalError`; no raw
//! transport error ever crosses the dispatcher boundary. Kind and
//! retryability are computed deterministically from the originating failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transport::{StatusCode, TransportError};

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, CanonicalError>;

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// No tool registered under the requested name.
    UnknownTool,
    /// Input or output failed structural validation against the declared schema.
    SchemaViolation,
    /// The caller's token bucket for this tool is empty.
    RateLimited,
    /// The endpoint's circuit breaker is open.
    CircuitOpen,
    /// Per-attempt timeout or overall deadline elapsed.
    Timeout,
    /// The backend could not be reached.
    TransportUnavailable,
    /// The backend reported the requested entity missing.
    NotFound,
    /// The backend is out of quota or capacity.
    ResourceExhausted,
    /// Anything unclassified.
    Internal,
}

impl ErrorKind {
    /// Fixed kind-to-retryability table.
    ///
    /// `CircuitOpen` and `RateLimited` are retryable for the caller's benefit
    /// (the condition clears with time) but are never retried inside the
    /// dispatch that produced them.
    pub fn retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::CircuitOpen
                | ErrorKind::Timeout
                | ErrorKind::TransportUnavailable
                | ErrorKind::ResourceExhausted
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::UnknownTool => "unknown_tool",
            ErrorKind::SchemaViolation => "schema_violation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportUnavailable => "transport_unavailable",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// The single error shape returned to callers.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CanonicalError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
    pub request_id: String,
    pub retryable: bool,
}

impl CanonicalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: Value::Null,
            timestamp: Utc::now(),
            request_id: request_id.into(),
            retryable: kind.retryable(),
        }
    }

    /// Attach structured details (validation violations, status payloads).
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Classify a raw transport failure into the taxonomy.
    ///
    /// The status code is the sole discriminant; unrecognized signals fall
    /// back to `Internal`.
    pub fn from_transport(err: &TransportError, request_id: &str) -> Self {
        let kind = match err.status {
            StatusCode::Unavailable => ErrorKind::TransportUnavailable,
            StatusCode::DeadlineExceeded => ErrorKind::Timeout,
            StatusCode::NotFound => ErrorKind::NotFound,
            StatusCode::ResourceExhausted => ErrorKind::ResourceExhausted,
            StatusCode::InvalidArgument => ErrorKind::SchemaViolation,
            StatusCode::Internal | StatusCode::Unknown => ErrorKind::Internal,
        };
        Self::new(kind, err.message.clone(), request_id)
            .with_details(serde_json::json!({ "status": err.status.to_string() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn retryable_table_is_fixed() {
        assert!(ErrorKind::TransportUnavailable.retryable());
        assert!(ErrorKind::Timeout.retryable());
        assert!(ErrorKind::ResourceExhausted.retryable());
        assert!(ErrorKind::RateLimited.retryable());
        assert!(ErrorKind::CircuitOpen.retryable());

        assert!(!ErrorKind::UnknownTool.retryable());
        assert!(!ErrorKind::SchemaViolation.retryable());
        assert!(!ErrorKind::NotFound.retryable());
        assert!(!ErrorKind::Internal.retryable());
    }

    #[test]
    fn transport_classification_by_status() {
        let cases = [
            (StatusCode::Unavailable, ErrorKind::TransportUnavailable),
            (StatusCode::DeadlineExceeded, ErrorKind::Timeout),
            (StatusCode::NotFound, ErrorKind::NotFound),
            (StatusCode::ResourceExhausted, ErrorKind::ResourceExhausted),
            (StatusCode::InvalidArgument, ErrorKind::SchemaViolation),
            (StatusCode::Internal, ErrorKind::Internal),
            (StatusCode::Unknown, ErrorKind::Internal),
        ];
        for (status, kind) in cases {
            let raw = TransportError::new(status, "boom");
            let err = CanonicalError::from_transport(&raw, "req-1");
            assert_eq!(err.kind, kind);
            assert_eq!(err.retryable, kind.retryable());
            assert_eq!(err.request_id, "req-1");
        }
    }

    #[test]
    fn error_display() {
        let err = CanonicalError::new(ErrorKind::UnknownTool, "no tool named search", "req-2");
        assert_eq!(err.to_string(), "unknown_tool: no tool named search");
    }

    #[test]
    fn serializes_to_wire_payload() {
        let err = CanonicalError::new(ErrorKind::RateLimited, "bucket empty", "req-3");
        let payload = serde_json::to_value(&err).unwrap();
        assert_eq!(payload["kind"], "rate_limited");
        assert_eq!(payload["retryable"], true);
        assert_eq!(payload["request_id"], "req-3");
        assert!(payload.get("details").is_none());
    }
}
