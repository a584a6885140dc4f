//! Error taxonomy at the transport boundary.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a transport for a read or write request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not complete (connection, timeout, undecodable body).
    #[error("network failure: {message}")]
    Network {
        /// Diagnostic detail, not meant for end users.
        message: String,
    },

    /// The backend answered with an error status.
    #[error("server rejected request with status {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// `error` field of the response body, when present.
        error: Option<String>,
    },
}

impl TransportError {
    /// Build a [`TransportError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Build a [`TransportError::Rejected`].
    #[must_use]
    pub const fn rejected(status: u16, error: Option<String>) -> Self {
        Self::Rejected { status, error }
    }

    /// Rejection carrying a server message.
    pub fn rejected_with(status: u16, error: impl Into<String>) -> Self {
        Self::rejected(status, Some(error.into()))
    }

    /// Timeout after `limit`, treated as a network failure.
    #[must_use]
    pub fn timeout(limit: Duration) -> Self {
        Self::network(format!("request timed out after {} ms", limit.as_millis()))
    }

    /// HTTP status, when the backend answered.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::Network { .. } => None,
        }
    }

    /// Server-provided message, verbatim.
    #[must_use]
    pub fn server_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { error, .. } => error.as_deref(),
            Self::Network { .. } => None,
        }
    }
}

/// JSON error body returned by the backend: `{ "error": "..." }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable message.
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_exposes_status_and_message() {
        let err = TransportError::rejected_with(500, "qty must be positive");
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.server_message(), Some("qty must be positive"));
    }

    #[test]
    fn timeout_is_a_network_failure() {
        let err = TransportError::timeout(Duration::from_millis(250));
        assert_eq!(err.status(), None);
        assert!(err.to_string().contains("250 ms"));
    }

    #[test]
    fn payload_tolerates_missing_error_field() {
        let payload: ErrorPayload =
            serde_json::from_str(r#"{"detail": "x"}"#).unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(payload.error, None);
    }
}
