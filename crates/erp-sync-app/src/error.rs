//! Error types shared by the cache components.

use erp_sync_core::{CacheKey, TransportError};
use thiserror::Error;

/// Violations of the entry store's bookkeeping contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Another mutation already holds the snapshot for this key.
    #[error("a mutation snapshot is already held for key {0}")]
    SnapshotHeld(CacheKey),
}

/// Failure of the last read for a key, kept on the entry until the next
/// successful read or optimistic write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ReadError {
    /// HTTP status when the backend answered.
    pub status: Option<u16>,
    /// Server message, or the transport's diagnostic text.
    pub message: String,
}

impl ReadError {
    /// Build a read error from a message.
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<&TransportError> for ReadError {
    fn from(err: &TransportError) -> Self {
        let message = err
            .server_message()
            .map_or_else(|| err.to_string(), str::to_owned);
        Self::new(err.status(), message)
    }
}

impl From<TransportError> for ReadError {
    fn from(err: TransportError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_prefers_server_message() {
        let err = ReadError::from(TransportError::rejected_with(403, "forbidden"));
        assert_eq!(err.status, Some(403));
        assert_eq!(err.to_string(), "forbidden");

        let net = ReadError::from(TransportError::network("connection refused"));
        assert_eq!(net.status, None);
        assert!(net.message.contains("connection refused"));
    }
}
