//! Error types for transport construction.

use thiserror::Error;

/// Errors raised while building a transport.
#[derive(Error, Debug)]
pub enum SetupError {
    /// Base URL is empty or not an absolute http(s) URL.
    #[error("invalid base url: {0}")]
    InvalidBaseUrl(String),

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
