//! Error types for the AnchorView environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Clone, Error)]
pub enum EnvError {
    /// Transport failure (connection refused, DNS, broken stream, ...)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The server answered with a non-success status
    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The URL scheme has no transport behind it
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// Local file access failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation timed out
    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

impl EnvError {
    /// Creates a network error.
    pub fn network(msg: impl Into<String>) -> Self {
        Self::NetworkError(msg.into())
    }

    /// Creates an I/O error.
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }
}
