//! Error types for agentlink operations.
//!
//! One crate-wide taxonomy: handshake and send-path failures reject the
//! calling future with one of these variants, reconnection failures stay
//! internal until the retry budget is spent. Messages on the cryptographic
//! variants are deliberately vague; detailed verifier output never leaves
//! this crate.

use thiserror::Error;

/// Core error type for agentlink operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing credentials at handshake time. Never retried by
    /// the subsystem.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Transport unavailable, dial failure, or an operation that requires a
    /// live connection attempted without one.
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed message or frame: missing required fields, unknown event
    /// type, invalid JSON. The offending data is dropped, never retried.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Signature verification failed on an inbound envelope. The envelope is
    /// discarded without attempting decryption.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Key derivation or an encryption/decryption primitive failed.
    #[error("cryptographic operation failed: {0}")]
    Encryption(String),

    /// The persistence collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// A deadline elapsed before the operation completed.
    #[error("operation timed out")]
    Timeout,
}

/// Result type alias using the crate error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for failures that must be surfaced as security events (logged,
    /// counted, never silently swallowed or retried).
    pub fn is_security_event(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }

    /// True for failures the reconnection phase may retry. Nothing else in
    /// the crate retries automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Timeout)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Protocol(format!("invalid JSON structure: {err}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
