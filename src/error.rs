//! Error types for bundle-mirror
//!
//! Errors are split by how far they are allowed to propagate:
//! - [`Error`] - run-level failures (configuration, authentication, catalog
//!   listing, unreadable state). These abort the run before any side effect.
//! - [`CatalogError`] - failures at the remote catalog seam. Only
//!   [`CatalogError::AuthRejected`] escalates; the rest skip a single order.
//! - [`ItemError`] - per-item pipeline failures. These never abort the run and
//!   are surfaced once in the final summary.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bundle-mirror operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bundle-mirror
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "session_cookie")
        key: Option<String>,
    },

    /// The remote catalog rejected the session credential
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Catalog listing failed as a whole
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Persisted record exists but cannot be read or written
    #[error("state record {path}: {reason}")]
    State {
        /// The record file involved
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The run was interrupted before it could finish
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Errors raised by a [`CatalogClient`](crate::catalog::CatalogClient)
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The response body was not JSON, or did not match the expected schema
    #[error("malformed response from {url}: {reason}")]
    Malformed {
        /// The endpoint that produced the response
        url: String,
        /// Decoder message
        reason: String,
    },

    /// Transport failure (DNS, connect, timeout, reset, 5xx)
    #[error("network failure for {url}: {reason}")]
    Network {
        /// The endpoint that failed
        url: String,
        /// Transport message
        reason: String,
        /// Whether the failure looks transient (timeout, connect, 5xx)
        transient: bool,
    },

    /// The session credential was refused (HTTP 401/403)
    #[error("session rejected by {url} (HTTP {status})")]
    AuthRejected {
        /// The endpoint that refused the credential
        url: String,
        /// HTTP status code
        status: u16,
    },
}

/// Per-item pipeline failure
#[derive(Debug, Error)]
pub enum ItemError {
    /// Declared transfer length does not match the catalog size
    #[error("size mismatch: expected {expected} bytes, server declared {declared:?}")]
    SizeMismatch {
        /// Size recorded in the catalog
        expected: u64,
        /// `Content-Length` of the response, if any
        declared: Option<u64>,
    },

    /// Transfer ended with a different byte count than expected
    #[error("incomplete transfer: expected {expected} bytes, received {received}")]
    Incomplete {
        /// Size recorded in the catalog
        expected: u64,
        /// Bytes actually written
        received: u64,
    },

    /// Content hash of the received bytes does not match the catalog
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// MD5 recorded in the catalog
        expected: String,
        /// MD5 of the received bytes
        actual: String,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} from server")]
    Status {
        /// HTTP status code
        status: u16,
    },

    /// Transport failure
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// No data arrived within the idle timeout
    #[error("transfer stalled for {0:?}")]
    Timeout(std::time::Duration),

    /// Filesystem error at the target path (often an over-long path)
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// Path being created, written or removed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled while this item was in flight
    #[error("cancelled")]
    Cancelled,
}

impl ItemError {
    /// Wrap an I/O error with the path it happened at
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ItemError::Filesystem {
            path: path.into(),
            source,
        }
    }
}
