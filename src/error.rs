//! Error types for media-dl
//!
//! Errors raised inside a download pipeline never reach the caller: they are
//! classified with [`Error::failure_reason`] and turned into a `Failed` job
//! snapshot at the pipeline boundary.

use crate::types::FailureReason;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "update_interval")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus {
        /// Requested URL
        url: String,
        /// Status code returned by the server
        status: u16,
    },

    /// Video URL resolution failed
    #[error("could not resolve video URL: {0}")]
    Resolve(String),

    /// Fetch reported by an external fetch mechanism
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Storage access denied
    #[error("permission denied: {}", path.display())]
    PermissionDenied {
        /// Path that could not be accessed
        path: PathBuf,
    },

    /// URL could not be parsed or has no usable form
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The downloader's control loop has stopped
    #[error("shutdown in progress: not accepting requests")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error for a `Failed` job snapshot
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Error::Network(_)
            | Error::HttpStatus { .. }
            | Error::Resolve(_)
            | Error::Fetch(_)
            | Error::InvalidUrl(_) => FailureReason::Fetch,
            Error::PermissionDenied { .. } => FailureReason::Permission,
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                FailureReason::Permission
            }
            Error::Io(_) => FailureReason::Storage,
            Error::Config { .. } | Error::ShuttingDown | Error::Other(_) => {
                FailureReason::Internal
            }
        }
    }
}
