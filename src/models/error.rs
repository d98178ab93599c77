//! Error types for shopscribe.
//!
//! Two layers:
//! - `GenerationError`: per-record failures of the description generator,
//!   classified transient or permanent. These never abort a batch.
//! - `ShopscribeError`: everything that terminates a run or an export.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Whether retrying a failed generation call can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit, timeout, network hiccup, 5xx
    Transient,
    /// Bad input, auth failure, other 4xx
    Permanent,
}

/// Failure of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    // ═══════════════════════════════════════════════════════════════════
    // TRANSIENT: expected to clear up on retry
    // ═══════════════════════════════════════════════════════════════════
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error (status {status}): {message}")]
    Server { status: u16, message: String },

    // ═══════════════════════════════════════════════════════════════════
    // PERMANENT: retrying will not resolve these
    // ═══════════════════════════════════════════════════════════════════
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl GenerationError {
    /// Classify the error for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_) | Self::Server { .. } => {
                ErrorClass::Transient
            }
            Self::Authentication(_)
            | Self::Rejected { .. }
            | Self::InvalidResponse(_)
            | Self::InvalidInput(_) => ErrorClass::Permanent,
        }
    }

    /// Check if this error is retryable.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// Server-provided hint for how long to wait, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Map an HTTP status and body to an error.
    ///
    /// 408, 429 and 5xx are transient; 401/403 are auth failures; any other
    /// non-success status is a permanent rejection.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            408 | 500..=599 => Self::Server { status, message },
            401 | 403 => Self::Authentication(message),
            _ => Self::Rejected { status, message },
        }
    }
}

/// Top-level error type for shopscribe.
#[derive(Debug, Error)]
pub enum ShopscribeError {
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Malformed input table {path}: {message}")]
    Format { path: PathBuf, message: String },

    #[error("Checkpoint I/O error: {context}")]
    CheckpointIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt checkpoint at line {line}: {message}")]
    CheckpointCorrupt { line: usize, message: String },

    #[error("Export failed: {context}")]
    ExportIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShopscribeError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn checkpoint_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::CheckpointIo {
            context: context.into(),
            source,
        }
    }

    pub fn export_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::ExportIo {
            context: context.into(),
            source,
        }
    }

    pub fn format(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }
}

/// Result type alias for shopscribe.
pub type Result<T> = std::result::Result<T, ShopscribeError>;
