//! Error types for loft-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for loft-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for loft-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file or credential error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid path or prefix
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Credential profile not found
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Bucket or key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Credentials rejected or operation not permitted
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Store asked us to slow down (retryable)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Connectivity or service failure, not retried further
    #[error("Remote error: {0}")]
    Remote(String),

    /// Upload source file is missing
    #[error("Local file not found for upload: {0}")]
    SourceMissing(String),

    /// Download returned success but nothing is on disk
    #[error("Download finished but file not found on disk: {0}")]
    VerificationFailed(String),

    /// Transfer stopped by cooperative cancellation
    #[error("Transfer cancelled")]
    Cancelled,

    /// Batch deletion stopped part way
    #[error("{0}")]
    PartialBatch(BatchFailure),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Whether the gateway should retry the call that produced this error
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited(_))
    }

    /// Get the appropriate exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) | Error::Config(_) | Error::InvalidUrl(_) => 2, // UsageError
            Error::Remote(_) | Error::RateLimited(_) => 3,                      // NetworkError
            Error::AccessDenied(_) => 4,                                        // AuthError
            Error::NotFound(_) | Error::ProfileNotFound(_) => 5,                // NotFound
            Error::SourceMissing(_) => 5,                                       // NotFound
            Error::PartialBatch(_) => 6,                                        // PartialFailure
            Error::Cancelled => 130,                                            // Interrupted
            _ => 1,                                                             // GeneralError
        }
    }
}

/// A multi-key deletion that stopped at a failing chunk.
///
/// Chunks before `failed_chunk` were confirmed deleted; `remaining` holds
/// every key from the failing chunk onwards that was not confirmed, so the
/// caller can retry exactly those.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    /// Zero-based index of the chunk that failed
    pub failed_chunk: usize,

    /// Keys confirmed deleted before the failure
    pub deleted: Vec<String>,

    /// Keys not confirmed deleted
    pub remaining: Vec<String>,

    /// Underlying cause
    pub reason: String,
}

impl std::fmt::Display for BatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Batch {} failed ({} deleted, {} remaining): {}",
            self.failed_chunk + 1,
            self.deleted.len(),
            self.remaining.len(),
            self.reason
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_exit_codes() {
        assert_eq!(Error::InvalidPath("test".into()).exit_code(), 2);
        assert_eq!(Error::Config("test".into()).exit_code(), 2);
        assert_eq!(Error::Remote("test".into()).exit_code(), 3);
        assert_eq!(Error::RateLimited("test".into()).exit_code(), 3);
        assert_eq!(Error::AccessDenied("test".into()).exit_code(), 4);
        assert_eq!(Error::NotFound("test".into()).exit_code(), 5);
        assert_eq!(Error::ProfileNotFound("test".into()).exit_code(), 5);
        assert_eq!(Error::Cancelled.exit_code(), 130);
        assert_eq!(Error::General("test".into()).exit_code(), 1);
    }

    #[test]
    fn test_only_rate_limit_is_retryable() {
        assert!(Error::RateLimited("slow down".into()).is_retryable());
        assert!(!Error::Remote("reset".into()).is_retryable());
        assert!(!Error::NotFound("k".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }

    #[test]
    fn test_batch_failure_display() {
        let err = Error::PartialBatch(BatchFailure {
            failed_chunk: 1,
            deleted: vec!["a".into()],
            remaining: vec!["b".into(), "c".into()],
            reason: "boom".into(),
        });
        assert_eq!(
            err.to_string(),
            "Batch 2 failed (1 deleted, 2 remaining): boom"
        );
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_error_display() {
        let err = Error::ProfileNotFound("work".into());
        assert_eq!(err.to_string(), "Profile not found: work");

        let err = Error::SourceMissing("/tmp/x".into());
        assert_eq!(err.to_string(), "Local file not found for upload: /tmp/x");
    }
}
