//! Unified error types for the imgd cache engine.
//!
//! `NotFound` is the only "absent" signal a storage backend may return; every
//! other variant is a real failure that callers log and count.

use tokio_rusqlite::rusqlite;

/// Unified error type for caches, storage backends and record codecs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key is absent from the backend (cache miss).
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// Key is tracked but has no expiry.
    #[error("NO_EXPIRY: {0}")]
    NoExpiry(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid input parameters.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Input is neither a valid username nor a valid UUID.
    #[error("INVALID_IDENTIFIER: {0}")]
    InvalidIdentifier(String),

    /// A stored record could not be decoded.
    #[error("DECODE_ERROR: {0}")]
    Decode(String),

    /// The caller's deadline expired before a result was ready.
    #[error("CANCELLED: {0}")]
    Cancelled(String),

    /// The cache or backend has been closed.
    #[error("CLOSED: {0}")]
    Closed(String),

    /// One or more tiers of a tiered cache failed.
    #[error("TIERED_ERROR: {}", .0.join("; "))]
    Tiered(Vec<String>),
}

impl Error {
    /// True for the cache-miss sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("abc123".to_string());
        assert!(err.to_string().contains("NOT_FOUND"));
        assert!(err.to_string().contains("abc123"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::NotFound("k".into()).is_not_found());
        assert!(!Error::NoExpiry("k".into()).is_not_found());
        assert!(!Error::Decode("bad".into()).is_not_found());
    }

    #[test]
    fn test_tiered_display_joins_causes() {
        let err = Error::Tiered(vec!["tier 0: boom".into(), "tier 1: bang".into()]);
        assert_eq!(err.to_string(), "TIERED_ERROR: tier 0: boom; tier 1: bang");
    }

    #[test]
    fn test_rusqlite_error_converts_to_database() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Database(_)));
    }
}
