//! Error types for cache operations.

use std::path::PathBuf;

/// Errors raised by the digest, codec and storage layers.
///
/// Inside the memoizer most of these are fail-safe: backend and corruption
/// errors become cache misses (on read) or are logged and dropped (on write).
/// Only serialization errors reach the caller, through
/// [`MemoError::Serialization`].
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while reading or writing an entry file.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// The path that caused the error.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The table backend reported an error.
    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A key or value could not be converted to or from bytes.
    #[error("serialization error: {reason}")]
    Serialization {
        /// Description of the serialization failure.
        reason: String,
    },

    /// A stored payload could not be decoded.
    #[error("corrupt cache entry {key}: {reason}")]
    Corrupt {
        /// Digest string of the entry.
        key: String,
        /// Description of the decode failure.
        reason: String,
    },

    /// A store key contained characters the backend cannot address.
    #[error("invalid cache key {key:?}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// A configuration value was rejected.
    #[error("invalid cache configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with it.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}

/// The error returned by [`Memoizer::get_or_compute`](crate::Memoizer::get_or_compute).
///
/// Provider failures come back untouched in [`MemoError::Provider`], whether
/// the provider just failed or a remembered failure is being replayed, so
/// callers can match on their own error type.
#[derive(Debug, thiserror::Error)]
pub enum MemoError<E> {
    /// The provider failed (now, or on an earlier remembered call).
    #[error("provider failed: {0}")]
    Provider(E),

    /// The argument or the result could not be serialized.
    #[error(transparent)]
    Serialization(CacheError),
}

impl<E> MemoError<E> {
    /// Returns the provider error, if this is one.
    pub fn into_provider(self) -> Option<E> {
        match self {
            MemoError::Provider(err) => Some(err),
            MemoError::Serialization(_) => None,
        }
    }

    /// Returns `true` if the provider failed.
    pub fn is_provider(&self) -> bool {
        matches!(self, MemoError::Provider(_))
    }
}
