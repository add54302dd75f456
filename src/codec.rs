//! Deterministic value encoding.
//!
//! All bytes that leave the process (digest input and stored payloads) go
//! through `bincode` with its standard configuration. The encoding has no
//! randomness and no map reordering of its own, so equal values encode to equal
//! bytes as long as their `Serialize` impls are deterministic.
//!
//! # Payload layout
//!
//! A stored payload is the encoding of [`CachedResult`]: a variant tag followed
//! by either the value or an [`ErrorDescriptor`]. One exception: a zero-length
//! payload means "cached null". Values whose own encoding is empty (such as
//! `()`) or is the null encoding (such as `None`) are stored that way, and a
//! zero-length payload decodes from the empty input or, failing that, from the
//! null encoding.

use core::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Encoding of `None` (and of every other value that encodes as one zero byte).
const NULL_ENCODING: [u8; 1] = [0];

/// Encodes `value` into its canonical byte form.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })
}

/// Decodes a value from `bytes`, rejecting trailing data.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    let (value, read) =
        bincode::serde::decode_from_slice::<T, _>(bytes, bincode::config::standard()).map_err(
            |e| CacheError::Serialization {
                reason: e.to_string(),
            },
        )?;
    if read != bytes.len() {
        return Err(CacheError::Serialization {
            reason: format!("{} trailing bytes after value", bytes.len() - read),
        });
    }
    Ok(value)
}

/// Portable description of a provider failure.
///
/// This is what gets persisted when a memoizer remembers a failure. It carries
/// a type tag and a message, enough for [`Remember::replay`] to rebuild a
/// representative error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    /// Identifies the kind of error (typically a type or variant name).
    pub kind: String,
    /// Human-readable message.
    pub message: String,
}

impl ErrorDescriptor {
    /// Creates a descriptor.
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ErrorDescriptor {}

/// Provider errors that can be persisted and replayed.
///
/// `replay(describe(e))` should produce an error that callers treat the same
/// way as `e` (same variant, same message).
pub trait Remember: Sized {
    /// Describes this error for storage.
    fn describe(&self) -> ErrorDescriptor;

    /// Rebuilds an error from a stored description.
    fn replay(descriptor: ErrorDescriptor) -> Self;
}

impl Remember for ErrorDescriptor {
    fn describe(&self) -> ErrorDescriptor {
        self.clone()
    }

    fn replay(descriptor: ErrorDescriptor) -> Self {
        descriptor
    }
}

impl Remember for String {
    fn describe(&self) -> ErrorDescriptor {
        ErrorDescriptor::new("String", self.as_str())
    }

    fn replay(descriptor: ErrorDescriptor) -> Self {
        descriptor.message
    }
}

impl Remember for Box<dyn std::error::Error + Send + Sync> {
    fn describe(&self) -> ErrorDescriptor {
        ErrorDescriptor::new("error", self.to_string())
    }

    fn replay(descriptor: ErrorDescriptor) -> Self {
        Box::new(descriptor)
    }
}

/// What a memoizer stores for one call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedResult<V> {
    /// The provider returned a value.
    Value(V),
    /// The provider failed.
    Failure(ErrorDescriptor),
}

/// Borrowing twin of [`CachedResult`]; encodes to identical bytes.
#[derive(Serialize)]
enum CachedResultRef<'a, V> {
    Value(&'a V),
    Failure(&'a ErrorDescriptor),
}

/// Encodes a successful result as a payload.
pub(crate) fn encode_value<V: Serialize>(value: &V) -> Result<Vec<u8>, CacheError> {
    let bytes = encode(value)?;
    if bytes.is_empty() || bytes == NULL_ENCODING {
        return Ok(Vec::new());
    }
    encode(&CachedResultRef::Value(value))
}

/// Encodes a remembered failure as a payload.
pub(crate) fn encode_failure(descriptor: &ErrorDescriptor) -> Result<Vec<u8>, CacheError> {
    encode(&CachedResultRef::<()>::Failure(descriptor))
}

/// Decodes a stored payload.
pub(crate) fn decode_payload<V: DeserializeOwned>(
    bytes: &[u8],
) -> Result<CachedResult<V>, CacheError> {
    if bytes.is_empty() {
        return decode::<V>(bytes)
            .or_else(|_| decode::<V>(&NULL_ENCODING))
            .map(CachedResult::Value);
    }
    decode(bytes)
}
