//! Content digests used as cache keys.
//!
//! A [`Digest`] is the SHA-256 of a value's canonical encoding (see
//! [`codec`](crate::codec)). Memoized calls are keyed by the digest of a tagged
//! `(call site, argument)` pair, so equal arguments passed to different call
//! sites never share an entry.
//!
//! Collisions are not detected: two different inputs with the same digest would
//! share a stored entry. The probability is negligible for SHA-256 and the
//! stored format deliberately does not carry the original key.

use core::fmt;

use serde::Serialize;
use sha2::{Digest as _, Sha256};

use crate::codec;
use crate::error::CacheError;

/// Tagged digest input. The tag keeps a bare call-site identity from ever
/// hashing like an argument that happens to encode to the same bytes.
enum DigestInput<'a> {
    CallSite(&'a str),
    Call { site: &'a str, argument: &'a [u8] },
}

impl DigestInput<'_> {
    /// Tag byte, then each field as a little-endian `u64` length and its bytes.
    fn hash(&self) -> Digest {
        let mut hasher = Sha256::new();
        match self {
            DigestInput::CallSite(site) => {
                hasher.update([0u8]);
                update_field(&mut hasher, site.as_bytes());
            }
            DigestInput::Call { site, argument } => {
                hasher.update([1u8]);
                update_field(&mut hasher, site.as_bytes());
                update_field(&mut hasher, argument);
            }
        }
        Digest(hasher.finalize().into())
    }
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Fixed-length identity of a value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; Digest::LEN]);

impl Digest {
    /// Length of a digest in bytes.
    pub const LEN: usize = 32;

    /// Hashes raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Digest(Sha256::digest(bytes).into())
    }

    /// Digest of any serializable value.
    ///
    /// Fails with [`CacheError::Serialization`] if the value cannot be encoded.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, CacheError> {
        Ok(Self::from_bytes(&codec::encode(value)?))
    }

    /// Digest of a call site, identified by a stable name rather than by the
    /// closure that implements it.
    pub fn of_call_site(identity: &str) -> Self {
        DigestInput::CallSite(identity).hash()
    }

    /// Digest of one call: a call site plus its argument.
    pub fn of_call<K: Serialize + ?Sized>(identity: &str, argument: &K) -> Result<Self, CacheError> {
        let argument = codec::encode(argument)?;
        Ok(DigestInput::Call {
            site: identity,
            argument: &argument,
        }
        .hash())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; Digest::LEN] {
        &self.0
    }

    /// Lower-case hex rendering, safe for file names and table keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex rendering produced by [`to_hex`](Self::to_hex).
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut bytes = [0u8; Digest::LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Digest(bytes))
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}
