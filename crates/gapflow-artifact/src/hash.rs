//! Content hashing primitives
//!
//! [`ContentHash`] is the SHA-256 digest used for snapshot integrity and the
//! mutation log chain. [`stable_id`] derives the short content-addressed
//! identifiers used for graph nodes and edges.

use sha2::{Digest, Sha256};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Number of hex characters kept in a stable identifier.
pub const STABLE_ID_LEN: usize = 12;

/// A 32-byte SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The all-zero hash, used as the genesis link of a hash chain
    pub const ZERO: Self = Self([0; 32]);

    /// Wrap raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw digest
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash arbitrary bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Hash a sequence of fields, each terminated by a zero byte so that
    /// `["ab", "c"]` and `["a", "bc"]` never collide.
    #[must_use]
    pub fn compute_fields<I, B>(fields: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update(field.as_ref());
            hasher.update([0]);
        }
        Self(hasher.finalize().into())
    }

    /// Full lowercase hex encoding
    #[inline]
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a 64-character hex digest
    ///
    /// # Errors
    /// Returns error on malformed hex or wrong length
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(HashError::InvalidLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    #[inline]
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for ContentHash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Persisted documents always carry hashes as hex strings.
impl serde::Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Derive a stable identifier: the first 12 hex characters of the SHA-256
/// of `parts` joined with `|`.
///
/// ```
/// let id = gapflow_artifact::stable_id(&["endpoint", "GET", "users", "12"]);
/// assert_eq!(id.len(), 12);
/// ```
#[must_use]
pub fn stable_id(parts: &[&str]) -> String {
    let joined = parts.join("|");
    let digest = Sha256::digest(joined.as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(STABLE_ID_LEN);
    hex
}

/// Errors that can occur when working with content hashes
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hash length: expected {expected} bytes, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_matches_known_digest() {
        let hash = ContentHash::compute(b"");
        assert_eq!(
            hash.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn hex_roundtrip_and_display() {
        let hash = ContentHash::compute(b"gapflow");
        let parsed: ContentHash = hash.to_string().parse().unwrap();
        assert_eq!(parsed, hash);
    }

    #[test]
    fn from_hex_rejects_short_input() {
        let result = ContentHash::from_hex("abcd");
        assert!(matches!(
            result,
            Err(HashError::InvalidLength { expected: 32, actual: 2 })
        ));
    }

    #[test]
    fn field_hash_separates_boundaries() {
        let a = ContentHash::compute_fields(["ab", "c"]);
        let b = ContentHash::compute_fields(["a", "bc"]);
        assert_ne!(a, b);
    }

    #[test]
    fn stable_id_is_prefix_of_full_digest() {
        let id = stable_id(&["call", "GET", "users", "50"]);
        let full = ContentHash::compute(b"call|GET|users|50").to_hex();
        assert_eq!(id, &full[..STABLE_ID_LEN]);
    }

    #[test]
    fn serde_uses_hex_string() {
        let hash = ContentHash::compute(b"x");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash);
    }

    #[test]
    fn zero_hash() {
        assert!(ContentHash::ZERO.is_zero());
        assert!(!ContentHash::compute(b"x").is_zero());
    }
}
