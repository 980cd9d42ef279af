//! Cryptographic hash type using Blake3.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte Blake3 digest.
///
/// Header hashes, miniblock hashes and alarm identifiers are all derived
/// from this type, so it is `Copy` and safe to use as a map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hash([u8; 32]);

impl Hash {
    /// Size of hash in bytes.
    pub const BYTES: usize = 32;

    /// Zero hash (all bytes are 0x00).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Hash arbitrary bytes with Blake3.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hash = blake3::hash(bytes);
        Self(*hash.as_bytes())
    }

    /// Wrap raw digest bytes without hashing them.
    ///
    /// Returns `None` unless `bytes` is exactly [`Hash::BYTES`] long.
    pub fn from_hash_bytes(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Hash several byte slices as one continuous input.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for part in parts {
            hasher.update(part);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Parse hash from hex string.
    pub fn from_hex(hex: &str) -> Result<Self, HexError> {
        if hex.len() != 64 {
            return Err(HexError::InvalidLength {
                expected: 64,
                actual: hex.len(),
            });
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex, &mut bytes).map_err(|_| HexError::InvalidHex)?;

        Ok(Self(bytes))
    }

    /// Convert hash to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Get bytes as slice reference.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to an owned byte vector (the form carried in consensus messages).
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "Hash({}..{})", &hex[..8], &hex[56..])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Errors that can occur when parsing hex strings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    /// Invalid hex string length.
    #[error("Invalid hex length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Invalid hex characters.
    #[error("Invalid hex string")]
    InvalidHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = Hash::from_bytes(b"header");
        let b = Hash::from_bytes(b"header");
        assert_eq!(a, b);
        assert_ne!(a, Hash::from_bytes(b"other header"));
    }

    #[test]
    fn test_from_parts_matches_concatenation() {
        let joined = Hash::from_bytes(b"roundseed");
        let parts = Hash::from_parts(&[b"round", b"seed"]);
        assert_eq!(joined, parts);
    }

    #[test]
    fn test_hex_roundtrip_and_errors() {
        let hash = Hash::from_bytes(b"alarm");
        assert_eq!(Hash::from_hex(&hash.to_hex()), Ok(hash));

        assert_eq!(
            Hash::from_hex("abcd"),
            Err(HexError::InvalidLength {
                expected: 64,
                actual: 4
            })
        );
        assert_eq!(Hash::from_hex(&"zz".repeat(32)), Err(HexError::InvalidHex));
    }

    #[test]
    fn test_from_hash_bytes_requires_exact_length() {
        let hash = Hash::from_bytes(b"x");
        assert_eq!(Hash::from_hash_bytes(hash.as_bytes()), Some(hash));
        assert_eq!(Hash::from_hash_bytes(&[1u8; 31]), None);
        assert_eq!(Hash::from_hash_bytes(&[1u8; 33]), None);
    }
}
