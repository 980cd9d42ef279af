//! Bitmap of committee members that contributed to an aggregate signature.

use serde::{Deserialize, Serialize};

/// A compact bitfield indexed by consensus-group position.
///
/// The final-info message carries this as its public-key bitmap; its byte
/// length is always `ceil(group_size / 8)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerBitfield {
    /// The bitfield bytes.
    bits: Vec<u8>,
    /// Number of committee members (bits that are valid).
    num_members: usize,
}

impl SignerBitfield {
    /// Create a new empty bitfield for the given group size.
    pub fn new(num_members: usize) -> Self {
        Self {
            bits: vec![0u8; Self::byte_len(num_members)],
            num_members,
        }
    }

    /// Number of bytes needed to cover `num_members` bits.
    pub fn byte_len(num_members: usize) -> usize {
        num_members.div_ceil(8)
    }

    /// Rebuild a bitfield from wire bytes.
    ///
    /// Returns `None` when the byte length does not match the group size.
    pub fn from_bytes(bytes: &[u8], num_members: usize) -> Option<Self> {
        if bytes.len() != Self::byte_len(num_members) {
            return None;
        }
        Some(Self {
            bits: bytes.to_vec(),
            num_members,
        })
    }

    /// Set a bit (mark member as having signed).
    pub fn set(&mut self, index: usize) {
        if index < self.num_members {
            self.bits[index / 8] |= 1 << (index % 8);
        }
    }

    /// Check if a bit is set.
    pub fn is_set(&self, index: usize) -> bool {
        if index >= self.num_members {
            return false;
        }
        match self.bits.get(index / 8) {
            Some(byte) => (byte >> (index % 8)) & 1 == 1,
            None => false,
        }
    }

    /// Count the number of set bits.
    pub fn count(&self) -> usize {
        self.set_indices().count()
    }

    /// Get iterator over indices of set bits.
    pub fn set_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.num_members).filter(|&i| self.is_set(i))
    }

    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }
}
