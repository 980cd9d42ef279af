//! Domain-specific identifier types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Shard identifier.
///
/// Regular shards are numbered from zero. Two reserved values exist: the
/// metachain, which notarizes shard headers, and the "all shards" pseudo
/// shard used for topics every shard listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(pub u32);

impl ShardId {
    /// The metachain shard.
    pub const METACHAIN: Self = ShardId(u32::MAX);

    /// Pseudo shard addressing every shard at once.
    pub const ALL: Self = ShardId(u32::MAX - 15);

    /// True for the metachain.
    pub fn is_metachain(self) -> bool {
        self == Self::METACHAIN
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::METACHAIN => write!(f, "Shard(META)"),
            Self::ALL => write!(f, "Shard(ALL)"),
            ShardId(id) => write!(f, "Shard({})", id),
        }
    }
}

/// Epoch number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Epoch(pub u32);

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

/// Transport-level peer identity.
///
/// Opaque bytes handed to us by the p2p layer. Consensus messages carry the
/// originator's peer id so it can be compared against the sender reported by
/// the transport.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub Vec<u8>);

impl PeerId {
    /// Create a peer id from raw bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PeerId(bytes.into())
    }

    /// Get the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Abbreviated hex form for log lines.
    pub fn short(&self) -> String {
        let hex = hex::encode(&self.0);
        if hex.len() <= 12 {
            hex
        } else {
            format!("{}..{}", &hex[..6], &hex[hex.len() - 6..])
        }
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}
