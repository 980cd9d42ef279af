//! Block, header, miniblock and proof payloads.
//!
//! The consensus core treats these mostly as opaque bytes; it only needs the
//! handful of fields that drive round matching (round, previous random seed,
//! shard), delayed-broadcast bookkeeping (cross-shard miniblock hashes) and
//! finality (signatures).

use crate::{Epoch, Hash, ShardId};
use serde::{Deserialize, Serialize};

/// Miniblock reference stored inside a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBlockHeader {
    /// Hash of the miniblock.
    pub hash: Hash,
    /// Shard that produced the miniblock.
    pub sender_shard: ShardId,
    /// Destination shard.
    pub receiver_shard: ShardId,
    /// Number of transactions referenced.
    pub tx_count: u32,
    /// Whether the miniblock is final (scheduled miniblocks are not).
    pub is_final: bool,
}

/// Header produced by a regular shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardHeader {
    /// Producing shard.
    pub shard_id: ShardId,
    /// Block nonce.
    pub nonce: u64,
    /// Round in which the block was proposed.
    pub round: u64,
    /// Epoch of the block.
    pub epoch: Epoch,
    /// Random seed of the previous block; together with `round` identifies a proposal.
    pub prev_rand_seed: Vec<u8>,
    /// Random seed of this block.
    pub rand_seed: Vec<u8>,
    /// Chain the block belongs to.
    pub chain_id: Vec<u8>,
    /// Unix timestamp (seconds) of the round start.
    pub timestamp: u64,
    /// Miniblocks included in the block.
    pub miniblock_headers: Vec<MiniBlockHeader>,
    /// Aggregated committee signature. Empty until the block is finalized.
    pub signature: Vec<u8>,
    /// Leader signature over the finalized header.
    pub leader_signature: Vec<u8>,
}

/// Shard header summary notarized by the metachain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardData {
    /// Shard the notarized header belongs to.
    pub shard_id: ShardId,
    /// Hash of the notarized header.
    pub header_hash: Hash,
    /// Round of the notarized header.
    pub round: u64,
    /// Nonce of the notarized header.
    pub nonce: u64,
    /// Previous random seed of the notarized header.
    pub prev_rand_seed: Vec<u8>,
}

/// Header produced by the metachain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaHeader {
    /// Block nonce.
    pub nonce: u64,
    /// Round in which the block was proposed.
    pub round: u64,
    /// Epoch of the block.
    pub epoch: Epoch,
    /// Random seed of the previous block.
    pub prev_rand_seed: Vec<u8>,
    /// Random seed of this block.
    pub rand_seed: Vec<u8>,
    /// Chain the block belongs to.
    pub chain_id: Vec<u8>,
    /// Unix timestamp (seconds) of the round start.
    pub timestamp: u64,
    /// Shard headers notarized by this block.
    pub shard_info: Vec<ShardData>,
    /// Miniblocks produced by the metachain itself.
    pub miniblock_headers: Vec<MiniBlockHeader>,
    /// Aggregated committee signature.
    pub signature: Vec<u8>,
    /// Leader signature over the finalized header.
    pub leader_signature: Vec<u8>,
}

/// Any header travelling through consensus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockHeader {
    /// Regular shard header.
    Shard(ShardHeader),
    /// Metachain header.
    Meta(MetaHeader),
}

impl BlockHeader {
    /// Encode to canonical bytes (the form that is hashed and gossiped).
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Decode from canonical bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }

    /// Hash of the canonical encoding.
    pub fn hash(&self) -> Result<Hash, bincode::Error> {
        Ok(Hash::from_bytes(&self.encode()?))
    }

    /// Shard that produced the header.
    pub fn shard_id(&self) -> ShardId {
        match self {
            BlockHeader::Shard(h) => h.shard_id,
            BlockHeader::Meta(_) => ShardId::METACHAIN,
        }
    }

    /// Round of the header.
    pub fn round(&self) -> u64 {
        match self {
            BlockHeader::Shard(h) => h.round,
            BlockHeader::Meta(h) => h.round,
        }
    }

    /// Nonce of the header.
    pub fn nonce(&self) -> u64 {
        match self {
            BlockHeader::Shard(h) => h.nonce,
            BlockHeader::Meta(h) => h.nonce,
        }
    }

    /// Epoch of the header.
    pub fn epoch(&self) -> Epoch {
        match self {
            BlockHeader::Shard(h) => h.epoch,
            BlockHeader::Meta(h) => h.epoch,
        }
    }

    /// Previous random seed.
    pub fn prev_rand_seed(&self) -> &[u8] {
        match self {
            BlockHeader::Shard(h) => &h.prev_rand_seed,
            BlockHeader::Meta(h) => &h.prev_rand_seed,
        }
    }

    /// Chain id.
    pub fn chain_id(&self) -> &[u8] {
        match self {
            BlockHeader::Shard(h) => &h.chain_id,
            BlockHeader::Meta(h) => &h.chain_id,
        }
    }

    /// Aggregated signature; empty while the header is not yet finalized.
    pub fn signature(&self) -> &[u8] {
        match self {
            BlockHeader::Shard(h) => &h.signature,
            BlockHeader::Meta(h) => &h.signature,
        }
    }

    /// Miniblocks referenced by the header.
    pub fn miniblock_headers(&self) -> &[MiniBlockHeader] {
        match self {
            BlockHeader::Shard(h) => &h.miniblock_headers,
            BlockHeader::Meta(h) => &h.miniblock_headers,
        }
    }

    /// Notarized shard headers (metachain only).
    pub fn shard_info(&self) -> &[ShardData] {
        match self {
            BlockHeader::Shard(_) => &[],
            BlockHeader::Meta(h) => &h.shard_info,
        }
    }

    /// Hashes of final miniblocks sent from this header's shard to `to_shard`.
    pub fn final_cross_miniblock_hashes(&self, to_shard: ShardId) -> Vec<Hash> {
        let from = self.shard_id();
        self.miniblock_headers()
            .iter()
            .filter(|mb| mb.is_final && mb.sender_shard == from && mb.receiver_shard == to_shard)
            .map(|mb| mb.hash)
            .collect()
    }
}

/// A miniblock: transactions moving between a pair of shards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniBlock {
    /// Source shard.
    pub sender_shard: ShardId,
    /// Destination shard.
    pub receiver_shard: ShardId,
    /// Hashes of the transactions carried.
    pub tx_hashes: Vec<Hash>,
}

impl MiniBlock {
    /// Hash of the canonical encoding.
    pub fn hash(&self) -> Result<Hash, bincode::Error> {
        Ok(Hash::from_bytes(&bincode::serialize(self)?))
    }
}

/// Block body: the miniblocks of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Miniblocks, in proposal order.
    pub miniblocks: Vec<MiniBlock>,
}

impl Body {
    /// True when every miniblock carries at least one transaction.
    pub fn has_no_empty_miniblock(&self) -> bool {
        self.miniblocks.iter().all(|mb| !mb.tx_hashes.is_empty())
    }
}

/// Equivalent proof: aggregate-signature evidence that a header is final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderProof {
    /// Hash of the proven header.
    pub header_hash: Hash,
    /// Aggregated signature of the signers.
    pub aggregated_signature: Vec<u8>,
    /// Bitmap of signers by consensus-group position.
    pub pubkeys_bitmap: Vec<u8>,
    /// Epoch of the proven header.
    pub header_epoch: Epoch,
    /// Nonce of the proven header.
    pub header_nonce: u64,
    /// Shard of the proven header.
    pub header_shard: ShardId,
    /// Round of the proven header.
    pub header_round: u64,
}
