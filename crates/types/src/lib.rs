//! Core types for the SPoS round consensus engine.
//!
//! Everything in this crate is plain data: hashes, identifiers, keys,
//! block/header payloads and the shard coordinator used to derive
//! gossip topic names. Nothing here performs I/O or holds locks.

mod block;
mod crypto;
mod hash;
mod identifiers;
mod shard;
mod signer_bitfield;
pub mod signing;

pub use block::{
    BlockHeader, Body, HeaderProof, MetaHeader, MiniBlock, MiniBlockHeader, ShardData,
    ShardHeader,
};
pub use crypto::{KeyError, KeyPair, KeyType, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use identifiers::{Epoch, PeerId, ShardId};
pub use shard::{
    communication_identifier, shard_id_to_string, MultiShardCoordinator, ShardCoordinator,
};
pub use signer_bitfield::SignerBitfield;
pub use signing::peer_signature_message;
