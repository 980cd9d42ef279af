//! Deterministic fixtures.

use spos_types::{
    BlockHeader, Epoch, Hash, KeyPair, KeyType, MetaHeader, MiniBlock, MiniBlockHeader, PeerId,
    ShardData, ShardHeader, ShardId,
};

/// Chain id used by every fixture header. Matches the default consensus config.
pub const FIXTURE_CHAIN_ID: &[u8] = b"1";

/// BLS validator key derived from `seed`.
pub fn bls_keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed(KeyType::Bls12381, &[seed; 32]).expect("32-byte seed is valid key material")
}

/// Ed25519 transport key derived from `seed`.
pub fn ed25519_keypair(seed: u8) -> KeyPair {
    KeyPair::from_seed(KeyType::Ed25519, &[seed; 32]).expect("ed25519 accepts any 32-byte seed")
}

/// Peer id `peer-<n>`.
pub fn peer_id(n: u8) -> PeerId {
    PeerId::new(format!("peer-{n}").into_bytes())
}

/// Unsigned shard header for `round`.
pub fn shard_header(shard: ShardId, round: u64) -> BlockHeader {
    BlockHeader::Shard(ShardHeader {
        shard_id: shard,
        nonce: round + 1,
        round,
        epoch: Epoch(0),
        prev_rand_seed: format!("prev-{round}").into_bytes(),
        rand_seed: format!("rand-{round}").into_bytes(),
        chain_id: FIXTURE_CHAIN_ID.to_vec(),
        timestamp: 0,
        miniblock_headers: Vec::new(),
        signature: Vec::new(),
        leader_signature: Vec::new(),
    })
}

/// Metachain header for `round` notarizing `notarized` shard headers.
pub fn meta_header(round: u64, notarized: &[BlockHeader]) -> BlockHeader {
    let shard_info = notarized
        .iter()
        .map(|header| ShardData {
            shard_id: header.shard_id(),
            header_hash: header.hash().unwrap_or(Hash::ZERO),
            round: header.round(),
            nonce: header.nonce(),
            prev_rand_seed: header.prev_rand_seed().to_vec(),
        })
        .collect();

    BlockHeader::Meta(MetaHeader {
        nonce: round + 1,
        round,
        epoch: Epoch(0),
        prev_rand_seed: format!("meta-prev-{round}").into_bytes(),
        rand_seed: format!("meta-rand-{round}").into_bytes(),
        chain_id: FIXTURE_CHAIN_ID.to_vec(),
        timestamp: 0,
        shard_info,
        miniblock_headers: Vec::new(),
        signature: vec![1; 96],
        leader_signature: vec![2; 96],
    })
}

/// The same header carrying a committee signature and the given miniblocks.
pub fn signed(header: BlockHeader, miniblocks: Vec<MiniBlockHeader>) -> BlockHeader {
    match header {
        BlockHeader::Shard(mut h) => {
            h.signature = vec![1; 96];
            h.leader_signature = vec![2; 96];
            h.miniblock_headers = miniblocks;
            BlockHeader::Shard(h)
        }
        BlockHeader::Meta(mut h) => {
            h.signature = vec![1; 96];
            h.leader_signature = vec![2; 96];
            h.miniblock_headers = miniblocks;
            BlockHeader::Meta(h)
        }
    }
}

/// Miniblock with `txs` distinct transaction hashes.
pub fn miniblock(from: ShardId, to: ShardId, txs: u8) -> MiniBlock {
    MiniBlock {
        sender_shard: from,
        receiver_shard: to,
        tx_hashes: (0..txs)
            .map(|i| Hash::from_parts(&[b"tx", &from.0.to_le_bytes(), &to.0.to_le_bytes(), &[i]]))
            .collect(),
    }
}

/// Final header entry referencing `mb`.
pub fn miniblock_header(mb: &MiniBlock) -> MiniBlockHeader {
    MiniBlockHeader {
        hash: mb.hash().unwrap_or(Hash::ZERO),
        sender_shard: mb.sender_shard,
        receiver_shard: mb.receiver_shard,
        tx_count: mb.tx_hashes.len() as u32,
        is_final: true,
    }
}
