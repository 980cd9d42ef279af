//! Domain-separated signing messages.
//!
//! Every signature produced by the consensus runtime covers a message that
//! starts with a domain tag, so a signature from one context can never be
//! replayed in another.
//!
//! | Tag | Purpose |
//! |-----|---------|
//! | `consensus_peer:` | Binds a validator key to the transport peer that relays its messages |
//! | `block_header:` | Leader/validator signature over a proposed header hash |

use crate::{Hash, PeerId};

/// Domain tag for peer signatures carried in every consensus message.
///
/// Format: `consensus_peer:` || peer_id
pub const DOMAIN_PEER_SIGNATURE: &[u8] = b"consensus_peer:";

/// Domain tag for header signatures.
///
/// Format: `block_header:` || header_hash
pub const DOMAIN_BLOCK_HEADER: &[u8] = b"block_header:";

/// Build the message signed to prove that `peer` relays for a validator key.
pub fn peer_signature_message(peer: &PeerId) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_PEER_SIGNATURE.len() + peer.as_bytes().len());
    message.extend_from_slice(DOMAIN_PEER_SIGNATURE);
    message.extend_from_slice(peer.as_bytes());
    message
}

/// Build the message signed over a header hash.
pub fn header_signature_message(header_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(DOMAIN_BLOCK_HEADER.len() + Hash::BYTES);
    message.extend_from_slice(DOMAIN_BLOCK_HEADER);
    message.extend_from_slice(header_hash.as_bytes());
    message
}
