//! Peer signatures over transport identities.

use crate::ConsensusError;
use lru::LruCache;
use parking_lot::Mutex;
use spos_core::{CapabilityError, PeerSignatureHandler};
use spos_types::{peer_signature_message, KeyPair, PeerId, PublicKey, Signature};
use std::num::NonZeroUsize;
use tracing::trace;

/// Signs and verifies peer signatures with the validator's own key scheme.
///
/// Successful verifications are remembered per (public key, peer) so that
/// the same binding is not re-verified for every message of a round.
pub struct PeerSignatureVerifier {
    verified: Mutex<LruCache<(Vec<u8>, PeerId), Vec<u8>>>,
}

impl PeerSignatureVerifier {
    pub fn new(cache_size: usize) -> Result<Self, ConsensusError> {
        let cache_size = NonZeroUsize::new(cache_size).ok_or_else(|| {
            ConsensusError::InvalidConfig("peer signature cache size is zero".into())
        })?;
        Ok(Self {
            verified: Mutex::new(LruCache::new(cache_size)),
        })
    }
}

impl PeerSignatureHandler for PeerSignatureVerifier {
    fn verify_peer_signature(
        &self,
        public_key: &[u8],
        peer: &PeerId,
        signature: &[u8],
    ) -> Result<(), CapabilityError> {
        let cache_key = (public_key.to_vec(), peer.clone());
        if let Some(known) = self.verified.lock().get(&cache_key) {
            if known.as_slice() == signature {
                return Ok(());
            }
        }

        let key = PublicKey::from_bytes(public_key)
            .map_err(|e| CapabilityError::MissingKey(e.to_string()))?;
        let signature_value = Signature::for_key(&key, signature);
        if !key.verify(&peer_signature_message(peer), &signature_value) {
            trace!(peer = %peer, "Peer signature rejected");
            return Err(CapabilityError::InvalidPeerSignature);
        }

        self.verified.lock().put(cache_key, signature.to_vec());
        Ok(())
    }

    fn get_peer_signature(&self, key: &KeyPair, peer: &PeerId) -> Result<Vec<u8>, CapabilityError> {
        Ok(key.sign(&peer_signature_message(peer)).to_bytes())
    }
}
