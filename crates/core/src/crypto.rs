//! Signing capabilities.

use crate::CapabilityError;
use spos_types::{KeyPair, PeerId};

/// Produces and checks the peer signature carried by every consensus message.
///
/// A peer signature binds a validator public key to the transport peer that
/// relays its messages. Verification results may be cached by the
/// implementation; callers must not assume a fresh cryptographic check.
pub trait PeerSignatureHandler: Send + Sync {
    /// Verify that `signature` was produced by `public_key` over `peer`.
    fn verify_peer_signature(
        &self,
        public_key: &[u8],
        peer: &PeerId,
        signature: &[u8],
    ) -> Result<(), CapabilityError>;

    /// Sign `peer` with `key`.
    fn get_peer_signature(&self, key: &KeyPair, peer: &PeerId) -> Result<Vec<u8>, CapabilityError>;
}

/// Dedicated transport identity of a managed key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pIdentity {
    /// Transport signing key bytes.
    pub private_key: Vec<u8>,
    /// Peer id derived from `private_key`.
    pub peer_id: PeerId,
}

/// Key material for single-key and multi-key operation.
///
/// A node may hold several committee keys at once. The "original" key is the
/// one the node was started with; every other managed key has its own
/// transport identity so its traffic cannot be linked to this machine.
pub trait KeysHandler: Send + Sync {
    /// Signing key for `public_key`, falling back to the node's own key when
    /// the key is not managed here.
    fn handled_private_key(&self, public_key: &[u8]) -> KeyPair;

    /// True if `public_key` is one of the keys this node signs for.
    fn is_key_managed_by_current_node(&self, public_key: &[u8]) -> bool;

    /// True if `public_key` is the node's own identity.
    fn is_original_public_key_of_the_node(&self, public_key: &[u8]) -> bool;

    /// Bump the inactivity counter of a managed key.
    fn increment_rounds_without_received_messages(&self, public_key: &[u8]);

    /// Clear the inactivity counter after a message from `public_key` was seen
    /// coming from `peer`.
    fn reset_rounds_without_received_messages(&self, public_key: &[u8], peer: &PeerId);

    /// Peer id that relays for `public_key`.
    fn associated_pid(&self, public_key: &[u8]) -> PeerId;

    /// Transport identity used when broadcasting on behalf of `public_key`.
    fn p2p_identity(&self, public_key: &[u8]) -> Result<P2pIdentity, CapabilityError>;

    /// Why a backup machine stepped in for a managed key, or empty.
    fn redundancy_step_in_reason(&self) -> String;
}
