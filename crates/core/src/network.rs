//! Transport-facing capabilities.

use crate::CapabilityError;
use spos_types::{BlockHeader, MiniBlock, PeerId};
use std::sync::Arc;

/// A message as delivered by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct P2pMessage {
    /// Application payload.
    pub data: Vec<u8>,
    /// Transport signature over the payload.
    pub signature: Vec<u8>,
    /// Peer that created the message.
    pub peer: PeerId,
    /// Topic the message was published on.
    pub topic: String,
}

/// Publish side of the p2p transport.
pub trait P2pMessenger: Send + Sync {
    /// Transport identity of this node.
    fn id(&self) -> PeerId;

    /// Publish `data` on `topic` as this node.
    fn broadcast(&self, topic: &str, data: Vec<u8>);

    /// Publish `data` on `topic` signed as another transport identity.
    fn broadcast_using_private_key(
        &self,
        topic: &str,
        data: Vec<u8>,
        peer: &PeerId,
        private_key: &[u8],
    );
}

/// Boolean gate against flooding peers.
pub trait AntifloodHandler: Send + Sync {
    /// Account one message of `size` bytes from `from`.
    fn can_process_message(&self, from: &PeerId, size: usize) -> Result<(), CapabilityError>;

    /// Account `num_messages` totalling `total_size` bytes on `topic`.
    fn can_process_messages_on_topic(
        &self,
        from: &PeerId,
        topic: &str,
        num_messages: u32,
        total_size: usize,
    ) -> Result<(), CapabilityError>;
}

/// Records which peer relays for which validator key.
pub trait NetworkShardingCollector: Send + Sync {
    fn update_peer_id_public_key_pair(&self, peer: &PeerId, public_key: &[u8]);
}

/// Data observed on the wire by an interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptedData {
    Header(BlockHeader),
    MiniBlock(MiniBlock),
}

/// Callback invoked with (topic, hash, data) for every intercepted item.
pub type InterceptedDataHandler = Arc<dyn Fn(&str, &[u8], &InterceptedData) + Send + Sync>;

/// Interceptor of one topic.
pub trait Interceptor: Send + Sync {
    fn register_handler(&self, handler: InterceptedDataHandler);
}

/// Lookup of interceptors by topic.
pub trait InterceptorsContainer: Send + Sync {
    fn get(&self, topic: &str) -> Result<Arc<dyn Interceptor>, CapabilityError>;
}
