//! Chain-side capabilities.

use crate::CapabilityError;
use spos_types::{BlockHeader, Epoch, Hash, ShardId};
use std::sync::Arc;

/// Result of a committee query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusGroup {
    /// Public key of the round's leader.
    pub leader: Vec<u8>,
    /// Ordered committee public keys. Position is the member's order.
    pub members: Vec<Vec<u8>>,
}

/// Committee selection.
pub trait NodesCoordinator: Send + Sync {
    fn compute_consensus_group(
        &self,
        randomness: &[u8],
        round: u64,
        shard: ShardId,
        epoch: Epoch,
    ) -> Result<ConsensusGroup, CapabilityError>;
}

/// Block production and validation.
pub trait BlockProcessor: Send + Sync {
    /// Drop any state applied for the block under construction.
    fn revert_current_block(&self);
}

/// Callback invoked with every header added to the headers pool.
pub type HeaderHandler = Arc<dyn Fn(&BlockHeader, &Hash) + Send + Sync>;

/// Notifications from the headers pool.
pub trait HeadersPoolSubscriber: Send + Sync {
    fn register_handler(&self, handler: HeaderHandler);
}
