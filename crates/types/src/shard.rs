//! Shard coordinator trait and static implementation.
//!
//! Gossip topics are derived from a base name plus a communication
//! identifier: `_<shard>` for intra-shard traffic and `_<low>_<high>` for
//! traffic between two shards, with `_META` and `_ALL` for the reserved
//! shards.

use crate::ShardId;

/// String suffix for a single shard.
pub fn shard_id_to_string(shard: ShardId) -> String {
    match shard {
        ShardId::METACHAIN => "_META".to_string(),
        ShardId::ALL => "_ALL".to_string(),
        ShardId(id) => format!("_{}", id),
    }
}

/// Communication identifier between two shards.
///
/// Symmetric: the lower shard id always comes first, and the metachain sorts
/// last because it carries the largest id. Anything involving
/// [`ShardId::ALL`] collapses to `_ALL`.
pub fn communication_identifier(a: ShardId, b: ShardId) -> String {
    if a == ShardId::ALL || b == ShardId::ALL {
        return shard_id_to_string(ShardId::ALL);
    }
    if a == b {
        return shard_id_to_string(a);
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    format!("{}{}", shard_id_to_string(low), shard_id_to_string(high))
}

/// Shard layout as seen from the local node.
pub trait ShardCoordinator: Send + Sync {
    /// The shard this node belongs to.
    fn self_id(&self) -> ShardId;

    /// Number of regular shards (the metachain is not counted).
    fn number_of_shards(&self) -> u32;

    // Derived methods

    /// Identifier for traffic between the local shard and `destination`.
    fn communication_identifier(&self, destination: ShardId) -> String {
        communication_identifier(self.self_id(), destination)
    }

    /// Regular shard ids, in ascending order.
    fn shard_ids(&self) -> Vec<ShardId> {
        (0..self.number_of_shards()).map(ShardId).collect()
    }

    /// True when the local node runs on the metachain.
    fn is_metachain(&self) -> bool {
        self.self_id().is_metachain()
    }
}

/// Fixed shard layout.
#[derive(Debug, Clone)]
pub struct MultiShardCoordinator {
    self_id: ShardId,
    number_of_shards: u32,
}

impl MultiShardCoordinator {
    /// Create a coordinator for `self_id` in a network of `number_of_shards` shards.
    pub fn new(number_of_shards: u32, self_id: ShardId) -> Self {
        Self {
            self_id,
            number_of_shards,
        }
    }
}

impl ShardCoordinator for MultiShardCoordinator {
    fn self_id(&self) -> ShardId {
        self.self_id
    }

    fn number_of_shards(&self) -> u32 {
        self.number_of_shards
    }
}
