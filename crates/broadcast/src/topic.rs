//! Gossip topic names.
//!
//! A full topic is a base name followed by a communication identifier from
//! the shard coordinator, e.g. `consensus_0`, `txBlockBodies_0_1` or
//! `shardBlocks_1_META`.

use spos_types::{ShardCoordinator, ShardId};

pub const CONSENSUS_TOPIC: &str = "consensus";
pub const MINIBLOCKS_TOPIC: &str = "txBlockBodies";
pub const SHARD_BLOCKS_TOPIC: &str = "shardBlocks";
pub const METACHAIN_BLOCKS_TOPIC: &str = "metachainBlocks";
pub const TRANSACTIONS_TOPIC: &str = "transactions";
pub const EQUIVALENT_PROOFS_TOPIC: &str = "equivalentProofs";

/// `base` suffixed with the identifier between this shard and `destination`.
pub fn topic_for(base: &str, coordinator: &dyn ShardCoordinator, destination: ShardId) -> String {
    format!("{base}{}", coordinator.communication_identifier(destination))
}

/// Intra-shard consensus topic.
pub fn consensus_topic(coordinator: &dyn ShardCoordinator) -> String {
    topic_for(CONSENSUS_TOPIC, coordinator, coordinator.self_id())
}

/// Topic carrying shard headers towards the metachain.
pub fn shard_header_topic(coordinator: &dyn ShardCoordinator) -> String {
    topic_for(SHARD_BLOCKS_TOPIC, coordinator, ShardId::METACHAIN)
}

/// Topic carrying miniblocks from this shard to `destination`.
pub fn miniblocks_topic(coordinator: &dyn ShardCoordinator, destination: ShardId) -> String {
    topic_for(MINIBLOCKS_TOPIC, coordinator, destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spos_types::MultiShardCoordinator;

    #[test]
    fn test_topics_for_shard_node() {
        let coordinator = MultiShardCoordinator::new(3, ShardId(1));
        assert_eq!(consensus_topic(&coordinator), "consensus_1");
        assert_eq!(shard_header_topic(&coordinator), "shardBlocks_1_META");
        assert_eq!(miniblocks_topic(&coordinator, ShardId(0)), "txBlockBodies_0_1");
        assert_eq!(miniblocks_topic(&coordinator, ShardId(2)), "txBlockBodies_1_2");
        assert_eq!(
            topic_for(TRANSACTIONS_TOPIC, &coordinator, ShardId::METACHAIN),
            "transactions_1_META"
        );
    }

    #[test]
    fn test_topics_for_metachain_node() {
        let coordinator = MultiShardCoordinator::new(2, ShardId::METACHAIN);
        assert_eq!(consensus_topic(&coordinator), "consensus_META");
        assert_eq!(
            miniblocks_topic(&coordinator, ShardId::ALL),
            "txBlockBodies_ALL"
        );
        assert_eq!(
            topic_for(EQUIVALENT_PROOFS_TOPIC, &coordinator, ShardId(0)),
            "equivalentProofs_0_META"
        );
    }
}
