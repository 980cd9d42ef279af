//! Failover ladder across several nodes of one shard.
//!
//! Nodes are wired through a loopback transport: whatever one node publishes
//! on a header or miniblocks topic is delivered to the interceptors of every
//! other node, the way gossip would.

use parking_lot::Mutex;
use prometheus::Registry;
use spos_broadcast::{
    BroadcastConfig, DelayedBlockBroadcaster, DelayedBroadcasterArgs, MessengerArgs,
    MiniBlocksData, ShardChainMessenger, TokioAlarmScheduler,
};
use spos_consensus::ConsensusMetrics;
use spos_core::{InterceptedData, P2pMessenger};
use spos_messages::{decode_payload, encode_payload};
use spos_test_helpers::{
    bls_keypair, meta_header, miniblock, miniblock_header, peer_id, shard_header, signed,
    RecordingMessenger, StubHeadersPool, StubInterceptorsContainer, StubKeysHandler,
    StubPeerSignatureHandler,
};
use spos_types::{BlockHeader, Hash, MiniBlock, MultiShardCoordinator, PeerId, ShardId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const PER_ORDER: Duration = Duration::from_millis(100);
const BLOCK_INFO: Duration = Duration::from_millis(50);
const BETWEEN: Duration = Duration::from_millis(10);

/// Transport that records every publish and gossips it to the other nodes.
#[derive(Clone)]
struct Loopback {
    recorder: RecordingMessenger,
    peers: Arc<Mutex<Vec<StubInterceptorsContainer>>>,
}

impl Loopback {
    fn deliver(&self, topic: &str, data: &[u8]) {
        let peers = self.peers.lock().clone();
        if topic.starts_with("shardBlocks") {
            let header: BlockHeader = decode_payload(data).unwrap();
            let hash = header.hash().unwrap().to_vec();
            for peer in &peers {
                peer.intercept(topic, &hash, &InterceptedData::Header(header.clone()));
            }
        } else if topic.starts_with("txBlockBodies") {
            let miniblocks: Vec<MiniBlock> = decode_payload(data).unwrap();
            for mb in miniblocks {
                let hash = mb.hash().unwrap().to_vec();
                for peer in &peers {
                    peer.intercept(topic, &hash, &InterceptedData::MiniBlock(mb.clone()));
                }
            }
        }
    }
}

impl P2pMessenger for Loopback {
    fn id(&self) -> PeerId {
        self.recorder.id()
    }

    fn broadcast(&self, topic: &str, data: Vec<u8>) {
        self.recorder.broadcast(topic, data.clone());
        self.deliver(topic, &data);
    }

    fn broadcast_using_private_key(
        &self,
        topic: &str,
        data: Vec<u8>,
        peer: &PeerId,
        private_key: &[u8],
    ) {
        self.recorder
            .broadcast_using_private_key(topic, data.clone(), peer, private_key);
        self.deliver(topic, &data);
    }
}

struct Node {
    messenger: ShardChainMessenger,
    delayed: Arc<DelayedBlockBroadcaster>,
    interceptors: StubInterceptorsContainer,
    headers_pool: StubHeadersPool,
    transport: Loopback,
    metrics: ConsensusMetrics,
    public_key: Vec<u8>,
}

impl Node {
    fn new(seed: u8, config: BroadcastConfig) -> Self {
        let key = bls_keypair(seed);
        let public_key = key.public_key().to_bytes();
        let coordinator = Arc::new(MultiShardCoordinator::new(2, ShardId(0)));
        let interceptors = StubInterceptorsContainer::default()
            .with_topic("shardBlocks_0_META")
            .with_topic("txBlockBodies_0_1")
            .with_topic("txBlockBodies_0_META");
        let headers_pool = StubHeadersPool::default();
        let metrics = ConsensusMetrics::new(&Registry::new()).unwrap();

        let delayed = DelayedBlockBroadcaster::new(DelayedBroadcasterArgs {
            config: config.clone(),
            shard_coordinator: coordinator.clone(),
            interceptors: Arc::new(interceptors.clone()),
            headers_subscriber: Arc::new(headers_pool.clone()),
            alarm: Arc::new(TokioAlarmScheduler::new().unwrap()),
            metrics: metrics.clone(),
        })
        .unwrap();

        let transport = Loopback {
            recorder: RecordingMessenger::new(peer_id(seed)),
            peers: Arc::new(Mutex::new(Vec::new())),
        };
        let messenger = ShardChainMessenger::new(MessengerArgs {
            config,
            messenger: Arc::new(transport.clone()),
            keys_handler: Arc::new(StubKeysHandler::new(key)),
            peer_signature_handler: Arc::new(StubPeerSignatureHandler::default()),
            shard_coordinator: coordinator,
            delayed_broadcaster: delayed.clone(),
        })
        .unwrap();

        Self {
            messenger,
            delayed,
            interceptors,
            headers_pool,
            transport,
            metrics,
            public_key,
        }
    }

    fn headers_sent(&self) -> usize {
        self.transport.recorder.sent_on("shardBlocks_0_META").len()
    }

    fn miniblocks_sent(&self) -> usize {
        self.transport.recorder.sent_on("txBlockBodies_0_1").len()
    }
}

fn config() -> BroadcastConfig {
    BroadcastConfig::default()
        .with_validator_delay_per_order(PER_ORDER)
        .with_extra_delays(BLOCK_INFO, BETWEEN)
}

/// Fully connect `nodes` through their loopback transports.
fn connect(nodes: &[&Node]) {
    for (i, node) in nodes.iter().enumerate() {
        let mut peers = node.transport.peers.lock();
        for (j, other) in nodes.iter().enumerate() {
            if i != j {
                peers.push(other.interceptors.clone());
            }
        }
    }
}

/// Cross-shard block for `round` and its encoded miniblocks.
fn cross_shard_block(round: u64) -> (BlockHeader, MiniBlocksData) {
    let mb = miniblock(ShardId(0), ShardId(1), 3);
    let header = signed(shard_header(ShardId(0), round), vec![miniblock_header(&mb)]);
    let data = HashMap::from([(ShardId(1), encode_payload(&vec![mb]).unwrap())]);
    (header, data)
}

#[tokio::test(start_paused = true)]
async fn test_lower_order_validator_broadcasts_header_first() {
    // A is the leader and stays silent. B sits at order 1, C at order 2.
    let b = Node::new(2, config());
    let c = Node::new(3, config());
    connect(&[&b, &c]);

    let header = signed(shard_header(ShardId(0), 10), Vec::new());
    for (node, order) in [(&b, 1), (&c, 2)] {
        node.messenger.prepare_broadcast_header_validator(
            &header,
            HashMap::new(),
            HashMap::new(),
            order,
            &node.public_key,
        );
    }

    tokio::time::sleep(PER_ORDER / 2).await;
    assert_eq!(b.headers_sent() + c.headers_sent(), 0);

    tokio::time::sleep(PER_ORDER).await;
    assert_eq!(b.headers_sent(), 1, "B fires at its rung");
    assert_eq!(c.delayed.validator_headers_pending(), 0, "C stood down");
    assert_eq!(b.metrics.delayed_broadcasts_fired.get(), 1);

    tokio::time::sleep(PER_ORDER * 3).await;
    assert_eq!(c.headers_sent(), 0, "C's alarm was cancelled");
    assert_eq!(b.headers_sent(), 1, "no second broadcast");
    assert_eq!(c.metrics.delayed_broadcasts_fired.get(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_header_seen_on_wire_disarms_whole_ladder() {
    let b = Node::new(2, config());
    let c = Node::new(3, config());
    let header = signed(shard_header(ShardId(0), 10), Vec::new());
    for (node, order) in [(&b, 1), (&c, 2)] {
        node.messenger.prepare_broadcast_header_validator(
            &header,
            HashMap::new(),
            HashMap::new(),
            order,
            &node.public_key,
        );
    }

    // The leader's own broadcast reaches both validators.
    let hash = header.hash().unwrap().to_vec();
    for node in [&b, &c] {
        node.interceptors.intercept(
            "shardBlocks_0_META",
            &hash,
            &InterceptedData::Header(header.clone()),
        );
    }

    tokio::time::sleep(PER_ORDER * 4).await;
    assert_eq!(b.headers_sent() + c.headers_sent(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_block_data_failover_after_notarization() {
    let b = Node::new(2, config());
    let c = Node::new(3, config());
    connect(&[&b, &c]);

    let (header, miniblocks) = cross_shard_block(10);
    for (node, order) in [(&b, 1), (&c, 2)] {
        node.messenger.prepare_broadcast_block_data_validator(
            &header,
            miniblocks.clone(),
            HashMap::new(),
            order,
            &node.public_key,
        );
    }

    let meta = meta_header(11, &[header]);
    let meta_hash = meta.hash().unwrap();
    for node in [&b, &c] {
        node.headers_pool.add_header(&meta, &meta_hash);
    }

    tokio::time::sleep(PER_ORDER + BLOCK_INFO + Duration::from_millis(1)).await;
    assert_eq!(b.miniblocks_sent(), 1);
    assert_eq!(c.delayed.validator_pending(), 0, "C saw every miniblock");

    tokio::time::sleep(PER_ORDER * 3).await;
    assert_eq!(c.miniblocks_sent(), 0);
    assert_eq!(b.miniblocks_sent(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_leader_queue_overflow_flushes_oldest() {
    let leader = Node::new(1, config().with_cache_sizes(2, 2));

    for round in 1..=3 {
        let (header, miniblocks) = cross_shard_block(round);
        leader
            .messenger
            .broadcast_block_data_leader(&header, miniblocks, HashMap::new(), &leader.public_key)
            .unwrap();
        assert!(leader.delayed.leader_pending() <= 2);
    }

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(leader.miniblocks_sent(), 1, "oldest entry forced out");
    assert_eq!(leader.delayed.leader_pending(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_leader_flushes_once_notarized() {
    let leader = Node::new(1, config());
    let (header, miniblocks) = cross_shard_block(4);
    leader
        .messenger
        .broadcast_block_data_leader(&header, miniblocks, HashMap::new(), &leader.public_key)
        .unwrap();

    tokio::time::sleep(PER_ORDER * 5).await;
    assert_eq!(leader.miniblocks_sent(), 0, "held until notarized");

    let meta = meta_header(5, &[header]);
    leader
        .headers_pool
        .add_header(&meta, &Hash::from_bytes(b"meta-5"));
    tokio::time::sleep(BLOCK_INFO + Duration::from_millis(1)).await;
    assert_eq!(leader.miniblocks_sent(), 1);
    assert_eq!(leader.delayed.leader_pending(), 0);
}
