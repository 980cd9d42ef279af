//! Consensus and block broadcasting.
//!
//! [`CommonMessenger`] publishes on behalf of any key the node holds: the
//! original key goes out as this node, every other managed key through its
//! own transport identity. [`ShardChainMessenger`] adds the shard-specific
//! block and header flows and hands leader and validator data to the
//! [`DelayedBlockBroadcaster`].

use crate::config::BroadcastConfig;
use crate::delayed::{
    BroadcastHandlers, DelayedBlockBroadcaster, DelayedBroadcastData, MiniBlocksData,
    TransactionsData, ValidatorHeaderBroadcastData,
};
use crate::topic::{
    consensus_topic, miniblocks_topic, shard_header_topic, topic_for, EQUIVALENT_PROOFS_TOPIC,
    METACHAIN_BLOCKS_TOPIC,
};
use crate::BroadcastError;
use spos_core::{KeysHandler, P2pMessenger, PeerSignatureHandler};
use spos_messages::{encode_message, encode_payload, pack_in_chunks, ConsensusMessage};
use spos_types::{BlockHeader, Body, Hash, HeaderProof, ShardCoordinator, ShardId};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Collaborators of the messengers.
pub struct MessengerArgs {
    pub config: BroadcastConfig,
    pub messenger: Arc<dyn P2pMessenger>,
    pub keys_handler: Arc<dyn KeysHandler>,
    pub peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    pub shard_coordinator: Arc<dyn ShardCoordinator>,
    pub delayed_broadcaster: Arc<DelayedBlockBroadcaster>,
}

/// Publishing shared by the shard and metachain flows.
#[derive(Clone)]
pub struct CommonMessenger {
    config: BroadcastConfig,
    messenger: Arc<dyn P2pMessenger>,
    keys_handler: Arc<dyn KeysHandler>,
    peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    shard_coordinator: Arc<dyn ShardCoordinator>,
    runtime: Handle,
}

impl CommonMessenger {
    pub fn new(
        config: BroadcastConfig,
        messenger: Arc<dyn P2pMessenger>,
        keys_handler: Arc<dyn KeysHandler>,
        peer_signature_handler: Arc<dyn PeerSignatureHandler>,
        shard_coordinator: Arc<dyn ShardCoordinator>,
    ) -> Result<Self, BroadcastError> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BroadcastError::NoRuntime)?;
        Ok(Self {
            config,
            messenger,
            keys_handler,
            peer_signature_handler,
            shard_coordinator,
            runtime,
        })
    }

    /// Publish `data` on `topic` as the owner of `public_key`.
    ///
    /// A managed key without a transport identity cannot be published for;
    /// the message is dropped with a warning.
    pub fn broadcast(&self, topic: &str, data: Vec<u8>, public_key: &[u8]) {
        if self.keys_handler.is_original_public_key_of_the_node(public_key) {
            self.messenger.broadcast(topic, data);
            return;
        }

        match self.keys_handler.p2p_identity(public_key) {
            Ok(identity) => {
                self.messenger.broadcast_using_private_key(
                    topic,
                    data,
                    &identity.peer_id,
                    &identity.private_key,
                );
            }
            Err(e) => {
                warn!(
                    error = %e,
                    topic,
                    public_key = %hex::encode(public_key),
                    "Dropping broadcast, no transport identity for key"
                );
            }
        }
    }

    /// Sign `message` with the peer signature of its key and publish it on
    /// the consensus topic.
    pub fn broadcast_consensus_message(
        &self,
        message: &mut ConsensusMessage,
    ) -> Result<(), BroadcastError> {
        let key = self.keys_handler.handled_private_key(&message.public_key);
        message.signature = self
            .peer_signature_handler
            .get_peer_signature(&key, &message.originator_pid)?;

        let data = encode_message(message)?;
        let topic = consensus_topic(self.shard_coordinator.as_ref());
        trace!(
            topic,
            round = message.round_index,
            msg_type = message.msg_type,
            "Broadcasting consensus message"
        );
        self.broadcast(&topic, data, &message.public_key);
        Ok(())
    }

    /// Publish each encoded miniblock set on its destination topic.
    pub fn broadcast_miniblocks(
        &self,
        miniblocks: &MiniBlocksData,
        public_key: &[u8],
    ) -> Result<(), BroadcastError> {
        for (shard, data) in miniblocks {
            let topic = miniblocks_topic(self.shard_coordinator.as_ref(), *shard);
            self.broadcast(&topic, data.clone(), public_key);
        }
        if !miniblocks.is_empty() {
            trace!(destinations = miniblocks.len(), "Broadcast miniblocks");
        }
        Ok(())
    }

    /// Publish transactions packed into bulk packets.
    pub fn broadcast_transactions(
        &self,
        transactions: &TransactionsData,
        public_key: &[u8],
    ) -> Result<(), BroadcastError> {
        let mut sent = 0usize;
        for (topic, txs) in transactions {
            for packet in pack_in_chunks(txs, self.config.max_bulk_transaction_size)? {
                self.broadcast(topic, packet, public_key);
            }
            sent += txs.len();
        }
        if sent > 0 {
            trace!(transactions = sent, "Broadcast transactions");
        }
        Ok(())
    }

    /// Publish a header on the topic the metachain listens to.
    pub fn broadcast_header(
        &self,
        header: &BlockHeader,
        public_key: &[u8],
    ) -> Result<(), BroadcastError> {
        let topic = if self.shard_coordinator.is_metachain() {
            METACHAIN_BLOCKS_TOPIC.to_string()
        } else {
            shard_header_topic(self.shard_coordinator.as_ref())
        };
        let data = encode_payload(header)?;
        self.broadcast(&topic, data, public_key);
        Ok(())
    }

    /// Publish miniblocks then, after a pause, their transactions.
    pub async fn broadcast_block_data(
        &self,
        miniblocks: MiniBlocksData,
        transactions: TransactionsData,
        public_key: Vec<u8>,
        extra_delay: Duration,
    ) {
        tokio::time::sleep(extra_delay).await;

        if !miniblocks.is_empty() {
            if let Err(e) = self.broadcast_miniblocks(&miniblocks, &public_key) {
                warn!(error = %e, "Broadcasting miniblocks failed");
            }
        }

        tokio::time::sleep(self.config.extra_delay_between_broadcast_mbs_and_txs()).await;

        if !transactions.is_empty() {
            if let Err(e) = self.broadcast_transactions(&transactions, &public_key) {
                warn!(error = %e, "Broadcasting transactions failed");
            }
        }
    }

    pub fn broadcast_equivalent_proof(
        &self,
        proof: &HeaderProof,
        public_key: &[u8],
        topic: &str,
    ) -> Result<(), BroadcastError> {
        let data = encode_payload(proof)?;
        trace!(topic, header_hash = %proof.header_hash, "Broadcasting equivalent proof");
        self.broadcast(topic, data, public_key);
        Ok(())
    }

    /// Move the metachain-bound miniblocks and transactions out of the given
    /// maps.
    pub fn extract_meta_miniblocks_and_transactions(
        &self,
        miniblocks: &mut MiniBlocksData,
        transactions: &mut TransactionsData,
    ) -> (MiniBlocksData, TransactionsData) {
        let mut meta_miniblocks = MiniBlocksData::new();
        if let Some(data) = miniblocks.remove(&ShardId::METACHAIN) {
            meta_miniblocks.insert(ShardId::METACHAIN, data);
        }

        let identifier = self
            .shard_coordinator
            .communication_identifier(ShardId::METACHAIN);
        let meta_topics: Vec<String> = transactions
            .keys()
            .filter(|topic| topic.contains(&identifier))
            .cloned()
            .collect();
        let meta_transactions = meta_topics
            .into_iter()
            .filter_map(|topic| transactions.remove_entry(&topic))
            .collect();

        (meta_miniblocks, meta_transactions)
    }

    fn spawn_block_data(
        &self,
        miniblocks: MiniBlocksData,
        transactions: TransactionsData,
        public_key: Vec<u8>,
        extra_delay: Duration,
    ) {
        let messenger = self.clone();
        self.runtime.spawn(async move {
            messenger
                .broadcast_block_data(miniblocks, transactions, public_key, extra_delay)
                .await;
        });
    }
}

/// Broadcast flows of a regular shard node.
pub struct ShardChainMessenger {
    common: CommonMessenger,
    delayed: Arc<DelayedBlockBroadcaster>,
}

impl ShardChainMessenger {
    /// Create the messenger and install its publish callbacks on the delayed
    /// broadcaster.
    pub fn new(args: MessengerArgs) -> Result<Self, BroadcastError> {
        let common = CommonMessenger::new(
            args.config,
            args.messenger,
            args.keys_handler,
            args.peer_signature_handler,
            args.shard_coordinator,
        )?;

        let (m, t, h) = (common.clone(), common.clone(), common.clone());
        args.delayed_broadcaster.set_broadcast_handlers(BroadcastHandlers {
            miniblocks: Arc::new(move |mbs: &MiniBlocksData, pk: &[u8]| {
                m.broadcast_miniblocks(mbs, pk)
            }),
            transactions: Arc::new(move |txs: &TransactionsData, pk: &[u8]| {
                t.broadcast_transactions(txs, pk)
            }),
            header: Arc::new(move |header: &BlockHeader, pk: &[u8]| {
                h.broadcast_header(header, pk)
            }),
        });

        Ok(Self {
            common,
            delayed: args.delayed_broadcaster,
        })
    }

    pub fn common(&self) -> &CommonMessenger {
        &self.common
    }

    /// Publish a whole block as this node: the header towards the metachain
    /// and the body on the intra-shard miniblocks topic.
    pub fn broadcast_block(
        &self,
        body: Option<&Body>,
        header: Option<&BlockHeader>,
    ) -> Result<(), BroadcastError> {
        let body = body.ok_or(BroadcastError::NilBody)?;
        if !body.has_no_empty_miniblock() {
            return Err(BroadcastError::MiniBlockEmpty);
        }
        let header = header.ok_or(BroadcastError::NilHeader)?;

        let header_data = encode_payload(header)?;
        let body_data = encode_payload(body)?;
        let coordinator = self.common.shard_coordinator.as_ref();

        self.common
            .messenger
            .broadcast(&shard_header_topic(coordinator), header_data);
        self.common
            .messenger
            .broadcast(&miniblocks_topic(coordinator, coordinator.self_id()), body_data);

        debug!(
            round = header.round(),
            nonce = header.nonce(),
            miniblocks = body.miniblocks.len(),
            "Broadcast block"
        );
        Ok(())
    }

    pub fn broadcast_header(
        &self,
        header: &BlockHeader,
        public_key: &[u8],
    ) -> Result<(), BroadcastError> {
        self.common.broadcast_header(header, public_key)
    }

    pub fn broadcast_consensus_message(
        &self,
        message: &mut ConsensusMessage,
    ) -> Result<(), BroadcastError> {
        self.common.broadcast_consensus_message(message)
    }

    /// Publish `proof` on this shard's equivalent proofs topic.
    pub fn broadcast_equivalent_proof(
        &self,
        proof: &HeaderProof,
        public_key: &[u8],
    ) -> Result<(), BroadcastError> {
        let coordinator = self.common.shard_coordinator.as_ref();
        let topic = topic_for(EQUIVALENT_PROOFS_TOPIC, coordinator, coordinator.self_id());
        self.common.broadcast_equivalent_proof(proof, public_key, &topic)
    }

    /// Hand the leader's block data to the delayed broadcaster.
    ///
    /// Metachain-bound data is not held back: it goes out after the block
    /// info grace delay.
    pub fn broadcast_block_data_leader(
        &self,
        header: &BlockHeader,
        mut miniblocks: MiniBlocksData,
        mut transactions: TransactionsData,
        public_key: &[u8],
    ) -> Result<(), BroadcastError> {
        if miniblocks.is_empty() {
            return Ok(());
        }

        let header_hash = hash_of(header)?;
        let (meta_miniblocks, meta_transactions) = self
            .common
            .extract_meta_miniblocks_and_transactions(&mut miniblocks, &mut transactions);

        self.delayed.set_leader_data(DelayedBroadcastData::new(
            header_hash,
            header.clone(),
            miniblocks,
            transactions,
            public_key.to_vec(),
        ));

        self.common.spawn_block_data(
            meta_miniblocks,
            meta_transactions,
            public_key.to_vec(),
            self.common.config.extra_delay_for_broadcast_block_info(),
        );
        Ok(())
    }

    /// Arm the header failover alarm for the validator at position `order`.
    pub fn prepare_broadcast_header_validator(
        &self,
        header: &BlockHeader,
        miniblocks: MiniBlocksData,
        transactions: TransactionsData,
        order: u32,
        public_key: &[u8],
    ) {
        let header_hash = match hash_of(header) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(error = %e, "Cannot prepare header failover");
                return;
            }
        };

        self.delayed
            .set_header_for_validator(ValidatorHeaderBroadcastData {
                header_hash,
                header: header.clone(),
                meta_miniblocks_data: miniblocks,
                meta_transactions_data: transactions,
                order,
                public_key: public_key.to_vec(),
            });
    }

    /// Keep the block data for failover by the validator at position `order`.
    pub fn prepare_broadcast_block_data_validator(
        &self,
        header: &BlockHeader,
        miniblocks: MiniBlocksData,
        transactions: TransactionsData,
        order: u32,
        public_key: &[u8],
    ) {
        if miniblocks.is_empty() {
            return;
        }
        let header_hash = match hash_of(header) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(error = %e, "Cannot prepare block data failover");
                return;
            }
        };

        self.delayed.set_validator_data(
            DelayedBroadcastData::new(
                header_hash,
                header.clone(),
                miniblocks,
                transactions,
                public_key.to_vec(),
            )
            .with_order(order),
        );
    }

    pub fn close(&self) {
        self.delayed.close();
    }
}

fn hash_of(header: &BlockHeader) -> Result<Hash, BroadcastError> {
    header
        .hash()
        .map_err(|e| BroadcastError::HeaderHash(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::TokioAlarmScheduler;
    use crate::delayed::DelayedBroadcasterArgs;
    use prometheus::Registry;
    use spos_consensus::ConsensusMetrics;
    use spos_core::P2pIdentity;
    use spos_messages::{decode_message, decode_payload, MessageKind};
    use spos_test_helpers::{
        bls_keypair, ed25519_keypair, miniblock, peer_id, shard_header, signed,
        RecordingMessenger, StubHeadersPool, StubInterceptorsContainer, StubKeysHandler,
        StubPeerSignatureHandler,
    };
    use spos_types::{Epoch, MultiShardCoordinator};
    use std::collections::HashMap;
    use tracing_test::traced_test;

    struct Fixture {
        messenger: ShardChainMessenger,
        net: RecordingMessenger,
        delayed: Arc<DelayedBlockBroadcaster>,
        own_pk: Vec<u8>,
        managed_pk: Vec<u8>,
        orphan_pk: Vec<u8>,
    }

    fn fixture_with(config: BroadcastConfig) -> Fixture {
        let own = bls_keypair(1);
        let managed = bls_keypair(2);
        let orphan = bls_keypair(3);
        let own_pk = own.public_key().to_bytes();
        let managed_pk = managed.public_key().to_bytes();
        let orphan_pk = orphan.public_key().to_bytes();

        let keys = StubKeysHandler::new(own)
            .with_managed_key(managed)
            .with_managed_key(orphan)
            .with_identity(
                managed_pk.clone(),
                P2pIdentity {
                    private_key: ed25519_keypair(2).secret_bytes(),
                    peer_id: peer_id(2),
                },
            );

        let coordinator: Arc<dyn ShardCoordinator> =
            Arc::new(MultiShardCoordinator::new(2, ShardId(0)));
        let delayed = DelayedBlockBroadcaster::new(DelayedBroadcasterArgs {
            config: config.clone(),
            shard_coordinator: coordinator.clone(),
            interceptors: Arc::new(
                StubInterceptorsContainer::default()
                    .with_topic("shardBlocks_0_META")
                    .with_topic("txBlockBodies_0_1")
                    .with_topic("txBlockBodies_0_META"),
            ),
            headers_subscriber: Arc::new(StubHeadersPool::default()),
            alarm: Arc::new(TokioAlarmScheduler::new().unwrap()),
            metrics: ConsensusMetrics::new(&Registry::new()).unwrap(),
        })
        .unwrap();

        let net = RecordingMessenger::new(peer_id(1));
        let messenger = ShardChainMessenger::new(MessengerArgs {
            config,
            messenger: Arc::new(net.clone()),
            keys_handler: Arc::new(keys),
            peer_signature_handler: Arc::new(StubPeerSignatureHandler::default()),
            shard_coordinator: coordinator,
            delayed_broadcaster: delayed.clone(),
        })
        .unwrap();

        Fixture {
            messenger,
            net,
            delayed,
            own_pk,
            managed_pk,
            orphan_pk,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            BroadcastConfig::default()
                .with_validator_delay_per_order(Duration::from_millis(100))
                .with_extra_delays(Duration::from_millis(50), Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_own_key_broadcasts_as_node() {
        let f = fixture();
        f.messenger.common().broadcast("consensus_0", vec![1], &f.own_pk);

        let sent = f.net.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].identity, None);
    }

    #[tokio::test]
    async fn test_managed_key_broadcasts_with_its_identity() {
        let f = fixture();
        f.messenger.common().broadcast("consensus_0", vec![1], &f.managed_pk);

        let sent = f.net.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].identity, Some(peer_id(2)));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_key_without_identity_is_dropped() {
        let f = fixture();
        f.messenger.common().broadcast("consensus_0", vec![1], &f.orphan_pk);

        assert!(f.net.sent().is_empty());
        assert!(logs_contain("no transport identity"));
    }

    #[tokio::test]
    async fn test_consensus_message_is_signed_and_published() {
        let f = fixture();
        let mut message = ConsensusMessage::new(
            MessageKind::Signature,
            4,
            b"1".to_vec(),
            f.own_pk.clone(),
            peer_id(1),
        )
        .with_header_hash(vec![1; 32])
        .with_signature_share(vec![2; 96]);

        f.messenger.broadcast_consensus_message(&mut message).unwrap();
        assert_eq!(message.signature.len(), 96);

        let sent = f.net.sent_on("consensus_0");
        assert_eq!(sent.len(), 1);
        let decoded = decode_message(&sent[0].data).unwrap();
        assert_eq!(decoded.signature, message.signature);
        assert_eq!(decoded.round_index, 4);
    }

    #[tokio::test]
    async fn test_consensus_message_fails_without_peer_signature() {
        let own = bls_keypair(1);
        let signatures = StubPeerSignatureHandler::default();
        signatures.reject_peer(peer_id(9));
        let common = CommonMessenger::new(
            BroadcastConfig::default(),
            Arc::new(RecordingMessenger::new(peer_id(1))),
            Arc::new(StubKeysHandler::new(own.clone())),
            Arc::new(signatures),
            Arc::new(MultiShardCoordinator::new(2, ShardId(0))),
        )
        .unwrap();

        let mut message = ConsensusMessage::new(
            MessageKind::Signature,
            1,
            b"1".to_vec(),
            own.public_key().to_bytes(),
            peer_id(9),
        );
        assert!(matches!(
            common.broadcast_consensus_message(&mut message),
            Err(BroadcastError::Capability(_))
        ));
    }

    #[tokio::test]
    async fn test_miniblocks_go_to_destination_topics() {
        let f = fixture();
        let miniblocks = HashMap::from([
            (ShardId(1), vec![1]),
            (ShardId::METACHAIN, vec![2]),
        ]);
        f.messenger
            .common()
            .broadcast_miniblocks(&miniblocks, &f.own_pk)
            .unwrap();

        assert_eq!(f.net.sent_on("txBlockBodies_0_1")[0].data, vec![1]);
        assert_eq!(f.net.sent_on("txBlockBodies_0_META")[0].data, vec![2]);
    }

    #[tokio::test]
    async fn test_transactions_are_packed_in_bulk() {
        let f = fixture_with(BroadcastConfig::default().with_max_bulk_transaction_size(10));
        let txs = HashMap::from([(
            "transactions_0_1".to_string(),
            vec![vec![1; 6], vec![2; 6], vec![3; 3]],
        )]);
        f.messenger
            .common()
            .broadcast_transactions(&txs, &f.own_pk)
            .unwrap();

        let sent = f.net.sent_on("transactions_0_1");
        assert_eq!(sent.len(), 2);
        let first: Vec<Vec<u8>> = decode_payload(&sent[0].data).unwrap();
        let second: Vec<Vec<u8>> = decode_payload(&sent[1].data).unwrap();
        assert_eq!(first, vec![vec![1; 6]]);
        assert_eq!(second, vec![vec![2; 6], vec![3; 3]]);
    }

    #[tokio::test]
    async fn test_extract_meta_data() {
        let f = fixture();

        let mut miniblocks = HashMap::from([
            (ShardId(1), vec![1]),
            (ShardId::METACHAIN, vec![2]),
        ]);
        let mut transactions = HashMap::from([
            ("transactions_0_1".to_string(), vec![vec![1]]),
            ("transactions_0_META".to_string(), vec![vec![2]]),
        ]);
        let (meta_mbs, meta_txs) = f
            .messenger
            .common()
            .extract_meta_miniblocks_and_transactions(&mut miniblocks, &mut transactions);

        assert_eq!(meta_mbs.keys().collect::<Vec<_>>(), vec![&ShardId::METACHAIN]);
        assert!(meta_txs.contains_key("transactions_0_META"));
        assert_eq!(miniblocks.len(), 1);
        assert!(transactions.contains_key("transactions_0_1"));
        assert_eq!(transactions.len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_block_rejects_missing_parts() {
        let f = fixture();
        let header = shard_header(ShardId(0), 1);
        let body = Body {
            miniblocks: vec![miniblock(ShardId(0), ShardId(1), 1)],
        };
        let empty = Body {
            miniblocks: vec![miniblock(ShardId(0), ShardId(1), 0)],
        };

        assert!(matches!(
            f.messenger.broadcast_block(None, Some(&header)),
            Err(BroadcastError::NilBody)
        ));
        assert!(matches!(
            f.messenger.broadcast_block(Some(&empty), Some(&header)),
            Err(BroadcastError::MiniBlockEmpty)
        ));
        assert!(matches!(
            f.messenger.broadcast_block(Some(&body), None),
            Err(BroadcastError::NilHeader)
        ));
        assert!(f.net.sent().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_block_publishes_header_and_body() {
        let f = fixture();
        let header = signed(shard_header(ShardId(0), 1), Vec::new());
        let body = Body {
            miniblocks: vec![miniblock(ShardId(0), ShardId(1), 1)],
        };
        f.messenger.broadcast_block(Some(&body), Some(&header)).unwrap();

        let headers = f.net.sent_on("shardBlocks_0_META");
        assert_eq!(headers.len(), 1);
        let decoded: BlockHeader = decode_payload(&headers[0].data).unwrap();
        assert_eq!(decoded, header);
        let bodies = f.net.sent_on("txBlockBodies_0");
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0].topic, "txBlockBodies_0");
    }

    #[tokio::test]
    async fn test_equivalent_proof_topic() {
        let f = fixture();
        let proof = HeaderProof {
            header_hash: Hash::from_bytes(b"h"),
            aggregated_signature: vec![1; 96],
            pubkeys_bitmap: vec![0b111],
            header_epoch: Epoch(0),
            header_nonce: 2,
            header_shard: ShardId(0),
            header_round: 1,
        };
        f.messenger.broadcast_equivalent_proof(&proof, &f.own_pk).unwrap();

        let sent = f.net.sent_on("equivalentProofs_0");
        assert_eq!(sent.len(), 1);
        let decoded: HeaderProof = decode_payload(&sent[0].data).unwrap();
        assert_eq!(decoded, proof);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_data_waits_but_meta_data_goes_out() {
        let f = fixture();
        let header = signed(shard_header(ShardId(0), 1), Vec::new());
        let miniblocks = HashMap::from([
            (ShardId(1), vec![1]),
            (ShardId::METACHAIN, vec![2]),
        ]);

        f.messenger
            .broadcast_block_data_leader(&header, miniblocks, HashMap::new(), &f.own_pk)
            .unwrap();
        assert_eq!(f.delayed.leader_pending(), 1);

        tokio::time::sleep(Duration::from_millis(51)).await;
        assert_eq!(f.net.sent_on("txBlockBodies_0_META").len(), 1);
        assert!(f.net.sent_on("txBlockBodies_0_1").is_empty());
    }

    #[tokio::test]
    async fn test_leader_without_miniblocks_parks_nothing() {
        let f = fixture();
        let header = signed(shard_header(ShardId(0), 1), Vec::new());
        f.messenger
            .broadcast_block_data_leader(&header, HashMap::new(), HashMap::new(), &f.own_pk)
            .unwrap();
        assert_eq!(f.delayed.leader_pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_validator_header_failover_publishes_as_managed_key() {
        let f = fixture();
        let header = signed(shard_header(ShardId(0), 3), Vec::new());
        f.messenger.prepare_broadcast_header_validator(
            &header,
            HashMap::new(),
            HashMap::new(),
            2,
            &f.managed_pk,
        );
        assert_eq!(f.delayed.validator_headers_pending(), 1);

        tokio::time::sleep(Duration::from_millis(201)).await;
        let sent = f.net.sent_on("shardBlocks_0_META");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].identity, Some(peer_id(2)));
    }

    #[tokio::test]
    async fn test_validator_block_data_requires_miniblocks() {
        let f = fixture();
        let header = signed(shard_header(ShardId(0), 3), Vec::new());
        f.messenger.prepare_broadcast_block_data_validator(
            &header,
            HashMap::new(),
            HashMap::new(),
            1,
            &f.own_pk,
        );
        assert_eq!(f.delayed.validator_pending(), 0);

        f.messenger.prepare_broadcast_block_data_validator(
            &header,
            HashMap::from([(ShardId(1), vec![1])]),
            HashMap::new(),
            1,
            &f.own_pk,
        );
        assert_eq!(f.delayed.validator_pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_failover() {
        let f = fixture();
        let header = signed(shard_header(ShardId(0), 3), Vec::new());
        f.messenger.prepare_broadcast_header_validator(
            &header,
            HashMap::new(),
            HashMap::new(),
            1,
            &f.own_pk,
        );
        f.messenger.close();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.net.sent().is_empty());
    }
}
