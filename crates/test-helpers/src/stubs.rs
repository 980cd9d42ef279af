//! Recording stubs of the capability traits.

use parking_lot::Mutex;
use spos_core::{
    AntifloodHandler, BlockProcessor, CapabilityError, ConsensusGroup, HeaderHandler,
    HeadersPoolSubscriber, InterceptedData, InterceptedDataHandler, Interceptor,
    InterceptorsContainer, KeysHandler, NetworkShardingCollector, NodeRedundancyHandler,
    NodesCoordinator, P2pIdentity, P2pMessenger, PeerSignatureHandler,
};
use spos_types::{BlockHeader, Epoch, Hash, KeyPair, PeerId, ShardId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

// ═══════════════════════════════════════════════════════════════════════════
// Keys
// ═══════════════════════════════════════════════════════════════════════════

struct KeysState {
    own: KeyPair,
    managed: Vec<KeyPair>,
    identities: HashMap<Vec<u8>, P2pIdentity>,
    step_in_reason: String,
    increments: Vec<Vec<u8>>,
    resets: Vec<(Vec<u8>, PeerId)>,
}

/// Keys handler over an own key plus optional managed keys.
///
/// Only the extra keys count as "managed"; the own key is the original key.
#[derive(Clone)]
pub struct StubKeysHandler {
    state: Arc<Mutex<KeysState>>,
}

impl StubKeysHandler {
    pub fn new(own: KeyPair) -> Self {
        Self {
            state: Arc::new(Mutex::new(KeysState {
                own,
                managed: Vec::new(),
                identities: HashMap::new(),
                step_in_reason: String::new(),
                increments: Vec::new(),
                resets: Vec::new(),
            })),
        }
    }

    pub fn with_managed_key(self, key: KeyPair) -> Self {
        self.state.lock().managed.push(key);
        self
    }

    /// Give `public_key` its own transport identity.
    pub fn with_identity(self, public_key: Vec<u8>, identity: P2pIdentity) -> Self {
        self.state.lock().identities.insert(public_key, identity);
        self
    }

    pub fn with_step_in_reason(self, reason: &str) -> Self {
        self.state.lock().step_in_reason = reason.to_string();
        self
    }

    /// Keys whose inactivity counter was bumped, in call order.
    pub fn increments(&self) -> Vec<Vec<u8>> {
        self.state.lock().increments.clone()
    }

    /// (key, peer) pairs whose inactivity counter was cleared.
    pub fn resets(&self) -> Vec<(Vec<u8>, PeerId)> {
        self.state.lock().resets.clone()
    }
}

impl KeysHandler for StubKeysHandler {
    fn handled_private_key(&self, public_key: &[u8]) -> KeyPair {
        let state = self.state.lock();
        state
            .managed
            .iter()
            .find(|k| k.public_key().to_bytes() == public_key)
            .unwrap_or(&state.own)
            .clone()
    }

    fn is_key_managed_by_current_node(&self, public_key: &[u8]) -> bool {
        self.state
            .lock()
            .managed
            .iter()
            .any(|k| k.public_key().to_bytes() == public_key)
    }

    fn is_original_public_key_of_the_node(&self, public_key: &[u8]) -> bool {
        self.state.lock().own.public_key().to_bytes() == public_key
    }

    fn increment_rounds_without_received_messages(&self, public_key: &[u8]) {
        self.state.lock().increments.push(public_key.to_vec());
    }

    fn reset_rounds_without_received_messages(&self, public_key: &[u8], peer: &PeerId) {
        self.state
            .lock()
            .resets
            .push((public_key.to_vec(), peer.clone()));
    }

    fn associated_pid(&self, public_key: &[u8]) -> PeerId {
        self.state
            .lock()
            .identities
            .get(public_key)
            .map(|identity| identity.peer_id.clone())
            .unwrap_or_default()
    }

    fn p2p_identity(&self, public_key: &[u8]) -> Result<P2pIdentity, CapabilityError> {
        self.state
            .lock()
            .identities
            .get(public_key)
            .cloned()
            .ok_or_else(|| CapabilityError::MissingKey(hex::encode(public_key)))
    }

    fn redundancy_step_in_reason(&self) -> String {
        self.state.lock().step_in_reason.clone()
    }
}

/// Peer signature handler that signs with a fixed tag and accepts everything
/// except the peers it was told to reject.
#[derive(Clone, Default)]
pub struct StubPeerSignatureHandler {
    rejected: Arc<Mutex<HashSet<PeerId>>>,
}

impl StubPeerSignatureHandler {
    pub fn reject_peer(&self, peer: PeerId) {
        self.rejected.lock().insert(peer);
    }
}

impl PeerSignatureHandler for StubPeerSignatureHandler {
    fn verify_peer_signature(
        &self,
        _public_key: &[u8],
        peer: &PeerId,
        _signature: &[u8],
    ) -> Result<(), CapabilityError> {
        if self.rejected.lock().contains(peer) {
            return Err(CapabilityError::InvalidPeerSignature);
        }
        Ok(())
    }

    fn get_peer_signature(&self, key: &KeyPair, peer: &PeerId) -> Result<Vec<u8>, CapabilityError> {
        if self.rejected.lock().contains(peer) {
            return Err(CapabilityError::InvalidPeerSignature);
        }
        let mut signature = key.public_key().to_bytes();
        signature.resize(96, 0);
        Ok(signature)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Network
// ═══════════════════════════════════════════════════════════════════════════

/// One publish recorded by [`RecordingMessenger`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub topic: String,
    pub data: Vec<u8>,
    /// Transport identity used, `None` when sent as this node.
    pub identity: Option<PeerId>,
}

/// Messenger that records every publish.
#[derive(Clone)]
pub struct RecordingMessenger {
    id: PeerId,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl RecordingMessenger {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    /// Publishes on topics starting with `prefix`.
    pub fn sent_on(&self, prefix: &str) -> Vec<SentMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m.topic.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

impl P2pMessenger for RecordingMessenger {
    fn id(&self) -> PeerId {
        self.id.clone()
    }

    fn broadcast(&self, topic: &str, data: Vec<u8>) {
        self.sent.lock().push(SentMessage {
            topic: topic.to_string(),
            data,
            identity: None,
        });
    }

    fn broadcast_using_private_key(
        &self,
        topic: &str,
        data: Vec<u8>,
        peer: &PeerId,
        _private_key: &[u8],
    ) {
        self.sent.lock().push(SentMessage {
            topic: topic.to_string(),
            data,
            identity: Some(peer.clone()),
        });
    }
}

#[derive(Default)]
struct AntifloodState {
    deny_all: bool,
    denied_topics: HashSet<String>,
}

/// Antiflood gate that lets everything through unless told otherwise.
#[derive(Clone, Default)]
pub struct StubAntiflood {
    state: Arc<Mutex<AntifloodState>>,
}

impl StubAntiflood {
    pub fn deny_all(&self) {
        self.state.lock().deny_all = true;
    }

    pub fn deny_topic(&self, topic: &str) {
        self.state.lock().denied_topics.insert(topic.to_string());
    }
}

impl AntifloodHandler for StubAntiflood {
    fn can_process_message(&self, from: &PeerId, _size: usize) -> Result<(), CapabilityError> {
        if self.state.lock().deny_all {
            return Err(CapabilityError::Flood {
                peer: from.clone(),
                reason: "denied".into(),
            });
        }
        Ok(())
    }

    fn can_process_messages_on_topic(
        &self,
        from: &PeerId,
        topic: &str,
        _num_messages: u32,
        _total_size: usize,
    ) -> Result<(), CapabilityError> {
        if self.state.lock().denied_topics.contains(topic) {
            return Err(CapabilityError::Flood {
                peer: from.clone(),
                reason: format!("topic {topic} over budget"),
            });
        }
        Ok(())
    }
}

/// Records peer id to public key updates.
#[derive(Clone, Default)]
pub struct RecordingShardingCollector {
    pairs: Arc<Mutex<Vec<(PeerId, Vec<u8>)>>>,
}

impl RecordingShardingCollector {
    pub fn pairs(&self) -> Vec<(PeerId, Vec<u8>)> {
        self.pairs.lock().clone()
    }
}

impl NetworkShardingCollector for RecordingShardingCollector {
    fn update_peer_id_public_key_pair(&self, peer: &PeerId, public_key: &[u8]) {
        self.pairs.lock().push((peer.clone(), public_key.to_vec()));
    }
}

/// Interceptor whose handlers are triggered by the test.
#[derive(Default)]
pub struct StubInterceptor {
    handlers: Mutex<Vec<InterceptedDataHandler>>,
}

impl StubInterceptor {
    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl Interceptor for StubInterceptor {
    fn register_handler(&self, handler: InterceptedDataHandler) {
        self.handlers.lock().push(handler);
    }
}

/// Interceptors keyed by topic.
#[derive(Clone, Default)]
pub struct StubInterceptorsContainer {
    interceptors: Arc<Mutex<HashMap<String, Arc<StubInterceptor>>>>,
}

impl StubInterceptorsContainer {
    pub fn with_topic(self, topic: &str) -> Self {
        self.interceptors
            .lock()
            .insert(topic.to_string(), Arc::new(StubInterceptor::default()));
        self
    }

    pub fn interceptor(&self, topic: &str) -> Option<Arc<StubInterceptor>> {
        self.interceptors.lock().get(topic).cloned()
    }

    /// Deliver `data` to every handler registered on `topic`.
    pub fn intercept(&self, topic: &str, hash: &[u8], data: &InterceptedData) {
        let Some(interceptor) = self.interceptor(topic) else {
            return;
        };
        let handlers = interceptor.handlers.lock().clone();
        for handler in handlers {
            handler(topic, hash, data);
        }
    }
}

impl InterceptorsContainer for StubInterceptorsContainer {
    fn get(&self, topic: &str) -> Result<Arc<dyn Interceptor>, CapabilityError> {
        self.interceptor(topic)
            .map(|i| i as Arc<dyn Interceptor>)
            .ok_or_else(|| CapabilityError::UnknownTopic(topic.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Chain
// ═══════════════════════════════════════════════════════════════════════════

/// Headers pool whose notifications are triggered by the test.
#[derive(Clone, Default)]
pub struct StubHeadersPool {
    handlers: Arc<Mutex<Vec<HeaderHandler>>>,
}

impl StubHeadersPool {
    pub fn add_header(&self, header: &BlockHeader, hash: &Hash) {
        let handlers = self.handlers.lock().clone();
        for handler in handlers {
            handler(header, hash);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.lock().len()
    }
}

impl HeadersPoolSubscriber for StubHeadersPool {
    fn register_handler(&self, handler: HeaderHandler) {
        self.handlers.lock().push(handler);
    }
}

/// Block processor that counts reverts.
#[derive(Clone, Default)]
pub struct StubBlockProcessor {
    reverts: Arc<Mutex<usize>>,
}

impl StubBlockProcessor {
    pub fn reverts(&self) -> usize {
        *self.reverts.lock()
    }
}

impl BlockProcessor for StubBlockProcessor {
    fn revert_current_block(&self) {
        *self.reverts.lock() += 1;
    }
}

/// Committee selection returning a fixed group, or an error when empty.
#[derive(Clone)]
pub struct StubNodesCoordinator {
    group: Arc<Mutex<Option<ConsensusGroup>>>,
}

impl StubNodesCoordinator {
    pub fn new(group: Option<ConsensusGroup>) -> Self {
        Self {
            group: Arc::new(Mutex::new(group)),
        }
    }
}

impl NodesCoordinator for StubNodesCoordinator {
    fn compute_consensus_group(
        &self,
        _randomness: &[u8],
        round: u64,
        shard: ShardId,
        epoch: Epoch,
    ) -> Result<ConsensusGroup, CapabilityError> {
        self.group.lock().clone().ok_or_else(|| {
            CapabilityError::Committee(format!("no group for {shard} {epoch} round {round}"))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Redundancy
// ═══════════════════════════════════════════════════════════════════════════

struct RedundancyState {
    is_backup: bool,
    main_active: bool,
    reset_calls: usize,
}

/// Redundancy handler with settable flags. Defaults to a main machine.
#[derive(Clone)]
pub struct StubNodeRedundancy {
    state: Arc<Mutex<RedundancyState>>,
}

impl Default for StubNodeRedundancy {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(RedundancyState {
                is_backup: false,
                main_active: true,
                reset_calls: 0,
            })),
        }
    }
}

impl StubNodeRedundancy {
    pub fn backup(self, is_backup: bool) -> Self {
        self.state.lock().is_backup = is_backup;
        self
    }

    pub fn set_main_machine_active(&self, active: bool) {
        self.state.lock().main_active = active;
    }

    pub fn reset_calls(&self) -> usize {
        self.state.lock().reset_calls
    }
}

impl NodeRedundancyHandler for StubNodeRedundancy {
    fn is_redundancy_node(&self) -> bool {
        self.state.lock().is_backup
    }

    fn is_main_machine_active(&self) -> bool {
        self.state.lock().main_active
    }

    fn adjust_inactivity_if_needed(&self, _self_pk: &[u8], _consensus_pks: &[Vec<u8>], _round_index: i64) {}

    fn reset_inactivity_if_needed(&self, _self_pk: &[u8], _msg_pk: &[u8], _msg_peer: &PeerId) {
        self.state.lock().reset_calls += 1;
    }
}
