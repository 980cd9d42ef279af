//! Consensus message pump.
//!
//! Inbound messages go through the antiflood gate, decoding, self-state
//! filtering and validation, then wait in a per-kind buffer until the
//! subround gating their kind has finished. Ready messages are handed to a
//! single consumer task which runs the callbacks registered for their kind
//! and wakes the running subround when any callback reports progress.

use crate::chronology::RoundRolloverFn;
use crate::config::ConsensusConfig;
use crate::consensus_state::ConsensusState;
use crate::error::display_bytes;
use crate::invalid_signers::InvalidSignersCache;
use crate::metrics::ConsensusMetrics;
use crate::subround::ExtendFn;
use crate::validator::ConsensusMessageValidator;
use crate::ConsensusError;
use parking_lot::{Mutex, RwLock};
use spos_core::{
    AntifloodHandler, BlockProcessor, HeaderHandler, NetworkShardingCollector,
    NodeRedundancyHandler, P2pMessage, PeerSignatureHandler, RoundHandler,
};
use spos_messages::{decode_message, ConsensusMessage, MessageKind, MessageSchema, SubroundId};
use spos_types::{BlockHeader, Hash, HeaderProof, PeerId, ShardCoordinator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Handles a message of one kind. Returns true when consensus state changed.
pub type ReceivedMessageCallback = Arc<dyn Fn(&ConsensusMessage) -> bool + Send + Sync>;
/// Observer of headers for the current round.
pub type ReceivedHeaderHandler = Arc<dyn Fn(&BlockHeader) + Send + Sync>;
/// Observer of equivalent proofs.
pub type ReceivedProofHandler = Arc<dyn Fn(&HeaderProof) + Send + Sync>;

/// Poll interval while waiting for block processing to finish before a revert.
const PROCESSING_BLOCK_POLL: Duration = Duration::from_millis(1);

/// Collaborators of the worker.
pub struct WorkerArgs {
    pub config: ConsensusConfig,
    pub consensus_state: Arc<ConsensusState>,
    pub round_handler: Arc<dyn RoundHandler>,
    pub peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    pub antiflood: Arc<dyn AntifloodHandler>,
    pub sharding_collector: Arc<dyn NetworkShardingCollector>,
    pub redundancy: Arc<dyn NodeRedundancyHandler>,
    pub block_processor: Arc<dyn BlockProcessor>,
    pub shard_coordinator: Arc<dyn ShardCoordinator>,
    pub metrics: ConsensusMetrics,
    /// Shared with the subrounds; fired when a callback reports progress.
    pub state_changed: Arc<Notify>,
}

struct Shared {
    chain_id: Vec<u8>,
    consensus_state: Arc<ConsensusState>,
    round_handler: Arc<dyn RoundHandler>,
    antiflood: Arc<dyn AntifloodHandler>,
    sharding_collector: Arc<dyn NetworkShardingCollector>,
    redundancy: Arc<dyn NodeRedundancyHandler>,
    block_processor: Arc<dyn BlockProcessor>,
    shard_coordinator: Arc<dyn ShardCoordinator>,
    metrics: ConsensusMetrics,
    state_changed: Arc<Notify>,
    validator: ConsensusMessageValidator,
    invalid_signers: InvalidSignersCache,

    received_messages: Mutex<HashMap<MessageKind, Vec<ConsensusMessage>>>,
    callbacks: RwLock<HashMap<MessageKind, Vec<ReceivedMessageCallback>>>,
    header_handlers: RwLock<Vec<ReceivedHeaderHandler>>,
    proof_handlers: RwLock<Vec<ReceivedProofHandler>>,
    execute_tx: mpsc::UnboundedSender<ConsensusMessage>,
}

/// Receives, validates and dispatches consensus messages.
pub struct Worker {
    shared: Arc<Shared>,
    execute_rx: Mutex<Option<mpsc::UnboundedReceiver<ConsensusMessage>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(args: WorkerArgs) -> Result<Self, ConsensusError> {
        args.config.validate()?;

        let validator = ConsensusMessageValidator::new(
            &args.config,
            args.consensus_state.clone(),
            args.peer_signature_handler,
        )?;
        let invalid_signers = InvalidSignersCache::new(args.config.invalid_signers_cache_size)?;
        let (execute_tx, execute_rx) = mpsc::unbounded_channel();

        let shared = Shared {
            chain_id: args.config.chain_id_bytes(),
            consensus_state: args.consensus_state,
            round_handler: args.round_handler,
            antiflood: args.antiflood,
            sharding_collector: args.sharding_collector,
            redundancy: args.redundancy,
            block_processor: args.block_processor,
            shard_coordinator: args.shard_coordinator,
            metrics: args.metrics,
            state_changed: args.state_changed,
            validator,
            invalid_signers,
            received_messages: Mutex::new(HashMap::new()),
            callbacks: RwLock::new(HashMap::new()),
            header_handlers: RwLock::new(Vec::new()),
            proof_handlers: RwLock::new(Vec::new()),
            execute_tx,
        };
        let worker = Self {
            shared: Arc::new(shared),
            execute_rx: Mutex::new(Some(execute_rx)),
            consumer: Mutex::new(None),
        };
        worker.init_received_messages();
        Ok(worker)
    }

    /// Spawn the consumer task. Calling it twice has no effect.
    pub fn start_working(&self) {
        let Some(mut rx) = self.execute_rx.lock().take() else {
            return;
        };
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                shared.dispatch(msg);
            }
            debug!("Worker consumer stopped");
        });
        *self.consumer.lock() = Some(handle);
    }

    /// Stop the consumer task.
    pub fn close(&self) {
        if let Some(handle) = self.consumer.lock().take() {
            handle.abort();
        }
    }

    pub fn consensus_state(&self) -> &Arc<ConsensusState> {
        &self.shared.consensus_state
    }

    pub fn validator(&self) -> &ConsensusMessageValidator {
        &self.shared.validator
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Registration
    // ═══════════════════════════════════════════════════════════════════════

    /// Empty every per-kind buffer.
    pub fn init_received_messages(&self) {
        let mut buffers = self.shared.received_messages.lock();
        buffers.clear();
        for kind in MessageKind::ALL {
            buffers.insert(kind, Vec::new());
        }
    }

    /// Buffered messages of `kind`.
    pub fn received_messages(&self, kind: MessageKind) -> Vec<ConsensusMessage> {
        self.shared
            .received_messages
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_received_message_call(&self, kind: MessageKind, callback: ReceivedMessageCallback) {
        self.shared
            .callbacks
            .write()
            .entry(kind)
            .or_default()
            .push(callback);
    }

    pub fn remove_all_received_message_calls(&self) {
        self.shared.callbacks.write().clear();
    }

    pub fn add_received_header_handler(&self, handler: ReceivedHeaderHandler) {
        self.shared.header_handlers.write().push(handler);
    }

    pub fn remove_all_received_header_handlers(&self) {
        self.shared.header_handlers.write().clear();
    }

    pub fn add_received_proof_handler(&self, handler: ReceivedProofHandler) {
        self.shared.proof_handlers.write().push(handler);
    }

    pub fn remove_all_received_proof_handlers(&self) {
        self.shared.proof_handlers.write().clear();
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inbound pipeline
    // ═══════════════════════════════════════════════════════════════════════

    /// Run an inbound transport message through the pipeline.
    ///
    /// Returns the id of the buffered message, the hash of its transport
    /// payload. Messages from our own keys and messages for a canceled round
    /// are dropped without an error and yield `None`.
    pub fn process_received_message(
        &self,
        message: &P2pMessage,
        from_connected_peer: &PeerId,
    ) -> Result<Option<Hash>, ConsensusError> {
        let result = self.shared.process(message, from_connected_peer);
        if let Err(e) = &result {
            trace!(
                peer = %message.peer,
                topic = %message.topic,
                error = %e,
                "Consensus message rejected"
            );
            self.shared.metrics.record_rejected(e);
        }
        result
    }

    /// Replay buffered messages whose round and gating subround allow it.
    pub fn execute_stored_messages(&self) {
        self.shared.execute_stored_messages();
    }

    /// Closure form of [`Worker::execute_stored_messages`] for the subrounds.
    pub fn execute_stored_messages_fn(&self) -> Arc<dyn Fn() + Send + Sync> {
        let shared = self.shared.clone();
        Arc::new(move || shared.execute_stored_messages())
    }

    /// Header from the headers pool. Only headers of our shard for the
    /// current round reach the observers.
    pub fn received_header(&self, header: &BlockHeader, _hash: &Hash) {
        self.shared.received_header(header);
    }

    /// Handler to register on the headers pool.
    pub fn headers_pool_handler(&self) -> HeaderHandler {
        let shared = self.shared.clone();
        Arc::new(move |header: &BlockHeader, _hash: &Hash| shared.received_header(header))
    }

    pub fn received_proof(&self, proof: &HeaderProof) {
        let handlers = self.shared.proof_handlers.read().clone();
        for handler in handlers {
            handler(proof);
        }
    }

    /// Sync status from the bootstrapper. Reaching sync wakes the subround.
    pub fn received_sync_state(&self, is_node_synchronized: bool) {
        if is_node_synchronized {
            self.shared.state_changed.notify_one();
        }
    }

    /// Called when `subround` timed out.
    pub fn extend(&self, subround: SubroundId) {
        self.shared.extend(subround);
    }

    /// Closure form of [`Worker::extend`] for the subrounds.
    pub fn extend_fn(&self) -> ExtendFn {
        let shared = self.shared.clone();
        Arc::new(move |subround| shared.extend(subround))
    }

    /// Forget per-round counters and invalid-signers claims.
    pub fn reset_consensus_messages(&self) {
        self.shared.reset_consensus_messages();
    }

    /// Hook for [`crate::Chronology::add_round_rollover_hook`]: clears the
    /// per-round caches and replays messages buffered for the new round.
    pub fn round_rollover_fn(&self) -> RoundRolloverFn {
        let shared = self.shared.clone();
        Arc::new(move |round: i64| {
            shared.reset_consensus_messages();
            debug!(round, "Worker caches reset for new round");
            shared.execute_stored_messages();
        })
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn reset_consensus_messages(&self) {
        self.validator.reset_consensus_messages();
        self.invalid_signers.reset();
    }

    fn process(
        &self,
        message: &P2pMessage,
        from_connected_peer: &PeerId,
    ) -> Result<Option<Hash>, ConsensusError> {
        self.antiflood
            .can_process_message(from_connected_peer, message.data.len())
            .map_err(ConsensusError::FloodDetected)?;
        self.antiflood
            .can_process_messages_on_topic(&message.peer, &message.topic, 1, message.data.len())
            .map_err(ConsensusError::FloodDetected)?;

        if message.data.is_empty() {
            return Err(ConsensusError::NilDataToProcess);
        }
        if message.signature.is_empty() {
            return Err(ConsensusError::NilSignatureOnP2pMessage);
        }

        let msg = decode_message(&message.data)?;
        let committee = self.consensus_state.committee();

        self.redundancy.reset_inactivity_if_needed(
            &committee.self_pub_key(),
            &msg.public_key,
            &message.peer,
        );

        if !self.check_self_state(&msg) {
            return Ok(None);
        }

        self.validator
            .check_consensus_message_validity(&msg, &message.peer)?;

        let kind = msg
            .kind()
            .ok_or(ConsensusError::InvalidMessageType(msg.msg_type))?;

        if kind.carries_header() {
            self.check_block_header(&msg)?;
        }

        if kind == MessageKind::InvalidSigners {
            self.check_invalid_signers(&msg)?;
        }

        self.sharding_collector
            .update_peer_id_public_key_pair(&message.peer, &msg.public_key);
        self.metrics.record_processed(kind);

        trace!(
            kind = %kind,
            round = msg.round_index,
            from = %display_bytes(&msg.public_key),
            "Consensus message accepted"
        );

        self.received_messages
            .lock()
            .entry(kind)
            .or_default()
            .push(msg);
        self.execute_stored_messages();
        Ok(Some(Hash::from_bytes(&message.data)))
    }

    /// False when the message must be ignored: it comes from one of our own
    /// keys, or the round it belongs to was canceled.
    fn check_self_state(&self, msg: &ConsensusMessage) -> bool {
        let committee = self.consensus_state.committee();
        if msg.public_key == committee.self_pub_key() || committee.is_key_managed_by_self(&msg.public_key) {
            trace!(from = %display_bytes(&msg.public_key), "Message from self ignored");
            return false;
        }
        if self.consensus_state.round_canceled()
            && self.consensus_state.round_index() == msg.round_index
        {
            trace!(round = msg.round_index, "Message for canceled round ignored");
            return false;
        }
        true
    }

    fn check_block_header(&self, msg: &ConsensusMessage) -> Result<(), ConsensusError> {
        let bytes = msg.header.as_deref().unwrap_or_default();
        let header =
            BlockHeader::decode(bytes).map_err(|e| ConsensusError::InvalidHeader(e.to_string()))?;

        let computed = Hash::from_bytes(bytes);
        if let Some(expected) = msg.header_hash() {
            if expected != computed.as_bytes() {
                return Err(ConsensusError::WrongHashForHeader {
                    expected: hex::encode(expected),
                    computed: computed.to_hex(),
                });
            }
        }

        if header.chain_id() != self.chain_id.as_slice() {
            return Err(ConsensusError::InvalidChainId(display_bytes(header.chain_id())));
        }

        self.observe_proposed_block_delay(msg, &header);

        let handlers = self.header_handlers.read().clone();
        for handler in handlers {
            handler(&header);
        }
        Ok(())
    }

    fn observe_proposed_block_delay(&self, msg: &ConsensusMessage, header: &BlockHeader) {
        if !self
            .consensus_state
            .is_node_leader_in_current_round(&msg.public_key)
        {
            return;
        }
        if header.round() as i64 != self.round_handler.index() {
            return;
        }
        let delay = Instant::now().saturating_duration_since(self.round_handler.time_stamp());
        self.metrics.observe_proposed_block_delay(delay);
    }

    fn check_invalid_signers(&self, msg: &ConsensusMessage) -> Result<(), ConsensusError> {
        let header_hash = msg.header_hash().unwrap_or_default();
        let payload = msg.invalid_signers.as_deref().unwrap_or_default();
        if self.invalid_signers.check_known(header_hash, payload) {
            return Err(ConsensusError::InvalidSignersAlreadyReceived(display_bytes(
                header_hash,
            )));
        }
        self.invalid_signers.add(header_hash, payload);
        Ok(())
    }

    fn execute_stored_messages(&self) {
        let local = self.consensus_state.round_index();
        let schema: &MessageSchema = self.validator.schema();
        let mut buffers = self.received_messages.lock();

        for kind in MessageKind::ALL {
            let Some(pending) = buffers.get_mut(&kind) else {
                continue;
            };
            if pending.is_empty() {
                continue;
            }
            let ready = schema.can_proceed(kind, |subround| {
                self.consensus_state.is_subround_finished(subround)
            });

            let mut kept = Vec::with_capacity(pending.len());
            for msg in pending.drain(..) {
                if msg.round_index < local {
                    continue;
                }
                if msg.round_index == local && ready {
                    if self.execute_tx.send(msg).is_err() {
                        warn!("Worker consumer is gone, dropping message");
                    }
                    continue;
                }
                kept.push(msg);
            }
            *pending = kept;
        }
    }

    fn dispatch(&self, msg: ConsensusMessage) {
        let local = self.consensus_state.round_index();
        let Some(kind) = msg.kind() else {
            return;
        };

        // Only reachable when the round handler stepped back a round after
        // the message was queued.
        if msg.round_index > local {
            self.received_messages
                .lock()
                .entry(kind)
                .or_default()
                .push(msg);
            return;
        }
        if msg.round_index < local {
            trace!(kind = %kind, round = msg.round_index, local, "Dropping message for past round");
            return;
        }

        let callbacks = self
            .callbacks
            .read()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        let mut changed = false;
        for callback in callbacks {
            changed |= callback(&msg);
        }
        if changed {
            self.state_changed.notify_one();
        }
    }

    fn received_header(&self, header: &BlockHeader) {
        if header.shard_id() != self.shard_coordinator.self_id() {
            return;
        }
        if header.round() as i64 != self.round_handler.index() {
            return;
        }
        let delay = Instant::now().saturating_duration_since(self.round_handler.time_stamp());
        self.metrics.observe_proposed_block_delay(delay);

        let handlers = self.header_handlers.read().clone();
        for handler in handlers {
            handler(header);
        }
    }

    fn extend(self: &Arc<Self>, subround: SubroundId) {
        self.consensus_state.set_extended_called(true);
        debug!(subround = %subround, "Extend function is called");

        if subround == SubroundId::StartRound {
            return;
        }

        if !self.consensus_state.processing_block() {
            debug!("Account state is reverted to snapshot");
            self.block_processor.revert_current_block();
            return;
        }

        let shared = self.clone();
        tokio::spawn(async move {
            while shared.consensus_state.processing_block() {
                tokio::time::sleep(PROCESSING_BLOCK_POLL).await;
            }
            debug!("Account state is reverted to snapshot");
            shared.block_processor.revert_current_block();
        });
    }
}
