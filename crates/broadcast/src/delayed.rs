//! Delayed block broadcaster.
//!
//! Makes sure a produced block reaches the network even when its leader stays
//! silent.
//!
//! # Leader path
//!
//! The leader parks its block data with [`DelayedBlockBroadcaster::set_leader_data`]
//! and only broadcasts the miniblocks and transactions once a metachain header
//! notarizes the block. The pending list is bounded: overflowing it flushes
//! the oldest entry immediately.
//!
//! # Validator path
//!
//! Every committee member arms a header alarm whose duration grows with its
//! position in the committee, and, once the block is notarized, a block-data
//! alarm staggered the same way. Seeing the header or all cross-shard
//! miniblocks on the wire cancels the matching alarm. Whoever's alarm expires
//! first broadcasts; everyone above it in the ladder sees that broadcast and
//! stands down.
//!
//! # Locking
//!
//! `pending` and `headers_cache` are never held at the same time, and no lock
//! is held while calling the alarm scheduler or a broadcast handler.

use crate::config::BroadcastConfig;
use crate::topic::{miniblocks_topic, shard_header_topic, METACHAIN_BLOCKS_TOPIC};
use crate::BroadcastError;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use spos_consensus::ConsensusMetrics;
use spos_core::{
    AlarmScheduler, HeadersPoolSubscriber, InterceptedData, InterceptorsContainer,
};
use spos_types::{BlockHeader, Hash, ShardCoordinator, ShardId};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

const PREFIX_HEADER_ALARM: &str = "header_";
const PREFIX_DELAY_DATA_ALARM: &str = "delay_";

/// Encoded miniblocks by destination shard.
pub type MiniBlocksData = HashMap<ShardId, Vec<u8>>;

/// Encoded transactions by destination topic.
pub type TransactionsData = HashMap<String, Vec<Vec<u8>>>;

pub type MiniBlocksHandler =
    Arc<dyn Fn(&MiniBlocksData, &[u8]) -> Result<(), BroadcastError> + Send + Sync>;
pub type TransactionsHandler =
    Arc<dyn Fn(&TransactionsData, &[u8]) -> Result<(), BroadcastError> + Send + Sync>;
pub type HeaderBroadcastHandler =
    Arc<dyn Fn(&BlockHeader, &[u8]) -> Result<(), BroadcastError> + Send + Sync>;

/// Publish callbacks used when the broadcaster sends on its own.
#[derive(Clone)]
pub struct BroadcastHandlers {
    pub miniblocks: MiniBlocksHandler,
    pub transactions: TransactionsHandler,
    pub header: HeaderBroadcastHandler,
}

/// Block data waiting for its broadcast.
#[derive(Debug, Clone)]
pub struct DelayedBroadcastData {
    pub header_hash: Hash,
    pub header: BlockHeader,
    pub miniblocks_data: MiniBlocksData,
    pub transactions: TransactionsData,
    /// Position of the broadcasting key in the committee.
    pub order: u32,
    /// Key the data is broadcast on behalf of.
    pub public_key: Vec<u8>,
    /// Cross-shard miniblock hashes not yet seen, by miniblocks topic.
    miniblock_hashes: HashMap<String, HashSet<Vec<u8>>>,
}

impl DelayedBroadcastData {
    pub fn new(
        header_hash: Hash,
        header: BlockHeader,
        miniblocks_data: MiniBlocksData,
        transactions: TransactionsData,
        public_key: Vec<u8>,
    ) -> Self {
        Self {
            header_hash,
            header,
            miniblocks_data,
            transactions,
            order: 0,
            public_key,
            miniblock_hashes: HashMap::new(),
        }
    }

    pub fn with_order(mut self, order: u32) -> Self {
        self.order = order;
        self
    }
}

/// Header a validator broadcasts if the leader does not.
#[derive(Debug, Clone)]
pub struct ValidatorHeaderBroadcastData {
    pub header_hash: Hash,
    pub header: BlockHeader,
    /// Metachain miniblocks re-broadcast along with the header on a metachain node.
    pub meta_miniblocks_data: MiniBlocksData,
    pub meta_transactions_data: TransactionsData,
    pub order: u32,
    pub public_key: Vec<u8>,
}

/// Collaborators of the delayed broadcaster.
pub struct DelayedBroadcasterArgs {
    pub config: BroadcastConfig,
    pub shard_coordinator: Arc<dyn ShardCoordinator>,
    pub interceptors: Arc<dyn InterceptorsContainer>,
    pub headers_subscriber: Arc<dyn HeadersPoolSubscriber>,
    pub alarm: Arc<dyn AlarmScheduler>,
    pub metrics: ConsensusMetrics,
}

#[derive(Default)]
struct Pending {
    leader: Vec<DelayedBroadcastData>,
    validator: Vec<DelayedBroadcastData>,
    validator_headers: Vec<ValidatorHeaderBroadcastData>,
}

/// Notarized shard header as seen in a metachain block.
struct NotarizedHeader {
    hash: Hash,
    round: u64,
    prev_rand_seed: Vec<u8>,
}

pub struct DelayedBlockBroadcaster {
    me: Weak<Self>,
    config: BroadcastConfig,
    shard_coordinator: Arc<dyn ShardCoordinator>,
    alarm: Arc<dyn AlarmScheduler>,
    metrics: ConsensusMetrics,
    runtime: Handle,
    pending: Mutex<Pending>,
    headers_cache: Mutex<LruCache<Hash, ()>>,
    handlers: RwLock<Option<BroadcastHandlers>>,
    closed: AtomicBool,
}

impl DelayedBlockBroadcaster {
    /// Create the broadcaster and register it with the headers pool and the
    /// header and miniblock interceptors.
    pub fn new(args: DelayedBroadcasterArgs) -> Result<Arc<Self>, BroadcastError> {
        args.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| BroadcastError::NoRuntime)?;
        let capacity = NonZeroUsize::new(args.config.headers_cache_size)
            .ok_or_else(|| BroadcastError::InvalidConfig("headers cache size is zero".into()))?;

        let broadcaster = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config: args.config,
            shard_coordinator: args.shard_coordinator,
            alarm: args.alarm,
            metrics: args.metrics,
            runtime,
            pending: Mutex::new(Pending::default()),
            headers_cache: Mutex::new(LruCache::new(capacity)),
            handlers: RwLock::new(None),
            closed: AtomicBool::new(false),
        });

        let me = Arc::downgrade(&broadcaster);
        args.headers_subscriber
            .register_handler(Arc::new(move |header: &BlockHeader, hash: &Hash| {
                if let Some(dbb) = me.upgrade() {
                    dbb.header_received(header, hash);
                }
            }));
        broadcaster.register_header_interceptor(args.interceptors.as_ref())?;
        broadcaster.register_miniblock_interceptors(args.interceptors.as_ref())?;

        Ok(broadcaster)
    }

    pub fn set_broadcast_handlers(&self, handlers: BroadcastHandlers) {
        *self.handlers.write() = Some(handlers);
    }

    /// Park the leader's block data until a metachain header notarizes it.
    pub fn set_leader_data(&self, data: DelayedBroadcastData) {
        trace!(header_hash = %data.header_hash, "Setting leader delay data");

        let mut flush = Vec::new();
        {
            let mut pending = self.pending.lock();
            pending.leader.push(data);
            if pending.leader.len() > self.config.leader_cache_size {
                let oldest = pending.leader.remove(0);
                debug!(
                    header_hash = %oldest.header_hash,
                    pending = pending.leader.len(),
                    max = self.config.leader_cache_size,
                    "Leader broadcasts old data before notarization, too much delay data"
                );
                flush.push(oldest);
            }
        }

        self.broadcast_delayed_data(flush);
    }

    /// Arm the header failover alarm. Unsigned headers, headers already
    /// seen on the wire and headers already armed are ignored.
    ///
    /// At most `validator_cache_size` headers stay armed; the oldest one is
    /// dropped and its alarm canceled when the cap is exceeded.
    pub fn set_header_for_validator(&self, data: ValidatorHeaderBroadcastData) {
        if self.closed.load(Ordering::Acquire) {
            trace!(header_hash = %data.header_hash, "Header alarm not set, broadcaster closed");
            return;
        }
        if data.header.signature().is_empty() {
            trace!(order = data.order, "Header alarm not set, header is not final");
            return;
        }
        if self.headers_cache.lock().contains(&data.header_hash) {
            trace!(header_hash = %data.header_hash, "Header alarm not set, header already received");
            return;
        }

        let duration = self.config.validator_delay_per_order() * data.order;
        let alarm_id = header_alarm_id(&data.header_hash);
        let order = data.order;

        let evicted = {
            let mut pending = self.pending.lock();
            let headers = &mut pending.validator_headers;
            if headers.iter().any(|entry| entry.header_hash == data.header_hash) {
                trace!(%alarm_id, "Header alarm already set");
                return;
            }
            headers.push(data);
            if headers.len() > self.config.validator_cache_size {
                let oldest = headers.remove(0);
                debug!(
                    header_hash = %oldest.header_hash,
                    pending = headers.len(),
                    max = self.config.validator_cache_size,
                    "Cancelling old header alarm, too many armed headers"
                );
                Some(header_alarm_id(&oldest.header_hash))
            } else {
                None
            }
        };

        if let Some(old_alarm) = evicted {
            self.alarm.cancel(&old_alarm);
        }
        trace!(order, %alarm_id, ?duration, "Header alarm set");
        self.add_alarm(alarm_id, duration, Self::header_alarm_expired);
    }

    /// Keep the validator's block data until the block is notarized.
    pub fn set_validator_data(&self, mut data: DelayedBroadcastData) {
        if self.closed.load(Ordering::Acquire) {
            trace!(header_hash = %data.header_hash, "Validator data dropped, broadcaster closed");
            return;
        }
        trace!(
            header_hash = %data.header_hash,
            round = data.header.round(),
            "Setting validator delay data"
        );
        data.miniblock_hashes = self.cross_miniblock_hashes_from_me(&data.header);

        let mut to_cancel = Vec::new();
        {
            let mut pending = self.pending.lock();
            pending.validator.push(data);
            if pending.validator.len() > self.config.validator_cache_size {
                let oldest = pending.validator.remove(0);
                debug!(
                    header_hash = %oldest.header_hash,
                    pending = pending.validator.len(),
                    max = self.config.validator_cache_size,
                    "Cancelling old alarms, too much validator delay data"
                );
                pending
                    .validator_headers
                    .retain(|entry| entry.header_hash != oldest.header_hash);
                to_cancel.push(header_alarm_id(&oldest.header_hash));
                to_cancel.push(delay_alarm_id(&oldest.header_hash));
            }
        }

        for id in to_cancel {
            self.alarm.cancel(&id);
        }
    }

    /// Disarm every alarm. Validator entries are dropped and later ones
    /// ignored.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        {
            let mut pending = self.pending.lock();
            pending.validator.clear();
            pending.validator_headers.clear();
        }
        self.alarm.close();
    }

    pub fn leader_pending(&self) -> usize {
        self.pending.lock().leader.len()
    }

    pub fn validator_pending(&self) -> usize {
        self.pending.lock().validator.len()
    }

    pub fn validator_headers_pending(&self) -> usize {
        self.pending.lock().validator_headers.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Notifications
    // ═══════════════════════════════════════════════════════════════════════

    fn header_received(&self, header: &BlockHeader, header_hash: &Hash) {
        {
            let pending = self.pending.lock();
            if pending.leader.is_empty() && pending.validator.is_empty() {
                return;
            }
        }
        if header.shard_id() != ShardId::METACHAIN {
            return;
        }

        let notarized = self.notarized_for_self(header);
        if notarized.is_empty() {
            trace!(%header_hash, "Metachain header has no shard data for this shard");
            return;
        }
        for entry in &notarized {
            trace!(header_hash = %entry.hash, round = entry.round, "Notarized header");
        }

        self.schedule_validator_broadcast(&notarized);

        let hashes: Vec<Hash> = notarized.into_iter().map(|n| n.hash).collect();
        let Some(me) = self.me.upgrade() else {
            return;
        };
        self.runtime.spawn(async move {
            me.broadcast_data_for_headers(hashes).await;
        });
    }

    fn intercepted_header(&self, topic: &str, hash: &[u8], data: &InterceptedData) {
        let InterceptedData::Header(header) = data else {
            warn!(topic, hash = %hex::encode(hash), "Intercepted data on header topic is not a header");
            return;
        };
        let Some(header_hash) = Hash::from_hash_bytes(hash) else {
            warn!(topic, hash = %hex::encode(hash), "Intercepted header with malformed hash");
            return;
        };

        self.headers_cache.lock().put(header_hash, ());
        trace!(
            %header_hash,
            round = header.round(),
            "Intercepted header"
        );

        let cancel = {
            let mut pending = self.pending.lock();
            let position = pending.validator_headers.iter().position(|entry| {
                entry.header.round() == header.round()
                    && entry.header.prev_rand_seed() == header.prev_rand_seed()
            });
            position.map(|i| pending.validator_headers.remove(i))
        };

        if let Some(entry) = cancel {
            let alarm_id = header_alarm_id(&entry.header_hash);
            trace!(%header_hash, %alarm_id, "Header seen on the wire, cancelling alarm");
            self.alarm.cancel(&alarm_id);
        }
    }

    fn intercepted_miniblock(&self, topic: &str, hash: &[u8]) {
        trace!(topic, miniblock_hash = %hex::encode(hash), "Intercepted miniblock");

        let mut to_cancel = Vec::new();
        {
            let mut pending = self.pending.lock();
            pending.validator.retain_mut(|entry| {
                if let Some(outstanding) = entry.miniblock_hashes.get_mut(topic) {
                    outstanding.remove(hash);
                    if outstanding.is_empty() {
                        entry.miniblock_hashes.remove(topic);
                    }
                }
                if entry.miniblock_hashes.is_empty() {
                    to_cancel.push(delay_alarm_id(&entry.header_hash));
                    false
                } else {
                    true
                }
            });
        }

        for alarm_id in to_cancel {
            trace!(%alarm_id, "Block data seen on the wire, cancelling alarm");
            self.alarm.cancel(&alarm_id);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Alarms
    // ═══════════════════════════════════════════════════════════════════════

    fn add_alarm(&self, alarm_id: String, duration: Duration, on_expiry: fn(&Self, &str)) {
        let me = self.me.clone();
        self.alarm.add(
            Box::new(move |id| {
                if let Some(dbb) = me.upgrade() {
                    on_expiry(&dbb, &id);
                }
            }),
            duration,
            alarm_id,
        );
    }

    fn schedule_validator_broadcast(&self, notarized: &[NotarizedHeader]) {
        let alarms: Vec<(String, Duration)> = {
            let pending = self.pending.lock();
            let validator = &pending.validator;
            if validator.is_empty() {
                return;
            }
            notarized
                .iter()
                .flat_map(|header| {
                    validator.iter().filter(move |data| {
                        data.header.round() == header.round
                            && data.header.prev_rand_seed() == header.prev_rand_seed.as_slice()
                    })
                })
                .map(|data| {
                    let duration = self.config.validator_delay_per_order() * data.order
                        + self.config.extra_delay_for_broadcast_block_info();
                    trace!(
                        header_hash = %data.header_hash,
                        order = data.order,
                        ?duration,
                        "Scheduling block data broadcast for notarized header"
                    );
                    (delay_alarm_id(&data.header_hash), duration)
                })
                .collect()
        };

        for (alarm_id, duration) in alarms {
            self.add_alarm(alarm_id, duration, Self::delay_alarm_expired);
        }
    }

    fn delay_alarm_expired(&self, alarm_id: &str) {
        let Some(header_hash) = parse_alarm_id(alarm_id, PREFIX_DELAY_DATA_ALARM) else {
            warn!(alarm_id, "Malformed block data alarm id");
            return;
        };

        let data = {
            let mut pending = self.pending.lock();
            let position = pending
                .validator
                .iter()
                .position(|data| data.header_hash == header_hash);
            position.map(|i| pending.validator.remove(i))
        };

        if let Some(data) = data {
            debug!(%header_hash, alarm_id, "Validator broadcasts block data instead of leader");
            self.metrics.delayed_broadcasts_fired.inc();
            self.broadcast_delayed_data(vec![data]);
        }
    }

    fn header_alarm_expired(&self, alarm_id: &str) {
        let Some(header_hash) = parse_alarm_id(alarm_id, PREFIX_HEADER_ALARM) else {
            warn!(alarm_id, "Malformed header alarm id");
            return;
        };

        let data = {
            let mut pending = self.pending.lock();
            let position = pending
                .validator_headers
                .iter()
                .position(|data| data.header_hash == header_hash);
            position.map(|i| pending.validator_headers.remove(i))
        };
        let Some(data) = data else {
            debug!(%header_hash, alarm_id, "Header alarm expired without data");
            return;
        };

        let Some(handlers) = self.handlers.read().clone() else {
            warn!(%header_hash, "Header alarm expired before broadcast handlers were set");
            return;
        };

        debug!(%header_hash, alarm_id, order = data.order, "Validator broadcasting header");
        self.metrics.delayed_broadcasts_fired.inc();
        if let Err(e) = (handlers.header)(&data.header, &data.public_key) {
            warn!(error = %e, %header_hash, alarm_id, "Header broadcast failed");
        }

        if self.shard_coordinator.is_metachain() {
            debug!(%header_hash, "Validator broadcasting meta miniblocks and transactions");
            self.spawn_block_data(
                handlers,
                data.meta_miniblocks_data,
                data.meta_transactions_data,
                data.public_key,
                self.config.extra_delay_for_broadcast_block_info(),
            );
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Broadcasting
    // ═══════════════════════════════════════════════════════════════════════

    async fn broadcast_data_for_headers(&self, header_hashes: Vec<Hash>) {
        if self.pending.lock().leader.is_empty() {
            return;
        }

        tokio::time::sleep(self.config.extra_delay_for_broadcast_block_info()).await;

        let flush = {
            let mut pending = self.pending.lock();
            let newest_match = pending
                .leader
                .iter()
                .rposition(|data| header_hashes.contains(&data.header_hash));
            match newest_match {
                Some(i) => {
                    debug!(header_hash = %pending.leader[i].header_hash, "Leader broadcasts block data");
                    pending.leader.drain(..=i).collect()
                }
                None => Vec::new(),
            }
        };

        self.broadcast_delayed_data(flush);
    }

    fn broadcast_delayed_data(&self, entries: Vec<DelayedBroadcastData>) {
        if entries.is_empty() {
            return;
        }
        let Some(handlers) = self.handlers.read().clone() else {
            warn!(entries = entries.len(), "Delayed data dropped, broadcast handlers not set");
            return;
        };
        for data in entries {
            self.spawn_block_data(
                handlers.clone(),
                data.miniblocks_data,
                data.transactions,
                data.public_key,
                Duration::ZERO,
            );
        }
    }

    fn spawn_block_data(
        &self,
        handlers: BroadcastHandlers,
        miniblocks: MiniBlocksData,
        transactions: TransactionsData,
        public_key: Vec<u8>,
        delay: Duration,
    ) {
        let between = self.config.extra_delay_between_broadcast_mbs_and_txs();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = (handlers.miniblocks)(&miniblocks, &public_key) {
                warn!(error = %e, "Delayed miniblocks broadcast failed");
            }
            tokio::time::sleep(between).await;
            if let Err(e) = (handlers.transactions)(&transactions, &public_key) {
                warn!(error = %e, "Delayed transactions broadcast failed");
            }
        });
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    fn notarized_for_self(&self, meta_header: &BlockHeader) -> Vec<NotarizedHeader> {
        let self_id = self.shard_coordinator.self_id();
        meta_header
            .shard_info()
            .iter()
            .filter(|info| info.shard_id == self_id)
            .map(|info| NotarizedHeader {
                hash: info.header_hash,
                round: info.round,
                prev_rand_seed: info.prev_rand_seed.clone(),
            })
            .collect()
    }

    fn cross_miniblock_hashes_from_me(
        &self,
        header: &BlockHeader,
    ) -> HashMap<String, HashSet<Vec<u8>>> {
        let coordinator = self.shard_coordinator.as_ref();
        let self_id = coordinator.self_id();

        let mut destinations: Vec<ShardId> = coordinator
            .shard_ids()
            .into_iter()
            .filter(|shard| *shard != self_id)
            .collect();
        if !coordinator.is_metachain() {
            destinations.push(ShardId::METACHAIN);
        }

        destinations
            .into_iter()
            .filter_map(|destination| {
                let hashes: HashSet<Vec<u8>> = header
                    .final_cross_miniblock_hashes(destination)
                    .into_iter()
                    .map(Hash::to_vec)
                    .collect();
                (!hashes.is_empty())
                    .then(|| (miniblocks_topic(coordinator, destination), hashes))
            })
            .collect()
    }

    fn register_header_interceptor(
        &self,
        container: &dyn InterceptorsContainer,
    ) -> Result<(), BroadcastError> {
        let topic = if self.shard_coordinator.is_metachain() {
            METACHAIN_BLOCKS_TOPIC.to_string()
        } else {
            shard_header_topic(self.shard_coordinator.as_ref())
        };
        let me = self.me.clone();
        container.get(&topic)?.register_handler(Arc::new(
            move |topic: &str, hash: &[u8], data: &InterceptedData| {
                if let Some(dbb) = me.upgrade() {
                    dbb.intercepted_header(topic, hash, data);
                }
            },
        ));
        Ok(())
    }

    fn register_miniblock_interceptors(
        &self,
        container: &dyn InterceptorsContainer,
    ) -> Result<(), BroadcastError> {
        let coordinator = self.shard_coordinator.as_ref();
        let topics: Vec<String> = if coordinator.is_metachain() {
            vec![miniblocks_topic(coordinator, ShardId::ALL)]
        } else {
            coordinator
                .shard_ids()
                .into_iter()
                .filter(|shard| *shard != coordinator.self_id())
                .chain(std::iter::once(ShardId::METACHAIN))
                .map(|shard| miniblocks_topic(coordinator, shard))
                .collect()
        };

        for topic in topics {
            let me = self.me.clone();
            container.get(&topic)?.register_handler(Arc::new(
                move |topic: &str, hash: &[u8], _: &InterceptedData| {
                    if let Some(dbb) = me.upgrade() {
                        dbb.intercepted_miniblock(topic, hash);
                    }
                },
            ));
        }
        Ok(())
    }
}

fn header_alarm_id(hash: &Hash) -> String {
    format!("{PREFIX_HEADER_ALARM}{}", hash.to_hex())
}

fn delay_alarm_id(hash: &Hash) -> String {
    format!("{PREFIX_DELAY_DATA_ALARM}{}", hash.to_hex())
}

fn parse_alarm_id(alarm_id: &str, prefix: &str) -> Option<Hash> {
    Hash::from_hex(alarm_id.strip_prefix(prefix)?).ok()
}
