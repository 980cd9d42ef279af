//! Per-peer antiflood gate for inbound consensus traffic.
//!
//! Uses a token bucket per peer for message counts and a second bucket per
//! (peer, topic) for batched deliveries. Committee members get higher limits
//! than unknown peers.

use crate::config::ConfigError;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use spos_core::{AntifloodHandler, CapabilityError};
use spos_types::PeerId;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Configuration for the antiflood gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntifloodConfig {
    /// Messages per second accepted from a committee member.
    pub validator_messages_per_sec: u32,
    /// Bucket capacity for committee members.
    pub validator_burst: u32,
    /// Messages per second accepted from any other peer.
    pub unknown_peer_messages_per_sec: u32,
    /// Bucket capacity for any other peer.
    pub unknown_peer_burst: u32,
    /// Messages per second accepted per peer on a single topic.
    pub topic_messages_per_sec: u32,
    /// Bucket capacity per peer and topic.
    pub topic_burst: u32,
    /// Largest single message accepted, in bytes.
    pub max_message_size: usize,
    /// Seconds a silent peer stays tracked.
    pub peer_ttl_secs: u64,
}

impl Default for AntifloodConfig {
    fn default() -> Self {
        Self {
            // Committee members send a handful of messages per round per key,
            // multi-key nodes many more
            validator_messages_per_sec: 200,
            validator_burst: 400,
            unknown_peer_messages_per_sec: 10,
            unknown_peer_burst: 20,
            topic_messages_per_sec: 100,
            topic_burst: 200,
            max_message_size: 1 << 20,
            peer_ttl_secs: 300,
        }
    }
}

impl AntifloodConfig {
    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("validator_burst", self.validator_burst),
            ("unknown_peer_burst", self.unknown_peer_burst),
            ("topic_burst", self.topic_burst),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Antiflood(format!("{name} must be positive")));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Antiflood(
                "max_message_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Token bucket state for a single peer or (peer, topic) pair.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens added per second.
    refill_rate: f64,
    last_update: Instant,
    last_request: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_rate: u32) -> Self {
        let now = Instant::now();
        Self {
            tokens: capacity as f64,
            capacity: capacity as f64,
            refill_rate: refill_rate as f64,
            last_update: now,
            last_request: now,
        }
    }

    /// Take `amount` tokens if available.
    fn try_consume(&mut self, amount: u32) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_update = now;
        self.last_request = now;

        let amount = amount as f64;
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.last_request.elapsed() > ttl
    }
}

struct Buckets {
    peers: HashMap<PeerId, TokenBucket>,
    topics: HashMap<(PeerId, String), TokenBucket>,
    last_cleanup: Instant,
}

/// Antiflood gate backed by token buckets.
pub struct TokenBucketAntiflood {
    config: AntifloodConfig,
    committee: RwLock<HashSet<PeerId>>,
    buckets: Mutex<Buckets>,
}

impl TokenBucketAntiflood {
    pub fn new(config: AntifloodConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            committee: RwLock::new(HashSet::new()),
            buckets: Mutex::new(Buckets {
                peers: HashMap::new(),
                topics: HashMap::new(),
                last_cleanup: Instant::now(),
            }),
        })
    }

    /// Replace the set of peers treated as committee members.
    ///
    /// Buckets already created keep their limits until they go stale.
    pub fn set_committee_peers(&self, peers: impl IntoIterator<Item = PeerId>) {
        let mut committee = self.committee.write();
        committee.clear();
        committee.extend(peers);
        debug!(peers = committee.len(), "Antiflood committee updated");
    }

    pub fn tracked_peer_count(&self) -> usize {
        self.buckets.lock().peers.len()
    }

    fn cleanup_if_due(&self, buckets: &mut Buckets) {
        if buckets.last_cleanup.elapsed() <= Duration::from_secs(60) {
            return;
        }
        let ttl = self.config.peer_ttl();
        buckets.peers.retain(|_, bucket| !bucket.is_stale(ttl));
        buckets.topics.retain(|_, bucket| !bucket.is_stale(ttl));
        buckets.last_cleanup = Instant::now();
    }
}

impl AntifloodHandler for TokenBucketAntiflood {
    fn can_process_message(&self, from: &PeerId, size: usize) -> Result<(), CapabilityError> {
        if size > self.config.max_message_size {
            return Err(CapabilityError::Flood {
                peer: from.clone(),
                reason: format!(
                    "message of {size} bytes exceeds {}",
                    self.config.max_message_size
                ),
            });
        }

        let is_member = self.committee.read().contains(from);
        let mut buckets = self.buckets.lock();
        self.cleanup_if_due(&mut buckets);

        let bucket = buckets.peers.entry(from.clone()).or_insert_with(|| {
            if is_member {
                TokenBucket::new(
                    self.config.validator_burst,
                    self.config.validator_messages_per_sec,
                )
            } else {
                TokenBucket::new(
                    self.config.unknown_peer_burst,
                    self.config.unknown_peer_messages_per_sec,
                )
            }
        });

        if bucket.try_consume(1) {
            Ok(())
        } else {
            trace!(peer = %from, is_member, "Peer over message rate");
            Err(CapabilityError::Flood {
                peer: from.clone(),
                reason: "message rate exceeded".into(),
            })
        }
    }

    fn can_process_messages_on_topic(
        &self,
        from: &PeerId,
        topic: &str,
        num_messages: u32,
        _total_size: usize,
    ) -> Result<(), CapabilityError> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets
            .topics
            .entry((from.clone(), topic.to_string()))
            .or_insert_with(|| {
                TokenBucket::new(self.config.topic_burst, self.config.topic_messages_per_sec)
            });

        if bucket.try_consume(num_messages) {
            Ok(())
        } else {
            trace!(peer = %from, topic, num_messages, "Peer over topic rate");
            Err(CapabilityError::Flood {
                peer: from.clone(),
                reason: format!("topic {topic} rate exceeded"),
            })
        }
    }
}
