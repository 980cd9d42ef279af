//! Broadcast configuration.

use crate::BroadcastError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the broadcast layer and the delayed broadcaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Leader entries kept while waiting for metachain notarization. The
    /// oldest entry is flushed when the cap is exceeded.
    pub leader_cache_size: usize,

    /// Validator entries armed for failover, applied separately to block
    /// data and to headers. The oldest entry is dropped, and its alarms
    /// canceled, when the cap is exceeded.
    pub validator_cache_size: usize,

    /// Failover delay per consensus position, in milliseconds.
    pub validator_delay_per_order_ms: u64,

    /// Grace period after a notarizing metachain header, in milliseconds.
    pub extra_delay_for_broadcast_block_info_ms: u64,

    /// Pause between miniblocks and their transactions, in milliseconds.
    pub extra_delay_between_broadcast_mbs_and_txs_ms: u64,

    /// Largest transaction packet, in bytes.
    pub max_bulk_transaction_size: usize,

    /// Intercepted header hashes remembered.
    pub headers_cache_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            leader_cache_size: 10,
            validator_cache_size: 10,
            validator_delay_per_order_ms: 1000,
            extra_delay_for_broadcast_block_info_ms: 1000,
            extra_delay_between_broadcast_mbs_and_txs_ms: 1000,
            max_bulk_transaction_size: 1 << 18,
            headers_cache_size: 1000,
        }
    }
}

impl BroadcastConfig {
    pub fn with_cache_sizes(mut self, leader: usize, validator: usize) -> Self {
        self.leader_cache_size = leader;
        self.validator_cache_size = validator;
        self
    }

    pub fn with_validator_delay_per_order(mut self, delay: Duration) -> Self {
        self.validator_delay_per_order_ms = delay.as_millis() as u64;
        self
    }

    /// Set both extra delays.
    pub fn with_extra_delays(mut self, block_info: Duration, between_mbs_and_txs: Duration) -> Self {
        self.extra_delay_for_broadcast_block_info_ms = block_info.as_millis() as u64;
        self.extra_delay_between_broadcast_mbs_and_txs_ms = between_mbs_and_txs.as_millis() as u64;
        self
    }

    pub fn with_max_bulk_transaction_size(mut self, size: usize) -> Self {
        self.max_bulk_transaction_size = size;
        self
    }

    pub fn validator_delay_per_order(&self) -> Duration {
        Duration::from_millis(self.validator_delay_per_order_ms)
    }

    pub fn extra_delay_for_broadcast_block_info(&self) -> Duration {
        Duration::from_millis(self.extra_delay_for_broadcast_block_info_ms)
    }

    pub fn extra_delay_between_broadcast_mbs_and_txs(&self) -> Duration {
        Duration::from_millis(self.extra_delay_between_broadcast_mbs_and_txs_ms)
    }

    pub fn validate(&self) -> Result<(), BroadcastError> {
        if self.leader_cache_size == 0 || self.validator_cache_size == 0 {
            return Err(BroadcastError::InvalidCacheSize {
                leader: self.leader_cache_size,
                validator: self.validator_cache_size,
            });
        }
        if self.headers_cache_size == 0 {
            return Err(BroadcastError::InvalidConfig(
                "headers cache size is zero".into(),
            ));
        }
        if self.max_bulk_transaction_size == 0 {
            return Err(BroadcastError::InvalidConfig(
                "max bulk transaction size is zero".into(),
            ));
        }
        Ok(())
    }
}
