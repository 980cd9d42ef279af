//! Consensus runtime configuration.

use crate::ConsensusError;
use serde::{Deserialize, Serialize};
use spos_messages::{MessageKind, MessageSchema};
use std::time::Duration;

/// Configuration for the consensus runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Chain every accepted message must belong to.
    pub chain_id: String,

    /// Length of a header hash.
    pub header_hash_size: usize,

    /// Length of a validator public key.
    pub public_key_size: usize,

    /// Length of a signature (peer signature, share, aggregate, leader).
    pub signature_size: usize,

    /// Members per consensus group. Drives the signer bitmap length.
    pub consensus_group_size: usize,

    /// Share of the round, in percent, a subround may wait for its goal.
    pub max_threshold_percent: u32,

    /// Round length in milliseconds.
    pub round_duration_ms: u64,

    /// Signature messages accepted per key and round.
    pub max_signatures_per_round: u32,

    /// Messages of every other kind accepted per key and round.
    pub max_messages_per_round: u32,

    /// Whether final-info messages must carry the leader signature.
    pub require_leader_signature: bool,

    /// Entries kept by the invalid-signers cache.
    pub invalid_signers_cache_size: usize,

    /// Redundancy level of this machine. Zero for the main machine.
    pub redundancy_level: i64,

    /// Rounds the main machine may stay silent before a backup steps in,
    /// multiplied by the redundancy level.
    pub max_rounds_of_inactivity: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            chain_id: "1".to_string(),
            header_hash_size: 32,
            public_key_size: 48,
            signature_size: 96,
            consensus_group_size: 7,
            max_threshold_percent: 85,
            round_duration_ms: 6000,
            max_signatures_per_round: MessageSchema::MAX_SIGNATURES_PER_ROUND,
            max_messages_per_round: MessageSchema::MAX_MESSAGES_PER_ROUND,
            require_leader_signature: true,
            invalid_signers_cache_size: 1000,
            redundancy_level: 0,
            max_rounds_of_inactivity: 3,
        }
    }
}

impl ConsensusConfig {
    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    pub fn with_consensus_group_size(mut self, size: usize) -> Self {
        self.consensus_group_size = size;
        self
    }

    pub fn with_round_duration(mut self, duration: Duration) -> Self {
        self.round_duration_ms = duration.as_millis() as u64;
        self
    }

    pub fn with_max_threshold_percent(mut self, percent: u32) -> Self {
        self.max_threshold_percent = percent;
        self
    }

    pub fn with_key_sizes(mut self, public_key_size: usize, signature_size: usize) -> Self {
        self.public_key_size = public_key_size;
        self.signature_size = signature_size;
        self
    }

    pub fn with_require_leader_signature(mut self, required: bool) -> Self {
        self.require_leader_signature = required;
        self
    }

    /// Configure this machine as a backup.
    pub fn with_redundancy(mut self, level: i64, max_rounds_of_inactivity: u64) -> Self {
        self.redundancy_level = level;
        self.max_rounds_of_inactivity = max_rounds_of_inactivity;
        self
    }

    /// Chain id as compared against incoming messages.
    pub fn chain_id_bytes(&self) -> Vec<u8> {
        self.chain_id.as_bytes().to_vec()
    }

    /// Round duration.
    pub fn round_duration(&self) -> Duration {
        Duration::from_millis(self.round_duration_ms)
    }

    /// Build the per-kind schema table.
    pub fn schema(&self) -> MessageSchema {
        let mut schema = MessageSchema::new(self.require_leader_signature);
        for kind in MessageKind::ALL {
            let max = if kind == MessageKind::Signature {
                self.max_signatures_per_round
            } else {
                self.max_messages_per_round
            };
            schema = schema.with_max_per_round(kind, max);
        }
        schema
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> Result<(), ConsensusError> {
        if self.chain_id.is_empty() {
            return Err(ConsensusError::InvalidConfig("chain id is empty".into()));
        }
        if self.header_hash_size == 0 {
            return Err(ConsensusError::InvalidConfig("header hash size is zero".into()));
        }
        if self.public_key_size == 0 {
            return Err(ConsensusError::InvalidConfig("public key size is zero".into()));
        }
        if self.signature_size == 0 {
            return Err(ConsensusError::InvalidConfig("signature size is zero".into()));
        }
        if self.consensus_group_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "consensus group size is zero".into(),
            ));
        }
        if self.max_threshold_percent == 0 || self.max_threshold_percent > 100 {
            return Err(ConsensusError::InvalidConfig(format!(
                "max threshold percent {} outside 1..=100",
                self.max_threshold_percent
            )));
        }
        if self.round_duration_ms == 0 {
            return Err(ConsensusError::InvalidRoundDuration);
        }
        if self.invalid_signers_cache_size == 0 {
            return Err(ConsensusError::InvalidConfig(
                "invalid signers cache size is zero".into(),
            ));
        }
        if self.redundancy_level < 0 {
            return Err(ConsensusError::InvalidConfig(format!(
                "negative redundancy level {}",
                self.redundancy_level
            )));
        }
        if self.redundancy_level > 0 && self.max_rounds_of_inactivity == 0 {
            return Err(ConsensusError::InvalidConfig(
                "backup machines need a non-zero inactivity threshold".into(),
            ));
        }
        Ok(())
    }
}
