//! Per-round committee state.
//!
//! Holds the ordered consensus group, the leader, our own public key and a
//! per-member record of which subrounds each member has completed.
//!
//! # Locking
//!
//! Two locks, never held together:
//! - `eligible`: the eligible-validator set, replaced at epoch boundaries.
//! - `group`: committee, leader, self key and job-done flags.

use crate::error::display_bytes;
use crate::ConsensusError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use spos_core::KeysHandler;
use spos_messages::SubroundId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Completion flags of one member, indexed by subround.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundState {
    job_done: [bool; SubroundId::ALL.len()],
}

impl RoundState {
    pub fn job_done(&self, subround: SubroundId) -> bool {
        self.job_done[subround as usize]
    }

    pub fn set_job_done(&mut self, subround: SubroundId, value: bool) {
        self.job_done[subround as usize] = value;
    }
}

#[derive(Debug, Default)]
struct GroupState {
    /// Members in committee order, each with its completion flags.
    members: IndexMap<Vec<u8>, RoundState>,
    leader: Vec<u8>,
    self_pub_key: Vec<u8>,
}

/// Committee state for the current round.
pub struct RoundConsensus {
    eligible: RwLock<HashSet<Vec<u8>>>,
    group: RwLock<GroupState>,
    consensus_group_size: usize,
    keys_handler: Arc<dyn KeysHandler>,
}

impl RoundConsensus {
    /// Create committee state for a node whose own key is `self_pub_key`.
    pub fn new(
        eligible: HashSet<Vec<u8>>,
        consensus_group_size: usize,
        self_pub_key: Vec<u8>,
        keys_handler: Arc<dyn KeysHandler>,
    ) -> Self {
        Self {
            eligible: RwLock::new(eligible),
            group: RwLock::new(GroupState {
                self_pub_key,
                ..Default::default()
            }),
            consensus_group_size,
            keys_handler,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Committee
    // ═══════════════════════════════════════════════════════════════════════

    /// Committee members in order.
    pub fn consensus_group(&self) -> Vec<Vec<u8>> {
        self.group.read().members.keys().cloned().collect()
    }

    /// Replace the committee. Every job-done flag starts out false.
    pub fn set_consensus_group(&self, members: Vec<Vec<u8>>) {
        let mut group = self.group.write();
        group.members = members
            .into_iter()
            .map(|member| (member, RoundState::default()))
            .collect();
        debug!(size = group.members.len(), "Consensus group replaced");
    }

    /// Position of `key` in the committee.
    pub fn consensus_group_index(&self, key: &[u8]) -> Result<usize, ConsensusError> {
        self.group
            .read()
            .members
            .get_index_of(key)
            .ok_or_else(|| ConsensusError::InvalidKey(display_bytes(key)))
    }

    /// Position of our own key in the committee.
    pub fn self_consensus_group_index(&self) -> Result<usize, ConsensusError> {
        let self_key = self.self_pub_key();
        self.consensus_group_index(&self_key)
    }

    pub fn leader(&self) -> Vec<u8> {
        self.group.read().leader.clone()
    }

    pub fn set_leader(&self, leader: Vec<u8>) {
        self.group.write().leader = leader;
    }

    /// Configured committee size.
    pub fn consensus_group_size(&self) -> usize {
        self.consensus_group_size
    }

    pub fn self_pub_key(&self) -> Vec<u8> {
        self.group.read().self_pub_key.clone()
    }

    pub fn set_self_pub_key(&self, key: Vec<u8>) {
        self.group.write().self_pub_key = key;
    }

    pub fn is_node_in_consensus_group(&self, key: &[u8]) -> bool {
        self.group.read().members.contains_key(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Eligible list
    // ═══════════════════════════════════════════════════════════════════════

    pub fn set_eligible_list(&self, eligible: HashSet<Vec<u8>>) {
        *self.eligible.write() = eligible;
    }

    pub fn is_node_in_eligible_list(&self, key: &[u8]) -> bool {
        self.eligible.read().contains(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Job tracking
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether `key` finished `subround`.
    pub fn job_done(&self, key: &[u8], subround: SubroundId) -> Result<bool, ConsensusError> {
        self.group
            .read()
            .members
            .get(key)
            .map(|state| state.job_done(subround))
            .ok_or_else(|| ConsensusError::InvalidKey(display_bytes(key)))
    }

    /// Record whether `key` finished `subround`.
    pub fn set_job_done(
        &self,
        key: &[u8],
        subround: SubroundId,
        value: bool,
    ) -> Result<(), ConsensusError> {
        let mut group = self.group.write();
        let state = group
            .members
            .get_mut(key)
            .ok_or_else(|| ConsensusError::InvalidKey(display_bytes(key)))?;
        state.set_job_done(subround, value);
        Ok(())
    }

    /// Whether our own key finished `subround`.
    pub fn self_job_done(&self, subround: SubroundId) -> Result<bool, ConsensusError> {
        let self_key = self.self_pub_key();
        self.job_done(&self_key, subround)
    }

    /// True if every managed key sitting in the committee finished `subround`
    /// and at least one does.
    pub fn is_multi_key_job_done(&self, subround: SubroundId) -> bool {
        let group = self.group.read();
        let mut any_managed = false;
        for (key, state) in &group.members {
            if !self.keys_handler.is_key_managed_by_current_node(key) {
                continue;
            }
            any_managed = true;
            if !state.job_done(subround) {
                return false;
            }
        }
        any_managed
    }

    /// Number of members that finished `subround`.
    pub fn compute_size(&self, subround: SubroundId) -> usize {
        self.group
            .read()
            .members
            .values()
            .filter(|state| state.job_done(subround))
            .count()
    }

    /// Clear every member's flags, keeping the committee.
    pub fn reset_round_state(&self) {
        let mut group = self.group.write();
        for state in group.members.values_mut() {
            *state = RoundState::default();
        }
    }

    /// Members that finished `subround`, in committee order.
    pub fn members_with_job_done(&self, subround: SubroundId) -> Vec<usize> {
        self.group
            .read()
            .members
            .values()
            .enumerate()
            .filter(|(_, state)| state.job_done(subround))
            .map(|(index, _)| index)
            .collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Multi-key
    // ═══════════════════════════════════════════════════════════════════════

    /// True if any committee key is managed by this node.
    pub fn is_multi_key_in_consensus_group(&self) -> bool {
        self.group
            .read()
            .members
            .keys()
            .any(|key| self.keys_handler.is_key_managed_by_current_node(key))
    }

    pub fn is_key_managed_by_self(&self, key: &[u8]) -> bool {
        self.keys_handler.is_key_managed_by_current_node(key)
    }

    pub fn increment_rounds_without_received_messages(&self, key: &[u8]) {
        self.keys_handler
            .increment_rounds_without_received_messages(key);
    }

    pub fn keys_handler(&self) -> &Arc<dyn KeysHandler> {
        &self.keys_handler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spos_test_helpers::{bls_keypair, StubKeysHandler};

    fn members(n: u8) -> Vec<Vec<u8>> {
        (0..n).map(|i| vec![i; 48]).collect()
    }

    fn round_consensus(keys_handler: StubKeysHandler) -> RoundConsensus {
        let eligible: HashSet<Vec<u8>> = members(5).into_iter().collect();
        RoundConsensus::new(eligible, 4, vec![0; 48], Arc::new(keys_handler))
    }

    fn plain() -> RoundConsensus {
        round_consensus(StubKeysHandler::new(bls_keypair(0)))
    }

    #[test]
    fn test_set_consensus_group_resets_flags() {
        let rc = plain();
        rc.set_consensus_group(members(4));
        rc.set_job_done(&[1; 48], SubroundId::Block, true).unwrap();
        assert!(rc.job_done(&[1; 48], SubroundId::Block).unwrap());

        rc.set_consensus_group(members(4));
        for member in members(4) {
            for subround in SubroundId::ALL {
                assert!(!rc.job_done(&member, subround).unwrap());
            }
        }
    }

    #[test]
    fn test_job_done_for_non_member_is_invalid_key() {
        let rc = plain();
        rc.set_consensus_group(members(3));
        assert!(matches!(
            rc.job_done(&[9; 48], SubroundId::Block),
            Err(ConsensusError::InvalidKey(_))
        ));
        assert!(matches!(
            rc.set_job_done(&[9; 48], SubroundId::Block, true),
            Err(ConsensusError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_compute_size_counts_flags_per_subround() {
        let rc = plain();
        rc.set_consensus_group(members(4));
        rc.set_job_done(&[0; 48], SubroundId::Signature, true).unwrap();
        rc.set_job_done(&[2; 48], SubroundId::Signature, true).unwrap();
        rc.set_job_done(&[3; 48], SubroundId::Block, true).unwrap();

        assert_eq!(rc.compute_size(SubroundId::Signature), 2);
        assert_eq!(rc.compute_size(SubroundId::Block), 1);
        assert_eq!(rc.compute_size(SubroundId::EndRound), 0);
        assert_eq!(rc.members_with_job_done(SubroundId::Signature), vec![0, 2]);

        rc.reset_round_state();
        assert_eq!(rc.compute_size(SubroundId::Signature), 0);
        assert_eq!(rc.consensus_group().len(), 4);
    }

    #[test]
    fn test_indexes_and_membership() {
        let rc = plain();
        rc.set_consensus_group(members(4));
        assert_eq!(rc.consensus_group_index(&[2; 48]).unwrap(), 2);
        assert_eq!(rc.self_consensus_group_index().unwrap(), 0);
        assert!(rc.is_node_in_consensus_group(&[3; 48]));
        assert!(!rc.is_node_in_consensus_group(&[4; 48]));
        assert!(rc.is_node_in_eligible_list(&[4; 48]));
        assert!(!rc.is_node_in_eligible_list(&[7; 48]));
        assert!(rc.self_job_done(SubroundId::Block).is_ok());
    }

    #[test]
    fn test_multi_key_queries() {
        let managed = bls_keypair(3);
        let managed_pk = managed.public_key().to_bytes();
        let keys = StubKeysHandler::new(bls_keypair(0)).with_managed_key(managed);
        let rc = round_consensus(keys.clone());

        rc.set_consensus_group(vec![vec![1; 48], managed_pk.clone()]);
        assert!(rc.is_multi_key_in_consensus_group());
        assert!(rc.is_key_managed_by_self(&managed_pk));
        assert!(!rc.is_multi_key_job_done(SubroundId::Block));

        rc.set_job_done(&managed_pk, SubroundId::Block, true).unwrap();
        assert!(rc.is_multi_key_job_done(SubroundId::Block));

        rc.increment_rounds_without_received_messages(&managed_pk);
        assert_eq!(keys.increments(), vec![managed_pk]);

        rc.set_consensus_group(vec![vec![1; 48]]);
        assert!(!rc.is_multi_key_in_consensus_group());
        assert!(!rc.is_multi_key_job_done(SubroundId::Block));
    }
}
