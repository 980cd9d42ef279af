//! Round-level consensus state.

use crate::round_consensus::RoundConsensus;
use crate::ConsensusError;
use parking_lot::RwLock;
use spos_core::NodesCoordinator;
use spos_messages::SubroundId;
use spos_types::{BlockHeader, Body, Epoch, Hash, ShardId, SignerBitfield};
use tracing::debug;

/// Whether a subround reached its goal in the current round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubroundStatus {
    #[default]
    NotFinished,
    Finished,
}

#[derive(Debug, Default)]
struct RoundStatus {
    round_index: i64,
    round_canceled: bool,
    extended_called: bool,
    processing_block: bool,
    header_hash: Option<Hash>,
    header: Option<BlockHeader>,
    body: Option<Body>,
    subround_status: [SubroundStatus; SubroundId::ALL.len()],
}

/// Committee state plus everything the subrounds track for one round.
pub struct ConsensusState {
    round_consensus: RoundConsensus,
    status: RwLock<RoundStatus>,
}

impl ConsensusState {
    pub fn new(round_consensus: RoundConsensus) -> Self {
        Self {
            round_consensus,
            status: RwLock::new(RoundStatus::default()),
        }
    }

    /// Committee state.
    pub fn committee(&self) -> &RoundConsensus {
        &self.round_consensus
    }

    /// Clear per-round state ahead of a new round. The committee is kept; its
    /// flags are reset.
    pub fn reset_consensus_state(&self) {
        let mut status = self.status.write();
        let round_index = status.round_index;
        *status = RoundStatus {
            round_index,
            ..Default::default()
        };
        drop(status);
        self.round_consensus.reset_round_state();
        debug!(round = round_index, "Consensus state reset");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Round bookkeeping
    // ═══════════════════════════════════════════════════════════════════════

    pub fn round_index(&self) -> i64 {
        self.status.read().round_index
    }

    pub fn set_round_index(&self, index: i64) {
        self.status.write().round_index = index;
    }

    pub fn round_canceled(&self) -> bool {
        self.status.read().round_canceled
    }

    pub fn set_round_canceled(&self, canceled: bool) {
        self.status.write().round_canceled = canceled;
    }

    pub fn extended_called(&self) -> bool {
        self.status.read().extended_called
    }

    pub fn set_extended_called(&self, called: bool) {
        self.status.write().extended_called = called;
    }

    pub fn processing_block(&self) -> bool {
        self.status.read().processing_block
    }

    pub fn set_processing_block(&self, processing: bool) {
        self.status.write().processing_block = processing;
    }

    pub fn status(&self, subround: SubroundId) -> SubroundStatus {
        self.status.read().subround_status[subround as usize]
    }

    pub fn set_status(&self, subround: SubroundId, status: SubroundStatus) {
        self.status.write().subround_status[subround as usize] = status;
    }

    pub fn is_subround_finished(&self, subround: SubroundId) -> bool {
        self.status(subround) == SubroundStatus::Finished
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposal data
    // ═══════════════════════════════════════════════════════════════════════

    /// Hash of the header under agreement.
    pub fn header_hash(&self) -> Option<Hash> {
        self.status.read().header_hash
    }

    pub fn set_header_hash(&self, hash: Option<Hash>) {
        self.status.write().header_hash = hash;
    }

    pub fn header(&self) -> Option<BlockHeader> {
        self.status.read().header.clone()
    }

    pub fn set_header(&self, header: Option<BlockHeader>) {
        self.status.write().header = header;
    }

    pub fn body(&self) -> Option<Body> {
        self.status.read().body.clone()
    }

    pub fn set_body(&self, body: Option<Body>) {
        self.status.write().body = body;
    }

    pub fn is_header_already_received(&self) -> bool {
        self.status.read().header.is_some()
    }

    pub fn is_block_body_already_received(&self) -> bool {
        self.status.read().body.is_some()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Job queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether `key` finished `subround`. Non-members count as not done.
    pub fn is_job_done(&self, key: &[u8], subround: SubroundId) -> bool {
        self.round_consensus
            .job_done(key, subround)
            .unwrap_or(false)
    }

    pub fn is_self_job_done(&self, subround: SubroundId) -> bool {
        self.round_consensus
            .self_job_done(subround)
            .unwrap_or(false)
    }

    pub fn compute_size(&self, subround: SubroundId) -> usize {
        self.round_consensus.compute_size(subround)
    }

    /// Whether the job of `subround` may still run: there is a proposal, our
    /// own part is not done and the subround has not finished.
    pub fn can_do_subround_job(&self, subround: SubroundId) -> bool {
        if self.header_hash().is_none() {
            return false;
        }
        if self.is_self_job_done(subround) {
            return false;
        }
        !self.is_subround_finished(subround)
    }

    /// Signer bitmap of the members that finished `subround`.
    pub fn generate_bitmap(&self, subround: SubroundId) -> SignerBitfield {
        let mut bitmap = SignerBitfield::new(self.round_consensus.consensus_group().len());
        for index in self.round_consensus.members_with_job_done(subround) {
            bitmap.set(index);
        }
        bitmap
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Leader
    // ═══════════════════════════════════════════════════════════════════════

    /// Leader of the current round.
    pub fn get_leader(&self) -> Result<Vec<u8>, ConsensusError> {
        if self.round_consensus.consensus_group().is_empty() {
            return Err(ConsensusError::EmptyConsensusGroup);
        }
        let leader = self.round_consensus.leader();
        if leader.is_empty() {
            return Err(ConsensusError::EmptyConsensusGroup);
        }
        Ok(leader)
    }

    /// Select the committee for `round` and install it with its leader.
    pub fn compute_consensus_group(
        &self,
        coordinator: &dyn NodesCoordinator,
        randomness: &[u8],
        round: u64,
        shard: ShardId,
        epoch: Epoch,
    ) -> Result<(), ConsensusError> {
        let group = coordinator
            .compute_consensus_group(randomness, round, shard, epoch)
            .map_err(ConsensusError::Committee)?;
        if group.members.is_empty() {
            return Err(ConsensusError::EmptyConsensusGroup);
        }
        debug!(
            round,
            size = group.members.len(),
            leader = %crate::error::display_bytes(&group.leader),
            "Consensus group selected"
        );
        self.round_consensus.set_consensus_group(group.members);
        self.round_consensus.set_leader(group.leader);
        Ok(())
    }

    pub fn is_node_leader_in_current_round(&self, key: &[u8]) -> bool {
        self.get_leader()
            .map(|leader| leader == key)
            .unwrap_or(false)
    }

    /// Our own key leads the current round.
    pub fn is_self_leader_in_current_round(&self) -> bool {
        self.is_node_leader_in_current_round(&self.round_consensus.self_pub_key())
    }

    /// A managed key leads the current round.
    pub fn is_multi_key_leader_in_current_round(&self) -> bool {
        self.get_leader()
            .map(|leader| self.round_consensus.is_key_managed_by_self(&leader))
            .unwrap_or(false)
    }

    pub fn get_multikey_redundancy_step_in_reason(&self) -> String {
        self.round_consensus
            .keys_handler()
            .redundancy_step_in_reason()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spos_core::ConsensusGroup;
    use spos_test_helpers::{bls_keypair, StubKeysHandler, StubNodesCoordinator};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn state_with(keys: StubKeysHandler, self_key: Vec<u8>) -> ConsensusState {
        let rc = RoundConsensus::new(HashSet::new(), 3, self_key, Arc::new(keys));
        rc.set_consensus_group(vec![vec![0; 48], vec![1; 48], vec![2; 48]]);
        rc.set_leader(vec![1; 48]);
        ConsensusState::new(rc)
    }

    fn state() -> ConsensusState {
        state_with(StubKeysHandler::new(bls_keypair(0)), vec![0; 48])
    }

    #[test]
    fn test_reset_clears_round_data_but_keeps_index() {
        let cs = state();
        cs.set_round_index(12);
        cs.set_round_canceled(true);
        cs.set_extended_called(true);
        cs.set_header_hash(Some(Hash::from_bytes(b"h")));
        cs.set_status(SubroundId::Block, SubroundStatus::Finished);
        cs.committee()
            .set_job_done(&[2; 48], SubroundId::Block, true)
            .unwrap();

        cs.reset_consensus_state();

        assert_eq!(cs.round_index(), 12);
        assert!(!cs.round_canceled());
        assert!(!cs.extended_called());
        assert!(cs.header_hash().is_none());
        assert!(!cs.is_subround_finished(SubroundId::Block));
        assert!(!cs.is_job_done(&[2; 48], SubroundId::Block));
    }

    #[test]
    fn test_can_do_subround_job() {
        let cs = state();
        assert!(!cs.can_do_subround_job(SubroundId::Signature));

        cs.set_header_hash(Some(Hash::from_bytes(b"h")));
        assert!(cs.can_do_subround_job(SubroundId::Signature));

        cs.committee()
            .set_job_done(&[0; 48], SubroundId::Signature, true)
            .unwrap();
        assert!(!cs.can_do_subround_job(SubroundId::Signature));
        assert!(cs.can_do_subround_job(SubroundId::EndRound));

        cs.set_status(SubroundId::EndRound, SubroundStatus::Finished);
        assert!(!cs.can_do_subround_job(SubroundId::EndRound));
    }

    #[test]
    fn test_leader_queries() {
        let cs = state();
        assert_eq!(cs.get_leader().unwrap(), vec![1; 48]);
        assert!(!cs.is_self_leader_in_current_round());
        assert!(cs.is_node_leader_in_current_round(&[1; 48]));

        cs.committee().set_leader(vec![0; 48]);
        assert!(cs.is_self_leader_in_current_round());
    }

    #[test]
    fn test_multi_key_leader() {
        let managed = bls_keypair(5);
        let managed_pk = managed.public_key().to_bytes();
        let keys = StubKeysHandler::new(bls_keypair(0))
            .with_managed_key(managed)
            .with_step_in_reason("main machine inactive");
        let cs = state_with(keys, vec![0; 48]);

        assert!(!cs.is_multi_key_leader_in_current_round());
        cs.committee()
            .set_consensus_group(vec![vec![0; 48], managed_pk.clone()]);
        cs.committee().set_leader(managed_pk);
        assert!(cs.is_multi_key_leader_in_current_round());
        assert_eq!(
            cs.get_multikey_redundancy_step_in_reason(),
            "main machine inactive"
        );
    }

    #[test]
    fn test_empty_group_has_no_leader() {
        let rc = RoundConsensus::new(
            HashSet::new(),
            3,
            vec![0; 48],
            Arc::new(StubKeysHandler::new(bls_keypair(0))),
        );
        let cs = ConsensusState::new(rc);
        assert!(matches!(
            cs.get_leader(),
            Err(ConsensusError::EmptyConsensusGroup)
        ));
        assert!(!cs.is_self_leader_in_current_round());
    }

    #[test]
    fn test_generate_bitmap() {
        let cs = state();
        cs.committee()
            .set_job_done(&[0; 48], SubroundId::Signature, true)
            .unwrap();
        cs.committee()
            .set_job_done(&[2; 48], SubroundId::Signature, true)
            .unwrap();
        let bitmap = cs.generate_bitmap(SubroundId::Signature);
        assert_eq!(bitmap.as_bytes(), &[0b0000_0101]);
        assert_eq!(bitmap.count(), 2);
    }

    #[test]
    fn test_compute_consensus_group_installs_leader() {
        let cs = state();
        let coordinator = StubNodesCoordinator::new(Some(ConsensusGroup {
            leader: vec![2; 48],
            members: vec![vec![2; 48], vec![0; 48]],
        }));

        cs.compute_consensus_group(&coordinator, b"seed", 4, ShardId(0), Epoch(0))
            .unwrap();

        assert_eq!(cs.committee().consensus_group(), vec![vec![2; 48], vec![0; 48]]);
        assert_eq!(cs.get_leader().unwrap(), vec![2; 48]);
        assert!(cs.committee().is_node_in_consensus_group(&[0; 48]));
    }

    #[test]
    fn test_compute_consensus_group_failure_keeps_previous_group() {
        let cs = state();
        let coordinator = StubNodesCoordinator::new(None);

        let err = cs
            .compute_consensus_group(&coordinator, b"seed", 4, ShardId(0), Epoch(0))
            .unwrap_err();

        assert!(matches!(err, ConsensusError::Committee(_)));
        assert_eq!(cs.get_leader().unwrap(), vec![1; 48]);
    }
}
