//! Primary/backup machine arbitration.

use crate::ConsensusError;
use parking_lot::Mutex;
use spos_core::NodeRedundancyHandler;
use spos_types::PeerId;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct Inactivity {
    rounds: u64,
    last_round_checked: Option<i64>,
}

/// Tracks whether the main machine for our key is still alive.
///
/// A backup (level > 0) counts the rounds in which our key sat in the
/// committee without any message signed by it arriving from another peer.
/// Backups of higher level wait proportionally longer before stepping in.
#[derive(Debug)]
pub struct NodeRedundancy {
    redundancy_level: u64,
    max_rounds_of_inactivity: u64,
    own_peer: PeerId,
    inactivity: Mutex<Inactivity>,
}

impl NodeRedundancy {
    pub fn new(
        redundancy_level: i64,
        max_rounds_of_inactivity: u64,
        own_peer: PeerId,
    ) -> Result<Self, ConsensusError> {
        let redundancy_level = u64::try_from(redundancy_level).map_err(|_| {
            ConsensusError::InvalidConfig(format!(
                "negative redundancy level {}",
                redundancy_level
            ))
        })?;
        if redundancy_level > 0 && max_rounds_of_inactivity == 0 {
            return Err(ConsensusError::InvalidConfig(
                "backup machines need a non-zero inactivity threshold".into(),
            ));
        }
        Ok(Self {
            redundancy_level,
            max_rounds_of_inactivity,
            own_peer,
            inactivity: Mutex::new(Inactivity::default()),
        })
    }

    /// Rounds counted without a sign of life from the main machine.
    pub fn rounds_of_inactivity(&self) -> u64 {
        self.inactivity.lock().rounds
    }

    pub fn increment_rounds_of_inactivity(&self) {
        self.inactivity.lock().rounds += 1;
    }

    pub fn reset_rounds_of_inactivity(&self) {
        self.inactivity.lock().rounds = 0;
    }
}

impl NodeRedundancyHandler for NodeRedundancy {
    fn is_redundancy_node(&self) -> bool {
        self.redundancy_level != 0
    }

    fn is_main_machine_active(&self) -> bool {
        self.rounds_of_inactivity() < self.redundancy_level * self.max_rounds_of_inactivity
    }

    fn adjust_inactivity_if_needed(
        &self,
        self_pk: &[u8],
        consensus_pks: &[Vec<u8>],
        round_index: i64,
    ) {
        if !self.is_redundancy_node() {
            return;
        }

        let mut inactivity = self.inactivity.lock();
        if inactivity
            .last_round_checked
            .is_some_and(|last| round_index <= last)
        {
            return;
        }
        inactivity.last_round_checked = Some(round_index);

        if consensus_pks.iter().any(|pk| pk == self_pk) {
            inactivity.rounds += 1;
            debug!(
                round = round_index,
                rounds_of_inactivity = inactivity.rounds,
                "Main machine silent while our key is in the committee"
            );
            if inactivity.rounds == self.redundancy_level * self.max_rounds_of_inactivity {
                info!(
                    level = self.redundancy_level,
                    "Main machine considered inactive, backup stepping in"
                );
            }
        }
    }

    fn reset_inactivity_if_needed(&self, self_pk: &[u8], msg_pk: &[u8], msg_peer: &PeerId) {
        if self_pk != msg_pk || *msg_peer == self.own_peer {
            return;
        }
        let mut inactivity = self.inactivity.lock();
        if inactivity.rounds > 0 {
            debug!(peer = %msg_peer, "Main machine alive again");
        }
        inactivity.rounds = 0;
    }
}
