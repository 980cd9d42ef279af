use spos_types::PeerId;

/// Arbitration between a primary machine and its backups for the same key.
pub trait NodeRedundancyHandler: Send + Sync {
    /// True when this machine is configured as a backup.
    fn is_redundancy_node(&self) -> bool;

    /// True while the primary machine is considered alive.
    fn is_main_machine_active(&self) -> bool;

    /// Called once per round: counts a round of primary inactivity when our
    /// key sits in the committee.
    fn adjust_inactivity_if_needed(&self, self_pk: &[u8], consensus_pks: &[Vec<u8>], round_index: i64);

    /// Called for every message: a message signed with our key but relayed by
    /// another peer proves the primary is alive.
    fn reset_inactivity_if_needed(&self, self_pk: &[u8], msg_pk: &[u8], msg_peer: &PeerId);
}
