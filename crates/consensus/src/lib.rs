//! SPoS round consensus runtime.
//!
//! Time is split into fixed rounds; each round is split into subrounds with
//! deadlines expressed as fractions of the round. A rotating committee
//! proposes and signs one block per round.
//!
//! # Architecture
//!
//! - [`Round`] tracks the round index from a genesis instant.
//! - [`Chronology`] drives the registered [`Subround`]s in order. A timed-out
//!   subround still hands over to the next one; when the round index moves
//!   the consensus state is reset and the rollover hooks run.
//! - [`Worker`] receives consensus messages from the transport, validates
//!   them through [`ConsensusMessageValidator`], buffers them per kind and
//!   hands them to the subround callbacks when the round state allows it.
//! - [`ConsensusState`] and [`RoundConsensus`] hold the committee and the
//!   per-round flags the subrounds read and write.
//! - [`NodeRedundancy`] lets a backup machine step in when the main machine
//!   stops producing.
//!
//! Collaborators (transport, keys, block processing, committee selection)
//! are reached through the capability traits of `spos-core`.

mod chronology;
mod config;
mod consensus_state;
mod error;
mod invalid_signers;
mod metrics;
mod peer_signature;
mod redundancy;
mod round;
mod round_consensus;
mod subround;
mod validator;
mod worker;

pub use chronology::{Chronology, RoundRolloverFn, ROUND_FINISHED};
pub use config::ConsensusConfig;
pub use consensus_state::{ConsensusState, SubroundStatus};
pub use error::ConsensusError;
pub use invalid_signers::InvalidSignersCache;
pub use metrics::ConsensusMetrics;
pub use peer_signature::PeerSignatureVerifier;
pub use redundancy::NodeRedundancy;
pub use round::Round;
pub use round_consensus::{RoundConsensus, RoundState};
pub use subround::{CheckFn, ExtendFn, JobFn, Subround, SubroundContext};
pub use validator::{ConsensusMessageValidator, MEGABYTE};
pub use worker::{
    ReceivedHeaderHandler, ReceivedMessageCallback, ReceivedProofHandler, Worker, WorkerArgs,
};
