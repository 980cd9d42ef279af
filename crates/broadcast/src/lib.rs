//! Broadcast layer of the consensus runtime.
//!
//! # Components
//!
//! - [`CommonMessenger`] / [`ShardChainMessenger`]: publish consensus
//!   messages, blocks, headers, miniblocks, transactions and proofs, as this
//!   node or as any managed key's transport identity.
//! - [`DelayedBlockBroadcaster`]: the failover ladder. Leaders hold block data
//!   until the metachain notarizes it; validators arm staggered alarms and
//!   broadcast themselves if nothing shows up on the wire in time.
//! - [`TokioAlarmScheduler`]: cancellable, id-keyed timers on the tokio runtime.
//! - [`topic`]: deterministic gossip topic names.

mod alarm;
mod config;
mod delayed;
mod error;
mod messenger;
pub mod topic;

pub use alarm::TokioAlarmScheduler;
pub use config::BroadcastConfig;
pub use delayed::{
    BroadcastHandlers, DelayedBlockBroadcaster, DelayedBroadcastData, DelayedBroadcasterArgs,
    HeaderBroadcastHandler, MiniBlocksData, MiniBlocksHandler, TransactionsData,
    TransactionsHandler, ValidatorHeaderBroadcastData,
};
pub use error::BroadcastError;
pub use messenger::{CommonMessenger, MessengerArgs, ShardChainMessenger};
