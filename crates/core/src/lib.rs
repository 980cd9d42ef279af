//! Capability traits for the collaborators of the consensus runtime.
//!
//! The runtime never reaches for a god-object bundle of handles. Each
//! component receives only the capabilities it actually uses, expressed as
//! the narrow traits below and injected as `Arc<dyn Trait>`.
//!
//! | Module | Capabilities |
//! |--------|--------------|
//! | [`crypto`] | peer signatures, multi-key handling |
//! | [`network`] | transport, antiflood gate, interceptors, shard routing |
//! | [`chain`] | committee selection, block processor, header pool |
//! | [`timing`] | round timing, delayed callbacks |
//! | [`redundancy`] | primary/backup machine arbitration |

pub mod chain;
pub mod crypto;
mod error;
pub mod network;
pub mod redundancy;
pub mod timing;

pub use chain::{BlockProcessor, ConsensusGroup, HeaderHandler, HeadersPoolSubscriber, NodesCoordinator};
pub use crypto::{KeysHandler, P2pIdentity, PeerSignatureHandler};
pub use error::CapabilityError;
pub use network::{
    AntifloodHandler, InterceptedData, InterceptedDataHandler, Interceptor, InterceptorsContainer,
    NetworkShardingCollector, P2pMessage, P2pMessenger,
};
pub use redundancy::NodeRedundancyHandler;
pub use timing::{AlarmCallback, AlarmScheduler, RoundHandler};
