//! Broadcast errors.

use spos_core::CapabilityError;
use spos_messages::CodecError;
use thiserror::Error;

/// Errors raised by the broadcast layer.
///
/// Only construction errors are fatal. Send failures are logged by the caller
/// and the next phase or the failover ladder covers the gap.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid cache size: leader {leader}, validator {validator}")]
    InvalidCacheSize { leader: usize, validator: usize },

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("nil body")]
    NilBody,

    #[error("nil header")]
    NilHeader,

    #[error("block body contains an empty miniblock")]
    MiniBlockEmpty,

    #[error("broadcast handlers are not set")]
    HandlersNotSet,

    #[error("collaborator failed: {0}")]
    Capability(#[from] CapabilityError),

    #[error("encoding failed: {0}")]
    Codec(#[from] CodecError),

    #[error("header hashing failed: {0}")]
    HeaderHash(String),
}
