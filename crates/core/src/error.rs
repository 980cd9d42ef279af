use spos_types::PeerId;
use thiserror::Error;

/// Failure reported by an injected collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    /// The antiflood gate refused the message.
    #[error("flood detected from {peer}: {reason}")]
    Flood { peer: PeerId, reason: String },

    /// A peer signature did not verify.
    #[error("invalid peer signature")]
    InvalidPeerSignature,

    /// No key material is held for the requested public key.
    #[error("missing key material for public key {0}")]
    MissingKey(String),

    /// No interceptor is registered on a topic.
    #[error("no interceptor for topic {0}")]
    UnknownTopic(String),

    /// Committee selection failed.
    #[error("committee selection failed: {0}")]
    Committee(String),
}
