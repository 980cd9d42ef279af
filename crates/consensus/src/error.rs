//! Consensus runtime errors.

use spos_core::CapabilityError;
use spos_messages::CodecError;
use spos_types::PeerId;
use thiserror::Error;

/// Errors raised by the consensus runtime.
///
/// Construction errors are fatal to startup. Everything else rejects a single
/// message or operation and leaves the runtime running.
#[derive(Debug, Error)]
pub enum ConsensusError {
    // ═══════════════════════════════════════════════════════════════════════
    // Construction
    // ═══════════════════════════════════════════════════════════════════════
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("round duration must be greater than zero")]
    InvalidRoundDuration,

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    // ═══════════════════════════════════════════════════════════════════════
    // Committee state
    // ═══════════════════════════════════════════════════════════════════════
    #[error("public key {0} is not part of the consensus group")]
    InvalidKey(String),

    #[error("consensus group is empty")]
    EmptyConsensusGroup,

    #[error("committee selection failed: {0}")]
    Committee(CapabilityError),

    // ═══════════════════════════════════════════════════════════════════════
    // Message validation
    // ═══════════════════════════════════════════════════════════════════════
    #[error("invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("invalid message {kind} from {public_key}: {reason}")]
    InvalidMessage {
        kind: &'static str,
        public_key: String,
        reason: String,
    },

    #[error("invalid message type: {0}")]
    InvalidMessageType(i64),

    #[error("invalid body size: {size} exceeds {max}")]
    InvalidBodySize { size: usize, max: usize },

    #[error("invalid header size: {size} (allowed 1..={max})")]
    InvalidHeaderSize { size: usize, max: usize },

    #[error("invalid header hash size: expected {expected}, got {actual}")]
    InvalidHeaderHashSize { expected: usize, actual: usize },

    #[error("invalid public key size: expected {expected}, got {actual}")]
    InvalidPublicKeySize { expected: usize, actual: usize },

    #[error("invalid signature size: expected {expected}, got {actual}")]
    InvalidSignatureSize { expected: usize, actual: usize },

    #[error("invalid public key bitmap size: expected {expected}, got {actual}")]
    InvalidPublicKeyBitmapSize { expected: usize, actual: usize },

    #[error("node {0} is not in the eligible list")]
    NodeIsNotInEligibleList(String),

    #[error("message for future round {received} (local round {local})")]
    MessageForFutureRound { local: i64, received: i64 },

    #[error("message for past round {received} (local round {local})")]
    MessageForPastRound { local: i64, received: i64 },

    #[error("message type {kind} limit reached for public key {public_key} in round {round}")]
    MessageTypeLimitReached {
        kind: &'static str,
        public_key: String,
        round: i64,
    },

    #[error("invalid peer signature: {0}")]
    InvalidSignature(String),

    #[error("originator mismatch: transport peer {transport}, declared {declared}")]
    OriginatorMismatch { transport: PeerId, declared: PeerId },

    // ═══════════════════════════════════════════════════════════════════════
    // Message pipeline
    // ═══════════════════════════════════════════════════════════════════════
    #[error("flood detected: {0}")]
    FloodDetected(CapabilityError),

    #[error("nil data to process")]
    NilDataToProcess,

    #[error("nil signature on p2p message")]
    NilSignatureOnP2pMessage,

    #[error("failed to decode consensus message: {0}")]
    Decode(#[from] CodecError),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("wrong hash for header: expected {expected}, computed {computed}")]
    WrongHashForHeader { expected: String, computed: String },

    #[error("invalid signers for header {0} already received")]
    InvalidSignersAlreadyReceived(String),
}

impl ConsensusError {
    /// Stable label for the rejected-messages metric.
    pub fn reason(&self) -> &'static str {
        match self {
            ConsensusError::InvalidConfig(_) => "invalid_config",
            ConsensusError::InvalidRoundDuration => "invalid_round_duration",
            ConsensusError::Metrics(_) => "metrics",
            ConsensusError::InvalidKey(_) => "invalid_key",
            ConsensusError::EmptyConsensusGroup => "empty_consensus_group",
            ConsensusError::Committee(_) => "committee",
            ConsensusError::InvalidChainId(_) => "invalid_chain_id",
            ConsensusError::InvalidMessage { .. } => "invalid_message",
            ConsensusError::InvalidMessageType(_) => "invalid_message_type",
            ConsensusError::InvalidBodySize { .. } => "invalid_body_size",
            ConsensusError::InvalidHeaderSize { .. } => "invalid_header_size",
            ConsensusError::InvalidHeaderHashSize { .. } => "invalid_header_hash_size",
            ConsensusError::InvalidPublicKeySize { .. } => "invalid_public_key_size",
            ConsensusError::InvalidSignatureSize { .. } => "invalid_signature_size",
            ConsensusError::InvalidPublicKeyBitmapSize { .. } => "invalid_bitmap_size",
            ConsensusError::NodeIsNotInEligibleList(_) => "not_eligible",
            ConsensusError::MessageForFutureRound { .. } => "future_round",
            ConsensusError::MessageForPastRound { .. } => "past_round",
            ConsensusError::MessageTypeLimitReached { .. } => "type_limit_reached",
            ConsensusError::InvalidSignature(_) => "invalid_signature",
            ConsensusError::OriginatorMismatch { .. } => "originator_mismatch",
            ConsensusError::FloodDetected(_) => "flood",
            ConsensusError::NilDataToProcess => "nil_data",
            ConsensusError::NilSignatureOnP2pMessage => "nil_signature",
            ConsensusError::Decode(_) => "decode",
            ConsensusError::InvalidHeader(_) => "invalid_header",
            ConsensusError::WrongHashForHeader { .. } => "wrong_header_hash",
            ConsensusError::InvalidSignersAlreadyReceived(_) => "invalid_signers_duplicate",
        }
    }
}

/// Short hex form of key bytes for errors and log lines.
pub(crate) fn display_bytes(bytes: &[u8]) -> String {
    let hex = hex::encode(bytes);
    if hex.len() <= 16 {
        hex
    } else {
        format!("{}..{}", &hex[..8], &hex[hex.len() - 8..])
    }
}
