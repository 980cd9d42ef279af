//! Message kinds and subround identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of payload a consensus message carries.
///
/// Discriminants are the wire values of the `msg_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i64)]
pub enum MessageKind {
    /// Proposal carrying both body and header.
    BlockBodyAndHeader = 1,
    /// Proposal body only.
    BlockBody = 2,
    /// Proposal header only.
    BlockHeader = 3,
    /// A validator's signature share over the proposed header.
    Signature = 4,
    /// Leader's aggregated signature and signer bitmap.
    BlockHeaderFinalInfo = 5,
    /// Claim that some signature shares failed verification.
    InvalidSigners = 6,
}

impl MessageKind {
    /// Wire value reserved for "no kind".
    pub const UNKNOWN_WIRE: i64 = 0;

    /// Every real kind, in wire order.
    pub const ALL: [MessageKind; 6] = [
        MessageKind::BlockBodyAndHeader,
        MessageKind::BlockBody,
        MessageKind::BlockHeader,
        MessageKind::Signature,
        MessageKind::BlockHeaderFinalInfo,
        MessageKind::InvalidSigners,
    ];

    /// Resolve a wire value. Unknown values yield `None`.
    pub fn from_wire(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.to_wire() == value)
    }

    /// The wire value.
    pub fn to_wire(self) -> i64 {
        self as i64
    }

    /// True for kinds that carry a serialized header.
    pub fn carries_header(self) -> bool {
        matches!(
            self,
            MessageKind::BlockBodyAndHeader | MessageKind::BlockHeader
        )
    }

    /// True for kinds that carry a block body. The header hash is not yet
    /// known when these are built, so it must be absent.
    pub fn carries_body(self) -> bool {
        matches!(
            self,
            MessageKind::BlockBodyAndHeader | MessageKind::BlockBody
        )
    }

    /// Label used for logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::BlockBodyAndHeader => "(BLOCK_BODY_AND_HEADER)",
            MessageKind::BlockBody => "(BLOCK_BODY)",
            MessageKind::BlockHeader => "(BLOCK_HEADER)",
            MessageKind::Signature => "(CONSENSUS_SIGNATURE)",
            MessageKind::BlockHeaderFinalInfo => "(FINAL_INFO)",
            MessageKind::InvalidSigners => "(INVALID_SIGNERS)",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Display name for a raw wire kind, including the unknown placeholder.
pub fn message_kind_name(value: i64) -> &'static str {
    MessageKind::from_wire(value)
        .map(MessageKind::as_str)
        .unwrap_or("(UNKNOWN)")
}

/// Phases of a round, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i32)]
pub enum SubroundId {
    /// Committee selection and round setup.
    StartRound = 0,
    /// Block proposal.
    Block = 1,
    /// Signature collection.
    Signature = 2,
    /// Aggregation and commit.
    EndRound = 3,
}

impl SubroundId {
    /// All subrounds in order.
    pub const ALL: [SubroundId; 4] = [
        SubroundId::StartRound,
        SubroundId::Block,
        SubroundId::Signature,
        SubroundId::EndRound,
    ];

    /// Resolve a raw id.
    pub fn from_i32(value: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as i32 == value)
    }

    /// Raw id, as used by the chronology's current-subround cursor.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        match self {
            SubroundId::StartRound => "(START_ROUND)",
            SubroundId::Block => "(BLOCK)",
            SubroundId::Signature => "(SIGNATURE)",
            SubroundId::EndRound => "(END_ROUND)",
        }
    }
}

impl fmt::Display for SubroundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Display name for a raw subround id.
pub fn subround_name(id: i32) -> &'static str {
    SubroundId::from_i32(id)
        .map(SubroundId::name)
        .unwrap_or("Undefined subround")
}
