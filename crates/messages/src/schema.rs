//! Per-kind validity schema.
//!
//! The table is built once at startup and consulted for every inbound message:
//! which payload fields a kind may carry, which it must carry, how many
//! messages of the kind one key may send per round, and which subround has to
//! be finished before the kind can be processed.

use crate::kind::{MessageKind, SubroundId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Optional payload fields of a consensus message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PayloadField {
    Body,
    Header,
    SignatureShare,
    PubKeysBitmap,
    AggregateSignature,
    LeaderSignature,
    InvalidSigners,
}

impl PayloadField {
    /// Every payload field.
    pub const ALL: [PayloadField; 7] = [
        PayloadField::Body,
        PayloadField::Header,
        PayloadField::SignatureShare,
        PayloadField::PubKeysBitmap,
        PayloadField::AggregateSignature,
        PayloadField::LeaderSignature,
        PayloadField::InvalidSigners,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PayloadField::Body => "body",
            PayloadField::Header => "header",
            PayloadField::SignatureShare => "signature_share",
            PayloadField::PubKeysBitmap => "pubkeys_bitmap",
            PayloadField::AggregateSignature => "aggregate_signature",
            PayloadField::LeaderSignature => "leader_signature",
            PayloadField::InvalidSigners => "invalid_signers",
        }
    }
}

impl fmt::Display for PayloadField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Schema entry for one message kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindSchema {
    /// Fields that may be non-empty.
    pub permitted: Vec<PayloadField>,
    /// Fields that must be non-empty. Always a subset of `permitted`.
    pub required: Vec<PayloadField>,
    /// Messages of this kind accepted per (public key, round).
    pub max_per_round: u32,
    /// Subround that must be finished before the kind is processed.
    pub gated_by: SubroundId,
}

/// Outcome of a shape check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShapeViolation {
    /// A field outside the permitted set is populated.
    Unexpected(PayloadField),
    /// A required field is empty.
    Missing(PayloadField),
}

impl fmt::Display for ShapeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShapeViolation::Unexpected(field) => write!(f, "unexpected field {}", field),
            ShapeViolation::Missing(field) => write!(f, "missing field {}", field),
        }
    }
}

/// The schema table, indexed by kind.
#[derive(Debug, Clone)]
pub struct MessageSchema {
    kinds: HashMap<MessageKind, KindSchema>,
}

impl Default for MessageSchema {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MessageSchema {
    /// Default ceiling for signature messages per key and round.
    pub const MAX_SIGNATURES_PER_ROUND: u32 = 2;
    /// Default ceiling for every other kind.
    pub const MAX_MESSAGES_PER_ROUND: u32 = 1;

    /// Build the table. When `require_leader_signature` is false a final-info
    /// message may omit the leader signature.
    pub fn new(require_leader_signature: bool) -> Self {
        use PayloadField::*;

        let mut final_info_required = vec![PubKeysBitmap, AggregateSignature];
        if require_leader_signature {
            final_info_required.push(LeaderSignature);
        }

        let entries = [
            (
                MessageKind::BlockBodyAndHeader,
                vec![Body, Header],
                vec![Body, Header],
                SubroundId::StartRound,
            ),
            (
                MessageKind::BlockBody,
                vec![Body],
                vec![Body],
                SubroundId::StartRound,
            ),
            (
                MessageKind::BlockHeader,
                vec![Header],
                vec![Header],
                SubroundId::StartRound,
            ),
            (
                MessageKind::Signature,
                vec![SignatureShare],
                vec![SignatureShare],
                SubroundId::Block,
            ),
            (
                MessageKind::BlockHeaderFinalInfo,
                vec![PubKeysBitmap, AggregateSignature, LeaderSignature],
                final_info_required,
                SubroundId::Signature,
            ),
            (
                MessageKind::InvalidSigners,
                vec![InvalidSigners],
                vec![InvalidSigners],
                SubroundId::Signature,
            ),
        ];

        let kinds = entries
            .into_iter()
            .map(|(kind, permitted, required, gated_by)| {
                let max_per_round = if kind == MessageKind::Signature {
                    Self::MAX_SIGNATURES_PER_ROUND
                } else {
                    Self::MAX_MESSAGES_PER_ROUND
                };
                (
                    kind,
                    KindSchema {
                        permitted,
                        required,
                        max_per_round,
                        gated_by,
                    },
                )
            })
            .collect();

        Self { kinds }
    }

    /// Override the per-round ceiling for a kind.
    pub fn with_max_per_round(mut self, kind: MessageKind, max: u32) -> Self {
        if let Some(entry) = self.kinds.get_mut(&kind) {
            entry.max_per_round = max;
        }
        self
    }

    /// Schema entry for a kind.
    pub fn get(&self, kind: MessageKind) -> Option<&KindSchema> {
        self.kinds.get(&kind)
    }

    /// Per-round ceiling for a kind; zero for kinds missing from the table.
    pub fn max_per_round(&self, kind: MessageKind) -> u32 {
        self.kinds
            .get(&kind)
            .map(|entry| entry.max_per_round)
            .unwrap_or(0)
    }

    /// Check which fields are populated against the kind's entry.
    ///
    /// Unexpected fields are reported before missing ones.
    pub fn check_shape(
        &self,
        kind: MessageKind,
        present: &[PayloadField],
    ) -> Result<(), ShapeViolation> {
        let Some(entry) = self.kinds.get(&kind) else {
            return Ok(());
        };
        if let Some(field) = present.iter().find(|f| !entry.permitted.contains(f)) {
            return Err(ShapeViolation::Unexpected(*field));
        }
        if let Some(field) = entry.required.iter().find(|f| !present.contains(f)) {
            return Err(ShapeViolation::Missing(*field));
        }
        Ok(())
    }

    /// Whether a message of `kind` can be processed, given a predicate telling
    /// which subrounds are finished.
    pub fn can_proceed(&self, kind: MessageKind, is_finished: impl Fn(SubroundId) -> bool) -> bool {
        self.kinds
            .get(&kind)
            .map(|entry| is_finished(entry.gated_by))
            .unwrap_or(false)
    }
}
