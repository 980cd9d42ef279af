//! The consensus message envelope.

use crate::kind::MessageKind;
use crate::schema::PayloadField;
use serde::{Deserialize, Serialize};
use spos_types::PeerId;

/// A signed consensus envelope.
///
/// Exactly one kind of payload travels in each message; which optional fields
/// may be populated is decided by [`crate::MessageSchema`]. The kind is kept as
/// its raw wire value so that unknown kinds survive decoding and are rejected
/// by validation with a precise error rather than a generic decode failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusMessage {
    /// Hash of the header the message refers to. Absent for body-carrying kinds.
    pub header_hash: Option<Vec<u8>>,
    /// Validator's signature share.
    pub signature_share: Option<Vec<u8>>,
    /// Serialized block body.
    pub body: Option<Vec<u8>>,
    /// Serialized block header.
    pub header: Option<Vec<u8>>,
    /// Public key of the committee member that produced the message.
    pub public_key: Vec<u8>,
    /// Peer signature binding `public_key` to `originator_pid`.
    pub signature: Vec<u8>,
    /// Raw wire value of the message kind.
    pub msg_type: i64,
    /// Round the message belongs to.
    pub round_index: i64,
    /// Chain the message belongs to.
    pub chain_id: Vec<u8>,
    /// Signer bitmap of the aggregated signature.
    pub pubkeys_bitmap: Option<Vec<u8>>,
    /// Aggregated signature over the header.
    pub aggregate_signature: Option<Vec<u8>>,
    /// Leader signature over the final header.
    pub leader_signature: Option<Vec<u8>>,
    /// Peer that originated the message.
    pub originator_pid: PeerId,
    /// Serialized invalid-signers claim.
    pub invalid_signers: Option<Vec<u8>>,
}

impl ConsensusMessage {
    /// Create an envelope with no payload. The peer signature is filled in by
    /// the messenger right before broadcast.
    pub fn new(
        kind: MessageKind,
        round_index: i64,
        chain_id: Vec<u8>,
        public_key: Vec<u8>,
        originator_pid: PeerId,
    ) -> Self {
        Self {
            header_hash: None,
            signature_share: None,
            body: None,
            header: None,
            public_key,
            signature: Vec::new(),
            msg_type: kind.to_wire(),
            round_index,
            chain_id,
            pubkeys_bitmap: None,
            aggregate_signature: None,
            leader_signature: None,
            originator_pid,
            invalid_signers: None,
        }
    }

    pub fn with_header_hash(mut self, hash: Vec<u8>) -> Self {
        self.header_hash = Some(hash);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, header: Vec<u8>) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_signature_share(mut self, share: Vec<u8>) -> Self {
        self.signature_share = Some(share);
        self
    }

    /// Attach the final-info triple.
    pub fn with_final_info(
        mut self,
        pubkeys_bitmap: Vec<u8>,
        aggregate_signature: Vec<u8>,
        leader_signature: Vec<u8>,
    ) -> Self {
        self.pubkeys_bitmap = Some(pubkeys_bitmap);
        self.aggregate_signature = Some(aggregate_signature);
        self.leader_signature = Some(leader_signature);
        self
    }

    pub fn with_invalid_signers(mut self, invalid_signers: Vec<u8>) -> Self {
        self.invalid_signers = Some(invalid_signers);
        self
    }

    /// The resolved kind, or `None` for unknown wire values.
    pub fn kind(&self) -> Option<MessageKind> {
        MessageKind::from_wire(self.msg_type)
    }

    /// Bytes of a payload field. Empty slices count as absent.
    pub fn field(&self, field: PayloadField) -> Option<&[u8]> {
        let value = match field {
            PayloadField::Body => &self.body,
            PayloadField::Header => &self.header,
            PayloadField::SignatureShare => &self.signature_share,
            PayloadField::PubKeysBitmap => &self.pubkeys_bitmap,
            PayloadField::AggregateSignature => &self.aggregate_signature,
            PayloadField::LeaderSignature => &self.leader_signature,
            PayloadField::InvalidSigners => &self.invalid_signers,
        };
        value.as_deref().filter(|bytes| !bytes.is_empty())
    }

    /// Header hash, treating an empty value as absent.
    pub fn header_hash(&self) -> Option<&[u8]> {
        self.header_hash
            .as_deref()
            .filter(|bytes| !bytes.is_empty())
    }

    /// Payload fields that are non-empty.
    pub fn present_fields(&self) -> Vec<PayloadField> {
        PayloadField::ALL
            .into_iter()
            .filter(|field| self.field(*field).is_some())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(kind: MessageKind) -> ConsensusMessage {
        ConsensusMessage::new(
            kind,
            10,
            b"chain".to_vec(),
            vec![1; 48],
            PeerId::new(b"peer".to_vec()),
        )
    }

    #[test]
    fn test_new_envelope_has_no_payload() {
        let msg = envelope(MessageKind::Signature);
        assert_eq!(msg.kind(), Some(MessageKind::Signature));
        assert!(msg.present_fields().is_empty());
        assert!(msg.header_hash().is_none());
    }

    #[test]
    fn test_empty_fields_count_as_absent() {
        let msg = envelope(MessageKind::BlockBody)
            .with_body(Vec::new())
            .with_header_hash(Vec::new());
        assert!(msg.field(PayloadField::Body).is_none());
        assert!(msg.header_hash().is_none());
    }

    #[test]
    fn test_present_fields_follow_builders() {
        let msg = envelope(MessageKind::BlockHeaderFinalInfo).with_final_info(
            vec![0b111],
            vec![2; 96],
            vec![3; 96],
        );
        assert_eq!(
            msg.present_fields(),
            vec![
                PayloadField::PubKeysBitmap,
                PayloadField::AggregateSignature,
                PayloadField::LeaderSignature,
            ]
        );
    }

    #[test]
    fn test_unknown_kind_is_preserved() {
        let mut msg = envelope(MessageKind::BlockBody);
        msg.msg_type = 42;
        assert_eq!(msg.kind(), None);
    }
}
