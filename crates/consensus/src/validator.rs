//! Consensus message validation.
//!
//! Every inbound message passes an ordered filter before it is trusted; the
//! first failing rule decides the error:
//!
//! 1. chain id
//! 2. kind shape and payload sizes
//! 3. header hash length (absent for body-carrying kinds)
//! 4. public key and signature length
//! 5. eligible list membership
//! 6. round equals the local round
//! 7. per (public key, round) per-kind ceiling
//! 8. peer signature
//! 9. declared originator equals the transport sender
//!
//! A message that passes is counted against rule 7.

use crate::config::ConsensusConfig;
use crate::consensus_state::ConsensusState;
use crate::error::display_bytes;
use crate::ConsensusError;
use dashmap::DashMap;
use spos_core::PeerSignatureHandler;
use spos_messages::{ConsensusMessage, MessageKind, MessageSchema, PayloadField, ShapeViolation};
use spos_types::{PeerId, SignerBitfield};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Largest body or header carried by a consensus message.
pub const MEGABYTE: usize = 1024 * 1024;

/// Validates consensus messages against the schema and the committee.
pub struct ConsensusMessageValidator {
    consensus_state: Arc<ConsensusState>,
    peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    schema: MessageSchema,
    chain_id: Vec<u8>,
    header_hash_size: usize,
    public_key_size: usize,
    signature_size: usize,
    public_key_bitmap_size: usize,
    /// (public key, round) -> messages accepted per kind.
    counters: DashMap<(Vec<u8>, i64), HashMap<MessageKind, u32>>,
}

impl ConsensusMessageValidator {
    pub fn new(
        config: &ConsensusConfig,
        consensus_state: Arc<ConsensusState>,
        peer_signature_handler: Arc<dyn PeerSignatureHandler>,
    ) -> Result<Self, ConsensusError> {
        if config.chain_id.is_empty() {
            return Err(ConsensusError::InvalidChainId("empty".into()));
        }
        if config.header_hash_size == 0 {
            return Err(ConsensusError::InvalidHeaderHashSize {
                expected: 1,
                actual: 0,
            });
        }
        if config.public_key_size == 0 {
            return Err(ConsensusError::InvalidPublicKeySize {
                expected: 1,
                actual: 0,
            });
        }
        if config.signature_size == 0 {
            return Err(ConsensusError::InvalidSignatureSize {
                expected: 1,
                actual: 0,
            });
        }

        let public_key_bitmap_size =
            SignerBitfield::byte_len(consensus_state.committee().consensus_group_size());

        Ok(Self {
            consensus_state,
            peer_signature_handler,
            schema: config.schema(),
            chain_id: config.chain_id_bytes(),
            header_hash_size: config.header_hash_size,
            public_key_size: config.public_key_size,
            signature_size: config.signature_size,
            public_key_bitmap_size,
            counters: DashMap::new(),
        })
    }

    /// The schema table in use.
    pub fn schema(&self) -> &MessageSchema {
        &self.schema
    }

    /// Run every rule against `msg`, received from transport peer `originator`.
    pub fn check_consensus_message_validity(
        &self,
        msg: &ConsensusMessage,
        originator: &PeerId,
    ) -> Result<(), ConsensusError> {
        if msg.chain_id != self.chain_id {
            return Err(ConsensusError::InvalidChainId(display_bytes(&msg.chain_id)));
        }

        let kind = self.check_message_shape(msg)?;

        self.check_header_hash(msg, kind)?;

        if msg.public_key.len() != self.public_key_size {
            return Err(ConsensusError::InvalidPublicKeySize {
                expected: self.public_key_size,
                actual: msg.public_key.len(),
            });
        }
        if msg.signature.len() != self.signature_size {
            return Err(ConsensusError::InvalidSignatureSize {
                expected: self.signature_size,
                actual: msg.signature.len(),
            });
        }

        if !self
            .consensus_state
            .committee()
            .is_node_in_eligible_list(&msg.public_key)
        {
            return Err(ConsensusError::NodeIsNotInEligibleList(display_bytes(
                &msg.public_key,
            )));
        }

        let local = self.consensus_state.round_index();
        if msg.round_index > local {
            trace!(
                kind = %kind,
                from = %display_bytes(&msg.public_key),
                msg_round = msg.round_index,
                round = local,
                "Message for future round"
            );
            return Err(ConsensusError::MessageForFutureRound {
                local,
                received: msg.round_index,
            });
        }
        if msg.round_index < local {
            trace!(
                kind = %kind,
                from = %display_bytes(&msg.public_key),
                msg_round = msg.round_index,
                round = local,
                "Message for past round"
            );
            return Err(ConsensusError::MessageForPastRound {
                local,
                received: msg.round_index,
            });
        }

        if self.is_message_type_limit_reached(&msg.public_key, msg.round_index, kind) {
            trace!(
                kind = %kind,
                public_key = %display_bytes(&msg.public_key),
                "Message type limit reached"
            );
            return Err(ConsensusError::MessageTypeLimitReached {
                kind: kind.as_str(),
                public_key: display_bytes(&msg.public_key),
                round: msg.round_index,
            });
        }

        self.peer_signature_handler
            .verify_peer_signature(&msg.public_key, &msg.originator_pid, &msg.signature)
            .map_err(|e| ConsensusError::InvalidSignature(e.to_string()))?;

        if msg.originator_pid != *originator {
            return Err(ConsensusError::OriginatorMismatch {
                transport: originator.clone(),
                declared: msg.originator_pid.clone(),
            });
        }

        self.add_message_type_to_public_key(&msg.public_key, msg.round_index, kind);

        Ok(())
    }

    /// Resolve the kind and check its shape and payload sizes.
    fn check_message_shape(&self, msg: &ConsensusMessage) -> Result<MessageKind, ConsensusError> {
        let kind = msg
            .kind()
            .ok_or(ConsensusError::InvalidMessageType(msg.msg_type))?;

        self.schema
            .check_shape(kind, &msg.present_fields())
            .map_err(|violation: ShapeViolation| {
                trace!(kind = %kind, %violation, "Invalid message shape");
                ConsensusError::InvalidMessage {
                    kind: kind.as_str(),
                    public_key: display_bytes(&msg.public_key),
                    reason: violation.to_string(),
                }
            })?;

        let len = |field| msg.field(field).map(<[u8]>::len).unwrap_or(0);

        match kind {
            MessageKind::BlockBodyAndHeader => {
                self.check_body_size(len(PayloadField::Body))?;
                self.check_header_size(len(PayloadField::Header))?;
            }
            MessageKind::BlockBody => {
                self.check_body_size(len(PayloadField::Body))?;
            }
            MessageKind::BlockHeader => {
                self.check_header_size(len(PayloadField::Header))?;
            }
            MessageKind::Signature => {
                self.check_signature_size(len(PayloadField::SignatureShare))?;
            }
            MessageKind::BlockHeaderFinalInfo => {
                let bitmap = len(PayloadField::PubKeysBitmap);
                if bitmap != self.public_key_bitmap_size {
                    return Err(ConsensusError::InvalidPublicKeyBitmapSize {
                        expected: self.public_key_bitmap_size,
                        actual: bitmap,
                    });
                }
                self.check_signature_size(len(PayloadField::AggregateSignature))?;
                let leader = msg.field(PayloadField::LeaderSignature);
                if let Some(leader) = leader {
                    self.check_signature_size(leader.len())?;
                }
            }
            MessageKind::InvalidSigners => {}
        }

        Ok(kind)
    }

    fn check_body_size(&self, size: usize) -> Result<(), ConsensusError> {
        if size > MEGABYTE {
            return Err(ConsensusError::InvalidBodySize {
                size,
                max: MEGABYTE,
            });
        }
        Ok(())
    }

    fn check_header_size(&self, size: usize) -> Result<(), ConsensusError> {
        if size == 0 || size > MEGABYTE {
            return Err(ConsensusError::InvalidHeaderSize {
                size,
                max: MEGABYTE,
            });
        }
        Ok(())
    }

    fn check_signature_size(&self, size: usize) -> Result<(), ConsensusError> {
        if size != self.signature_size {
            return Err(ConsensusError::InvalidSignatureSize {
                expected: self.signature_size,
                actual: size,
            });
        }
        Ok(())
    }

    fn check_header_hash(
        &self,
        msg: &ConsensusMessage,
        kind: MessageKind,
    ) -> Result<(), ConsensusError> {
        let actual = msg.header_hash().map(<[u8]>::len).unwrap_or(0);
        let valid = if kind.carries_body() {
            actual == 0
        } else {
            actual == self.header_hash_size
        };
        if !valid {
            let expected = if kind.carries_body() {
                0
            } else {
                self.header_hash_size
            };
            return Err(ConsensusError::InvalidHeaderHashSize { expected, actual });
        }
        Ok(())
    }

    fn is_message_type_limit_reached(&self, public_key: &[u8], round: i64, kind: MessageKind) -> bool {
        let Some(per_kind) = self.counters.get(&(public_key.to_vec(), round)) else {
            return false;
        };
        per_kind
            .get(&kind)
            .is_some_and(|count| *count >= self.schema.max_per_round(kind))
    }

    fn add_message_type_to_public_key(&self, public_key: &[u8], round: i64, kind: MessageKind) {
        *self
            .counters
            .entry((public_key.to_vec(), round))
            .or_default()
            .entry(kind)
            .or_insert(0) += 1;
    }

    /// Forget every per-key counter. Called at round rollover.
    pub fn reset_consensus_messages(&self) {
        self.counters.clear();
    }

    /// Messages of `kind` accepted from `public_key` in `round`.
    pub fn message_count(&self, public_key: &[u8], round: i64, kind: MessageKind) -> u32 {
        self.counters
            .get(&(public_key.to_vec(), round))
            .and_then(|per_kind| per_kind.get(&kind).copied())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_signature::PeerSignatureVerifier;
    use crate::round_consensus::RoundConsensus;
    use spos_test_helpers::{bls_keypair, StubKeysHandler};
    use spos_types::KeyPair;
    use std::collections::HashSet;

    const ROUND: i64 = 10;

    struct Fixture {
        validator: ConsensusMessageValidator,
        state: Arc<ConsensusState>,
        signer: KeyPair,
        peer: PeerId,
        verifier: Arc<PeerSignatureVerifier>,
    }

    fn fixture_with(config: ConsensusConfig) -> Fixture {
        let signer = bls_keypair(1);
        let eligible: HashSet<Vec<u8>> = [
            signer.public_key().to_bytes(),
            bls_keypair(2).public_key().to_bytes(),
        ]
        .into_iter()
        .collect();
        let rc = RoundConsensus::new(
            eligible,
            config.consensus_group_size,
            bls_keypair(0).public_key().to_bytes(),
            Arc::new(StubKeysHandler::new(bls_keypair(0))),
        );
        let state = Arc::new(ConsensusState::new(rc));
        state.set_round_index(ROUND);
        let verifier = Arc::new(PeerSignatureVerifier::new(64).unwrap());
        let validator =
            ConsensusMessageValidator::new(&config, state.clone(), verifier.clone()).unwrap();
        Fixture {
            validator,
            state,
            signer,
            peer: PeerId::new(b"peer-1".to_vec()),
            verifier,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ConsensusConfig::default())
    }

    impl Fixture {
        fn sign(&self, mut msg: ConsensusMessage) -> ConsensusMessage {
            msg.signature = self
                .verifier
                .get_peer_signature(&self.signer, &msg.originator_pid)
                .unwrap();
            msg
        }

        fn envelope(&self, kind: MessageKind, round: i64) -> ConsensusMessage {
            ConsensusMessage::new(
                kind,
                round,
                b"1".to_vec(),
                self.signer.public_key().to_bytes(),
                self.peer.clone(),
            )
        }

        /// A message of `kind` that passes every rule.
        fn valid(&self, kind: MessageKind, round: i64) -> ConsensusMessage {
            let msg = self.envelope(kind, round);
            let msg = match kind {
                MessageKind::BlockBodyAndHeader => msg.with_body(vec![1; 64]).with_header(vec![2; 64]),
                MessageKind::BlockBody => msg.with_body(vec![1; 64]),
                MessageKind::BlockHeader => msg.with_header(vec![2; 64]).with_header_hash(vec![3; 32]),
                MessageKind::Signature => msg.with_signature_share(vec![4; 96]).with_header_hash(vec![3; 32]),
                MessageKind::BlockHeaderFinalInfo => msg
                    .with_final_info(vec![0b0111_1111], vec![5; 96], vec![6; 96])
                    .with_header_hash(vec![3; 32]),
                MessageKind::InvalidSigners => msg.with_invalid_signers(vec![7; 20]).with_header_hash(vec![3; 32]),
            };
            self.sign(msg)
        }

        fn validate(&self, msg: &ConsensusMessage) -> Result<(), ConsensusError> {
            self.validator.check_consensus_message_validity(msg, &self.peer)
        }
    }

    #[test]
    fn test_constructor_rejects_zero_sizes() {
        let f = fixture();
        let verifier: Arc<dyn PeerSignatureHandler> = f.verifier.clone();
        let bad = [
            ConsensusConfig::default().with_chain_id(""),
            ConsensusConfig {
                header_hash_size: 0,
                ..Default::default()
            },
            ConsensusConfig::default().with_key_sizes(0, 96),
            ConsensusConfig::default().with_key_sizes(48, 0),
        ];
        for config in bad {
            assert!(ConsensusMessageValidator::new(&config, f.state.clone(), verifier.clone()).is_err());
        }
    }

    #[test]
    fn test_every_kind_accepts_a_well_formed_message() {
        let f = fixture();
        for kind in MessageKind::ALL {
            let msg = f.valid(kind, ROUND);
            assert!(f.validate(&msg).is_ok(), "{kind}");
        }
    }

    #[test]
    fn test_body_message_with_header_is_shape_violation() {
        let f = fixture();
        let msg = f.sign(f.envelope(MessageKind::BlockBody, ROUND).with_body(vec![1; 8]).with_header(vec![2; 8]));
        assert!(matches!(
            f.validate(&msg),
            Err(ConsensusError::InvalidMessage { kind: "(BLOCK_BODY)", .. })
        ));
    }

    #[test]
    fn test_shape_acceptance_matches_permitted_fields() {
        let f = fixture();
        let fields = PayloadField::ALL;
        for kind in MessageKind::ALL {
            let permitted = f.validator.schema().get(kind).unwrap().permitted.clone();
            for mask in 0u32..(1 << fields.len()) {
                let mut msg = f.valid(kind, ROUND);
                let chosen: Vec<PayloadField> = fields
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| mask & (1 << i) != 0)
                    .map(|(_, field)| *field)
                    .collect();
                // Rebuild the payload with exactly the chosen fields, reusing
                // well-formed values from a valid message of the same kind
                // where the kind defines them.
                let template = f.valid(kind, ROUND);
                let value = |field: PayloadField| -> Option<Vec<u8>> {
                    if !chosen.contains(&field) {
                        return None;
                    }
                    Some(template.field(field).map(<[u8]>::to_vec).unwrap_or_else(|| vec![9; 96]))
                };
                msg.body = value(PayloadField::Body);
                msg.header = value(PayloadField::Header);
                msg.signature_share = value(PayloadField::SignatureShare);
                msg.pubkeys_bitmap = value(PayloadField::PubKeysBitmap);
                msg.aggregate_signature = value(PayloadField::AggregateSignature);
                msg.leader_signature = value(PayloadField::LeaderSignature);
                msg.invalid_signers = value(PayloadField::InvalidSigners);

                f.validator.reset_consensus_messages();
                let accepted = f.validate(&msg).is_ok();
                let exact = chosen.len() == permitted.len() && chosen.iter().all(|c| permitted.contains(c));
                assert_eq!(accepted, exact, "{kind} {chosen:?}");
            }
        }
    }

    #[test]
    fn test_rules_are_ordered() {
        let f = fixture();
        // Wrong chain id wins over a shape violation.
        let mut msg = f.valid(MessageKind::BlockBody, ROUND).with_header(vec![1]);
        msg.chain_id = b"other".to_vec();
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidChainId(_))));

        // Shape wins over header hash.
        let msg = f.valid(MessageKind::BlockBody, ROUND).with_signature_share(vec![1; 96]).with_header_hash(vec![1; 32]);
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidMessage { .. })));
    }

    #[test]
    fn test_unknown_kind() {
        let f = fixture();
        let mut msg = f.valid(MessageKind::BlockBody, ROUND);
        msg.msg_type = 0;
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidMessageType(0))));
    }

    #[test]
    fn test_payload_size_limits() {
        let f = fixture();
        let msg = f.sign(f.envelope(MessageKind::BlockBody, ROUND).with_body(vec![0; MEGABYTE + 1]));
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidBodySize { .. })));

        let msg = f.sign(
            f.envelope(MessageKind::BlockHeader, ROUND)
                .with_header(vec![0; MEGABYTE + 1])
                .with_header_hash(vec![3; 32]),
        );
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidHeaderSize { .. })));

        let msg = f.sign(
            f.envelope(MessageKind::Signature, ROUND)
                .with_signature_share(vec![4; 95])
                .with_header_hash(vec![3; 32]),
        );
        assert!(matches!(
            f.validate(&msg),
            Err(ConsensusError::InvalidSignatureSize { expected: 96, actual: 95 })
        ));

        let msg = f.sign(
            f.envelope(MessageKind::BlockHeaderFinalInfo, ROUND)
                .with_final_info(vec![0, 0], vec![5; 96], vec![6; 96])
                .with_header_hash(vec![3; 32]),
        );
        assert!(matches!(
            f.validate(&msg),
            Err(ConsensusError::InvalidPublicKeyBitmapSize { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_leader_signature_optional_when_configured() {
        let f = fixture_with(ConsensusConfig::default().with_require_leader_signature(false));
        let mut msg = f.envelope(MessageKind::BlockHeaderFinalInfo, ROUND).with_header_hash(vec![3; 32]);
        msg.pubkeys_bitmap = Some(vec![1]);
        msg.aggregate_signature = Some(vec![5; 96]);
        let msg = f.sign(msg);
        assert!(f.validate(&msg).is_ok());
    }

    #[test]
    fn test_header_hash_rules() {
        let f = fixture();
        let msg = f.valid(MessageKind::BlockBody, ROUND).with_header_hash(vec![1; 32]);
        assert!(matches!(
            f.validate(&msg),
            Err(ConsensusError::InvalidHeaderHashSize { expected: 0, actual: 32 })
        ));

        let msg = f.valid(MessageKind::Signature, ROUND).with_header_hash(vec![1; 31]);
        assert!(matches!(
            f.validate(&msg),
            Err(ConsensusError::InvalidHeaderHashSize { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn test_key_and_signature_lengths() {
        let f = fixture();
        let mut msg = f.valid(MessageKind::BlockBody, ROUND);
        msg.public_key = vec![1; 47];
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidPublicKeySize { .. })));

        let mut msg = f.valid(MessageKind::BlockBody, ROUND);
        msg.signature = vec![1; 10];
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidSignatureSize { .. })));
    }

    #[test]
    fn test_not_eligible() {
        let f = fixture();
        let mut msg = f.valid(MessageKind::BlockBody, ROUND);
        msg.public_key = bls_keypair(9).public_key().to_bytes();
        assert!(matches!(f.validate(&msg), Err(ConsensusError::NodeIsNotInEligibleList(_))));
    }

    #[test]
    fn test_round_window() {
        let f = fixture();
        assert!(f.validate(&f.valid(MessageKind::BlockBody, ROUND)).is_ok());
        assert!(matches!(
            f.validate(&f.valid(MessageKind::BlockBody, ROUND + 1)),
            Err(ConsensusError::MessageForFutureRound { local: ROUND, received: 11 })
        ));
        assert!(matches!(
            f.validate(&f.valid(MessageKind::BlockBody, ROUND - 1)),
            Err(ConsensusError::MessageForPastRound { local: ROUND, received: 9 })
        ));
    }

    #[test]
    fn test_per_kind_ceiling() {
        let f = fixture();
        let pk = f.signer.public_key().to_bytes();

        // Signature kind: ceiling 2.
        assert!(f.validate(&f.valid(MessageKind::Signature, ROUND)).is_ok());
        assert!(f.validate(&f.valid(MessageKind::Signature, ROUND)).is_ok());
        assert!(matches!(
            f.validate(&f.valid(MessageKind::Signature, ROUND)),
            Err(ConsensusError::MessageTypeLimitReached { .. })
        ));
        assert_eq!(f.validator.message_count(&pk, ROUND, MessageKind::Signature), 2);

        // Other kinds and rounds are counted separately.
        assert!(f.validate(&f.valid(MessageKind::BlockBody, ROUND)).is_ok());
        f.state.set_round_index(ROUND + 1);
        assert!(f.validate(&f.valid(MessageKind::Signature, ROUND + 1)).is_ok());
        f.state.set_round_index(ROUND);

        f.validator.reset_consensus_messages();
        assert!(f.validate(&f.valid(MessageKind::Signature, ROUND)).is_ok());
    }

    #[test]
    fn test_failed_validation_is_not_counted() {
        let f = fixture();
        let pk = f.signer.public_key().to_bytes();
        let msg = f.valid(MessageKind::BlockBody, ROUND);
        assert!(f
            .validator
            .check_consensus_message_validity(&msg, &PeerId::new(b"other".to_vec()))
            .is_err());
        assert_eq!(f.validator.message_count(&pk, ROUND, MessageKind::BlockBody), 0);
        assert!(f.validate(&msg).is_ok());
    }

    #[test]
    fn test_bad_peer_signature() {
        let f = fixture();
        let mut msg = f.valid(MessageKind::BlockBody, ROUND);
        msg.signature[5] ^= 0xff;
        assert!(matches!(f.validate(&msg), Err(ConsensusError::InvalidSignature(_))));
    }

    #[test]
    fn test_originator_mismatch() {
        let f = fixture();
        let msg = f.valid(MessageKind::BlockBody, ROUND);
        let result = f
            .validator
            .check_consensus_message_validity(&msg, &PeerId::new(b"relay".to_vec()));
        assert!(matches!(result, Err(ConsensusError::OriginatorMismatch { .. })));
    }
}
