//! Network messages for the round consensus protocol.

pub mod codec;
pub mod kind;
pub mod message;
pub mod schema;

// Re-export commonly used types
pub use codec::{
    decode_message, decode_payload, encode_message, encode_payload, pack_in_chunks, CodecError,
};
pub use kind::{message_kind_name, subround_name, MessageKind, SubroundId};
pub use message::ConsensusMessage;
pub use schema::{KindSchema, MessageSchema, PayloadField, ShapeViolation};
