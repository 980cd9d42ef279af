//! Message encoding and decoding for network transport.
//!
//! # Wire Format
//!
//! Every payload published by the consensus runtime is bincode-encoded then
//! LZ4-compressed with a little-endian `u32` length prefix:
//!
//! ```text
//! [u32 uncompressed length][LZ4 block]
//! ```
//!
//! The message kind travels inside the envelope; topics only route.

use crate::message::ConsensusMessage;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Largest uncompressed payload accepted from the wire.
pub const MAX_UNCOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Message too short")]
    MessageTooShort,

    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Decompression error: {0}")]
    Decompress(String),

    #[error("Declared payload size {declared} exceeds limit {limit}")]
    TooLarge { declared: usize, limit: usize },
}

/// Encode any payload to wire format.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let bytes = bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&bytes))
}

/// Decode any payload from wire format.
pub fn decode_payload<T: DeserializeOwned>(data: &[u8]) -> Result<T, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::MessageTooShort);
    }

    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared > MAX_UNCOMPRESSED_SIZE {
        return Err(CodecError::TooLarge {
            declared,
            limit: MAX_UNCOMPRESSED_SIZE,
        });
    }

    let payload = lz4_flex::decompress_size_prepended(data)
        .map_err(|e| CodecError::Decompress(e.to_string()))?;
    bincode::deserialize(&payload).map_err(|e| CodecError::Decode(e.to_string()))
}

/// Encode a consensus message to wire format.
pub fn encode_message(message: &ConsensusMessage) -> Result<Vec<u8>, CodecError> {
    encode_payload(message)
}

/// Decode a consensus message from wire format.
pub fn decode_message(data: &[u8]) -> Result<ConsensusMessage, CodecError> {
    decode_payload(data)
}

/// Split `items` into encoded chunks whose summed item sizes stay within
/// `max_chunk_size`.
///
/// An item larger than the limit travels alone in its own chunk.
pub fn pack_in_chunks(items: &[Vec<u8>], max_chunk_size: usize) -> Result<Vec<Vec<u8>>, CodecError> {
    let mut chunks = Vec::new();
    let mut current: Vec<&[u8]> = Vec::new();
    let mut current_size = 0usize;

    for item in items {
        if !current.is_empty() && current_size + item.len() > max_chunk_size {
            chunks.push(encode_payload(&current)?);
            current.clear();
            current_size = 0;
        }
        current.push(item);
        current_size += item.len();
    }

    if !current.is_empty() {
        chunks.push(encode_payload(&current)?);
    }

    Ok(chunks)
}
