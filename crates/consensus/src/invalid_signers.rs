//! Cache of invalid-signers claims already processed.
//!
//! An invalid-signers payload is the codec encoding of the list of public
//! keys whose signature shares failed verification. Two claims are
//! duplicates when their payloads are byte-identical, or when every key they
//! name is already known to be invalid for the same header.

use crate::ConsensusError;
use lru::LruCache;
use parking_lot::Mutex;
use spos_messages::decode_payload;
use spos_types::Hash;
use std::collections::HashSet;
use std::num::NonZeroUsize;

struct Inner {
    payload_hashes: LruCache<Hash, ()>,
    signers_by_header: LruCache<Vec<u8>, HashSet<Vec<u8>>>,
}

/// Bounded memory of invalid-signers claims.
pub struct InvalidSignersCache {
    inner: Mutex<Inner>,
}

impl InvalidSignersCache {
    pub fn new(capacity: usize) -> Result<Self, ConsensusError> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            ConsensusError::InvalidConfig("invalid signers cache size is zero".into())
        })?;
        Ok(Self {
            inner: Mutex::new(Inner {
                payload_hashes: LruCache::new(capacity),
                signers_by_header: LruCache::new(capacity),
            }),
        })
    }

    /// Decode the public keys named by a payload.
    pub fn decode_signers(payload: &[u8]) -> Option<Vec<Vec<u8>>> {
        decode_payload(payload).ok()
    }

    /// True if the claim was already seen.
    pub fn check_known(&self, header_hash: &[u8], payload: &[u8]) -> bool {
        let payload_hash = Hash::from_bytes(payload);
        let mut inner = self.inner.lock();
        if inner.payload_hashes.contains(&payload_hash) {
            return true;
        }

        let Some(known) = inner.signers_by_header.get(header_hash) else {
            return false;
        };
        match Self::decode_signers(payload) {
            Some(signers) if !signers.is_empty() => signers.iter().all(|pk| known.contains(pk)),
            _ => false,
        }
    }

    /// Remember a processed claim.
    pub fn add(&self, header_hash: &[u8], payload: &[u8]) {
        let payload_hash = Hash::from_bytes(payload);
        let signers = Self::decode_signers(payload).unwrap_or_default();

        let mut inner = self.inner.lock();
        inner.payload_hashes.put(payload_hash, ());
        if let Some(known) = inner.signers_by_header.get_mut(header_hash) {
            known.extend(signers);
        } else {
            inner
                .signers_by_header
                .put(header_hash.to_vec(), signers.into_iter().collect());
        }
    }

    /// Forget everything.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.payload_hashes.clear();
        inner.signers_by_header.clear();
    }
}
