//! Cryptographic key pairs and signatures.
//!
//! Supports:
//! - ED25519: transport identities and peer signatures
//! - BLS12-381: validator keys whose shares aggregate into the final-info signature

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a compressed BLS12-381 (min_pk) public key.
const BLS_PUBLIC_KEY_LEN: usize = 48;

/// Length of an ED25519 public key.
const ED25519_PUBLIC_KEY_LEN: usize = 32;

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// ED25519 - Fast, widely supported.
    Ed25519,
    /// BLS12-381 - Supports signature aggregation.
    Bls12381,
}

/// A cryptographic key pair for signing.
#[derive(Clone)]
pub enum KeyPair {
    /// ED25519 key pair.
    Ed25519(ed25519_dalek::SigningKey),
    /// BLS12-381 key pair.
    Bls12381(blst::min_pk::SecretKey),
}

impl KeyPair {
    /// Generate a new random Ed25519 keypair.
    pub fn generate_ed25519() -> Self {
        let mut csprng = rand::rngs::OsRng;
        KeyPair::Ed25519(ed25519_dalek::SigningKey::generate(&mut csprng))
    }

    /// Generate a new random BLS12-381 keypair.
    pub fn generate_bls() -> Result<Self, KeyError> {
        let mut ikm = [0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut ikm);
        Self::from_seed(KeyType::Bls12381, &ikm)
    }

    /// Derive a keypair from a seed (fixtures and simulation).
    pub fn from_seed(key_type: KeyType, seed: &[u8; 32]) -> Result<Self, KeyError> {
        match key_type {
            KeyType::Ed25519 => Ok(KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(
                seed,
            ))),
            KeyType::Bls12381 => blst::min_pk::SecretKey::key_gen(seed, &[])
                .map(KeyPair::Bls12381)
                .map_err(|_| KeyError::KeyGeneration),
        }
    }

    /// Rebuild a keypair from its serialized secret.
    pub fn from_secret_bytes(key_type: KeyType, bytes: &[u8]) -> Result<Self, KeyError> {
        match key_type {
            KeyType::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
                    expected: 32,
                    actual: bytes.len(),
                })?;
                Ok(KeyPair::Ed25519(ed25519_dalek::SigningKey::from_bytes(&arr)))
            }
            KeyType::Bls12381 => blst::min_pk::SecretKey::from_bytes(bytes)
                .map(KeyPair::Bls12381)
                .map_err(|_| KeyError::InvalidEncoding),
        }
    }

    /// Serialized secret key bytes.
    pub fn secret_bytes(&self) -> Vec<u8> {
        match self {
            KeyPair::Ed25519(signing_key) => signing_key.to_bytes().to_vec(),
            KeyPair::Bls12381(sk) => sk.to_bytes().to_vec(),
        }
    }

    /// The kind of key held.
    pub fn key_type(&self) -> KeyType {
        match self {
            KeyPair::Ed25519(_) => KeyType::Ed25519,
            KeyPair::Bls12381(_) => KeyType::Bls12381,
        }
    }

    /// Sign a message.
    pub fn sign(&self, message: &[u8]) -> Signature {
        match self {
            KeyPair::Ed25519(signing_key) => {
                use ed25519_dalek::Signer;
                let sig = signing_key.sign(message);
                Signature::Ed25519(sig.to_bytes().to_vec())
            }
            KeyPair::Bls12381(sk) => {
                let sig = sk.sign(message, &[], &[]);
                Signature::Bls12381(sig.to_bytes().to_vec())
            }
        }
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        match self {
            KeyPair::Ed25519(signing_key) => {
                PublicKey::Ed25519(signing_key.verifying_key().to_bytes())
            }
            KeyPair::Bls12381(sk) => PublicKey::Bls12381(sk.sk_to_pk().to_bytes().to_vec()),
        }
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair({:?})", self.public_key())
    }
}

/// A public key for signature verification.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PublicKey {
    /// ED25519 public key (32 bytes).
    Ed25519([u8; 32]),
    /// BLS12-381 public key (48 bytes compressed).
    Bls12381(Vec<u8>),
}

impl PublicKey {
    /// Interpret raw bytes as a public key, choosing the scheme by length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        match bytes.len() {
            ED25519_PUBLIC_KEY_LEN => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(bytes);
                Ok(PublicKey::Ed25519(arr))
            }
            BLS_PUBLIC_KEY_LEN => Ok(PublicKey::Bls12381(bytes.to_vec())),
            other => Err(KeyError::InvalidLength {
                expected: BLS_PUBLIC_KEY_LEN,
                actual: other,
            }),
        }
    }

    /// Raw key bytes, as carried in consensus messages.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(bytes) => bytes.to_vec(),
            PublicKey::Bls12381(bytes) => bytes.clone(),
        }
    }

    /// Verify a signature.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match (self, signature) {
            (PublicKey::Ed25519(pk_bytes), Signature::Ed25519(sig_bytes)) => {
                use ed25519_dalek::Verifier;
                let pk = match ed25519_dalek::VerifyingKey::from_bytes(pk_bytes) {
                    Ok(pk) => pk,
                    Err(_) => return false,
                };
                let sig_array: [u8; 64] = match sig_bytes.as_slice().try_into() {
                    Ok(arr) => arr,
                    Err(_) => return false,
                };
                let sig = ed25519_dalek::Signature::from_bytes(&sig_array);
                pk.verify(message, &sig).is_ok()
            }
            (PublicKey::Bls12381(pk_bytes), Signature::Bls12381(sig_bytes)) => {
                let pk = match blst::min_pk::PublicKey::from_bytes(pk_bytes) {
                    Ok(pk) => pk,
                    Err(_) => return false,
                };
                let sig = match blst::min_pk::Signature::from_bytes(sig_bytes) {
                    Ok(sig) => sig,
                    Err(_) => return false,
                };
                sig.verify(true, message, &[], &[], &pk, true) == blst::BLST_ERROR::BLST_SUCCESS
            }
            _ => false, // Mismatched types
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicKey::Ed25519(bytes) => {
                write!(f, "PublicKey::Ed25519({})", hex::encode(bytes))
            }
            PublicKey::Bls12381(bytes) => {
                let hex = hex::encode(bytes);
                if hex.len() < 16 {
                    return write!(f, "PublicKey::Bls12381({})", hex);
                }
                write!(
                    f,
                    "PublicKey::Bls12381({}..{})",
                    &hex[..8],
                    &hex[hex.len() - 8..]
                )
            }
        }
    }
}

/// A cryptographic signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signature {
    /// ED25519 signature (64 bytes).
    Ed25519(Vec<u8>),
    /// BLS12-381 signature (96 bytes compressed).
    Bls12381(Vec<u8>),
}

impl Signature {
    /// Get signature as byte slice.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Signature::Ed25519(bytes) => bytes.as_slice(),
            Signature::Bls12381(bytes) => bytes.as_slice(),
        }
    }

    /// Get signature as owned bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Wrap raw bytes in the signature scheme matching `public_key`.
    pub fn for_key(public_key: &PublicKey, bytes: &[u8]) -> Self {
        match public_key {
            PublicKey::Ed25519(_) => Signature::Ed25519(bytes.to_vec()),
            PublicKey::Bls12381(_) => Signature::Bls12381(bytes.to_vec()),
        }
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (scheme, bytes) = match self {
            Signature::Ed25519(bytes) => ("Ed25519", bytes),
            Signature::Bls12381(bytes) => ("Bls12381", bytes),
        };
        let hex = hex::encode(bytes);
        write!(f, "Signature::{}({}..)", scheme, &hex[..hex.len().min(16)])
    }
}

/// Errors that can occur when building keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Key material has the wrong length.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Key material could not be decoded.
    #[error("Invalid key encoding")]
    InvalidEncoding,

    /// Key derivation from seed failed.
    #[error("Key generation failed")]
    KeyGeneration,
}
