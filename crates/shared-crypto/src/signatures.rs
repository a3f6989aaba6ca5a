//! # Ed25519 Signatures
//!
//! Transaction and peer signatures. Deterministic nonces, no RNG on the
//! verification path.
//!
//! Batch verification splits large sets across a rayon pool; the result is
//! a single boolean and any invalid member fails the whole batch.

use crate::CryptoError;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rayon::prelude::*;
use shared_types::{Ed25519Pub, Ed25519Sig};
use zeroize::Zeroize;

/// Batches below this size are verified inline; larger ones fan out.
const PARALLEL_BATCH_THRESHOLD: usize = 32;

/// Ed25519 public key, validated on construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519PublicKey(VerifyingKey);

impl Ed25519PublicKey {
    /// Create from the 32-byte value type, rejecting invalid points.
    pub fn from_value(value: &Ed25519Pub) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(value.as_bytes())
            .map(Self)
            .map_err(|_| CryptoError::InvalidPublicKey)
    }

    pub fn to_value(&self) -> Ed25519Pub {
        Ed25519Pub::from_bytes(self.0.to_bytes())
    }

    /// Verify a signature over a message.
    pub fn verify(&self, message: &[u8], signature: &Ed25519Signature) -> Result<(), CryptoError> {
        self.0
            .verify(message, &signature.0)
            .map_err(|_| CryptoError::SignatureVerificationFailed)
    }
}

/// Ed25519 signature (64 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Ed25519Signature(ed25519_dalek::Signature);

impl Ed25519Signature {
    pub fn from_value(value: &Ed25519Sig) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(value.as_bytes()))
    }

    pub fn to_value(&self) -> Ed25519Sig {
        Ed25519Sig::from_bytes(self.0.to_bytes())
    }
}

/// Ed25519 keypair.
pub struct Ed25519KeyPair {
    signing_key: SigningKey,
}

impl Ed25519KeyPair {
    /// Generate a random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    /// Create from existing secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// Deterministic keypair for tests and devnets.
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&seed.to_le_bytes());
        let expanded = crate::blake3_hash(&bytes);
        Self::from_secret_bytes(expanded.as_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Ed25519Signature {
        Ed25519Signature(self.signing_key.sign(message))
    }

    pub fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.signing_key.verifying_key())
    }

    /// Secret key bytes; zeroize the buffer after use.
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

impl Drop for Ed25519KeyPair {
    fn drop(&mut self) {
        let mut bytes = self.signing_key.to_bytes();
        bytes.zeroize();
    }
}

/// Verify many `(message, signature, pubkey)` triples.
///
/// Returns `true` only if every signature is valid; any malformed key or
/// signature fails the whole batch. Length-mismatched inputs fail too.
pub fn batch_verify(messages: &[&[u8]], signatures: &[Ed25519Sig], pubkeys: &[Ed25519Pub]) -> bool {
    if messages.len() != signatures.len() || messages.len() != pubkeys.len() {
        return false;
    }
    if messages.is_empty() {
        return true;
    }

    let verify_one = |i: usize| -> bool {
        let Ok(key) = Ed25519PublicKey::from_value(&pubkeys[i]) else {
            return false;
        };
        key.verify(messages[i], &Ed25519Signature::from_value(&signatures[i]))
            .is_ok()
    };

    if messages.len() < PARALLEL_BATCH_THRESHOLD {
        (0..messages.len()).all(verify_one)
    } else {
        (0..messages.len()).into_par_iter().all(verify_one)
    }
}
