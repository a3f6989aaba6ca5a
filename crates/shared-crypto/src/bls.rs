//! # BLS12-381 Signatures
//!
//! Consensus vote signatures in the min_pk configuration: 48-byte G1 public
//! keys, 96-byte G2 signatures. Votes from a quorum aggregate into one
//! certificate signature verified against the aggregate of the voters' keys.
//!
//! ## Subgroup safety
//!
//! G2 has a non-trivial cofactor, so every deserialized point is group- and
//! subgroup-checked before use, and identity points are rejected outright.
//! Skipping either check lets a small-subgroup forgery satisfy the pairing.

use crate::CryptoError;
use blst::min_pk::{AggregatePublicKey, AggregateSignature, PublicKey, SecretKey, Signature};
use blst::BLST_ERROR;
use rand::RngCore;
use shared_types::{BlsPub, BlsSig};
use zeroize::Zeroize;

/// Domain separation tag (Ethereum 2.0 compatible).
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_POP_";

/// Compressed-infinity marker: flag bits 0b1100_0000 and all-zero body.
fn is_compressed_identity(bytes: &[u8]) -> bool {
    bytes[0] == 0xc0 && bytes[1..].iter().all(|b| *b == 0)
}

/// BLS public key, validated on construction.
#[derive(Clone, Debug)]
pub struct BlsPublicKey(PublicKey);

impl PartialEq for BlsPublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bytes() == other.0.to_bytes()
    }
}

impl Eq for BlsPublicKey {}

impl BlsPublicKey {
    /// Deserialize from the 48-byte value type. Rejects off-curve points,
    /// wrong-subgroup points, and the identity.
    pub fn from_value(value: &BlsPub) -> Result<Self, CryptoError> {
        if is_compressed_identity(value.as_bytes()) {
            return Err(CryptoError::IdentityPublicKey);
        }
        let key = PublicKey::key_validate(value.as_bytes())
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(key))
    }

    pub fn to_value(&self) -> BlsPub {
        BlsPub::from_bytes(self.0.to_bytes())
    }

    /// Verify a single signature over a message.
    pub fn verify(&self, message: &[u8], signature: &BlsSignature) -> bool {
        signature.0.verify(true, message, DST, &[], &self.0, true) == BLST_ERROR::BLST_SUCCESS
    }

    /// Aggregate public keys. Commutative and associative over any subset.
    pub fn aggregate(keys: &[BlsPublicKey]) -> Result<Self, CryptoError> {
        if keys.is_empty() {
            return Err(CryptoError::InvalidInput("empty key list".into()));
        }
        let refs: Vec<&PublicKey> = keys.iter().map(|k| &k.0).collect();
        AggregatePublicKey::aggregate(&refs, true)
            .map(|apk| Self(apk.to_public_key()))
            .map_err(|_| CryptoError::AggregationFailed)
    }
}

/// BLS signature (96 bytes compressed).
#[derive(Clone, Debug)]
pub struct BlsSignature(Signature);

impl PartialEq for BlsSignature {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bytes() == other.0.to_bytes()
    }
}

impl Eq for BlsSignature {}

impl BlsSignature {
    /// Deserialize from the 96-byte value type with subgroup validation.
    pub fn from_value(value: &BlsSig) -> Result<Self, CryptoError> {
        if is_compressed_identity(value.as_bytes()) {
            return Err(CryptoError::InvalidSignature);
        }
        let sig = Signature::sig_validate(value.as_bytes(), true)
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(sig))
    }

    pub fn to_value(&self) -> BlsSig {
        BlsSig::from_bytes(self.0.to_bytes())
    }

    /// Aggregate signatures from distinct signers over the same message.
    pub fn aggregate(sigs: &[BlsSignature]) -> Result<Self, CryptoError> {
        if sigs.is_empty() {
            return Err(CryptoError::InvalidInput("empty signature list".into()));
        }
        let refs: Vec<&Signature> = sigs.iter().map(|s| &s.0).collect();
        AggregateSignature::aggregate(&refs, true)
            .map(|agg| Self(agg.to_signature()))
            .map_err(|_| CryptoError::AggregationFailed)
    }

    /// Verify this signature as an aggregate over `keys`, all signing the
    /// same message.
    pub fn fast_aggregate_verify(&self, message: &[u8], keys: &[BlsPublicKey]) -> bool {
        let Ok(aggregate_key) = BlsPublicKey::aggregate(keys) else {
            return false;
        };
        aggregate_key.verify(message, self)
    }
}

/// BLS key pair for consensus signing.
pub struct BlsKeyPair {
    secret: SecretKey,
    public: BlsPublicKey,
}

impl Clone for BlsKeyPair {
    fn clone(&self) -> Self {
        // Serialize round-trip; a held key is always valid.
        let secret = SecretKey::from_bytes(&self.secret.to_bytes()).expect("valid secret key");
        Self {
            secret,
            public: self.public.clone(),
        }
    }
}

impl BlsKeyPair {
    /// Generate a new random key pair.
    pub fn generate() -> Self {
        let mut ikm = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut ikm);
        let pair = Self::from_ikm(&ikm);
        ikm.zeroize();
        pair
    }

    /// Deterministic keypair for tests and devnets.
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&seed.to_le_bytes());
        let ikm = crate::blake3_hash(&bytes);
        Self::from_ikm(ikm.as_bytes())
    }

    fn from_ikm(ikm: &[u8; 32]) -> Self {
        let secret = SecretKey::key_gen(ikm, &[]).expect("valid IKM");
        let public = BlsPublicKey(secret.sk_to_pk());
        Self { secret, public }
    }

    pub fn sign(&self, message: &[u8]) -> BlsSignature {
        BlsSignature(self.secret.sign(message, DST, &[]))
    }

    pub fn public_key(&self) -> BlsPublicKey {
        self.public.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = BlsKeyPair::from_seed(1);
        let sig = pair.sign(b"block-hash");
        assert!(pair.public_key().verify(b"block-hash", &sig));
        assert!(!pair.public_key().verify(b"other", &sig));
    }

    #[test]
    fn aggregate_verifies_against_aggregate_key() {
        let pairs: Vec<_> = (0..4).map(BlsKeyPair::from_seed).collect();
        let message = b"commit:42";
        let sigs: Vec<_> = pairs.iter().map(|p| p.sign(message)).collect();
        let keys: Vec<_> = pairs.iter().map(BlsKeyPair::public_key).collect();

        let agg = BlsSignature::aggregate(&sigs).unwrap();
        assert!(agg.fast_aggregate_verify(message, &keys));

        // Missing one signer's key breaks verification.
        assert!(!agg.fast_aggregate_verify(message, &keys[..3]));
    }

    #[test]
    fn aggregation_is_order_independent() {
        let pairs: Vec<_> = (0..3).map(BlsKeyPair::from_seed).collect();
        let message = b"prepare:7";
        let sigs: Vec<_> = pairs.iter().map(|p| p.sign(message)).collect();

        let forward = BlsSignature::aggregate(&sigs).unwrap();
        let reversed: Vec<_> = sigs.iter().rev().cloned().collect();
        let backward = BlsSignature::aggregate(&reversed).unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn identity_pubkey_rejected() {
        let mut identity = [0u8; 48];
        identity[0] = 0xc0;
        assert_eq!(
            BlsPublicKey::from_value(&BlsPub::from_bytes(identity)),
            Err(CryptoError::IdentityPublicKey)
        );
    }

    #[test]
    fn garbage_point_rejected() {
        let garbage = BlsPub::from_bytes([0x42; 48]);
        assert!(BlsPublicKey::from_value(&garbage).is_err());
        let garbage_sig = BlsSig::from_bytes([0x42; 96]);
        assert!(BlsSignature::from_value(&garbage_sig).is_err());
    }

    #[test]
    fn value_round_trip() {
        let pair = BlsKeyPair::from_seed(9);
        let value = pair.public_key().to_value();
        let back = BlsPublicKey::from_value(&value).unwrap();
        assert_eq!(back, pair.public_key());
    }
}
