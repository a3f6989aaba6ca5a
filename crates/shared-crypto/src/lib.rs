//! # Shared Crypto Crate
//!
//! Cryptographic primitives for the node:
//!
//! - **BLAKE3** - default hash, plus `pair_hash` for Merkle construction
//! - **Ed25519** - transaction signatures, with parallel batch verification
//! - **BLS12-381** - consensus vote signatures and aggregation (min_pk)
//! - **Keccak-256** - address derivation from Ed25519 public keys only

pub mod address;
pub mod bls;
pub mod errors;
pub mod hashing;
pub mod signatures;

pub use address::{derive_address, derive_contract_address};
pub use bls::{BlsKeyPair, BlsPublicKey, BlsSignature};
pub use errors::CryptoError;
pub use hashing::{blake3_hash, pair_hash};
pub use signatures::{batch_verify, Ed25519KeyPair, Ed25519PublicKey, Ed25519Signature};
