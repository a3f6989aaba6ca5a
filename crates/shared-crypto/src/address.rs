//! # Address Derivation
//!
//! Keccak-256 is used here and nowhere else: a 20-byte account address is
//! the last 20 bytes of `Keccak256(ed25519_pubkey)`. The preimage is the
//! key's big-endian byte encoding.

use sha3::{Digest, Keccak256};
use shared_types::{Address, Ed25519Pub};

/// Derive the account address for an Ed25519 public key.
pub fn derive_address(pubkey: &Ed25519Pub) -> Address {
    let digest = Keccak256::digest(pubkey.as_bytes());
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Address::from_bytes(addr)
}

/// Derive a contract address from its creator and the creating nonce.
/// Preimage fields are big-endian.
pub fn derive_contract_address(sender: &Address, nonce: u64) -> Address {
    let mut preimage = [0u8; 28];
    preimage[..20].copy_from_slice(sender.as_bytes());
    preimage[20..].copy_from_slice(&nonce.to_be_bytes());
    let digest = Keccak256::digest(preimage);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..]);
    Address::from_bytes(addr)
}
