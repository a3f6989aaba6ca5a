//! # BLAKE3 Hashing
//!
//! The chain's default hash. Entity identities, trie node ids, and leader
//! schedule seeds all come from here.

use shared_types::Hash;

/// Hash data with BLAKE3 (one-shot).
pub fn blake3_hash(data: &[u8]) -> Hash {
    Hash::from_bytes(*blake3::hash(data).as_bytes())
}

/// Merkle combiner: `BLAKE3(left ‖ right)`.
pub fn pair_hash(left: &Hash, right: &Hash) -> Hash {
    let mut preimage = [0u8; 64];
    preimage[..32].copy_from_slice(left.as_bytes());
    preimage[32..].copy_from_slice(right.as_bytes());
    blake3_hash(&preimage)
}

/// Hash a sequence of inputs as one stream.
pub fn blake3_hash_many(inputs: &[&[u8]]) -> Hash {
    let mut hasher = blake3::Hasher::new();
    for input in inputs {
        hasher.update(input);
    }
    Hash::from_bytes(*hasher.finalize().as_bytes())
}
