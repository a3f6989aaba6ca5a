//! # On-Disk Key Layout
//!
//! Key construction for every column family, in one place so the layout has
//! a single definition:
//!
//! - account: `0x01 ‖ address`
//! - storage slot: `0x02 ‖ address ‖ slot`
//! - header by hash: `block_hash`
//! - full block: `"raw:" ‖ block_hash`
//! - height index: `be_u64(height)` (big-endian keys sort by height)
//! - commit bitmap: `"bmp:" ‖ be_u64(height)`

use shared_types::{Address, Hash};

/// Leading byte of account keys in the `state` family.
pub const ACCOUNT_KEY_PREFIX: u8 = 0x01;
/// Leading byte of storage-slot keys in the `state` family.
pub const STORAGE_KEY_PREFIX: u8 = 0x02;

/// Metadata key holding the latest committed block hash.
pub const META_LATEST_BLOCK: &[u8] = b"latest_block";

/// `0x01 ‖ address_20B`
pub fn account_key(address: &Address) -> [u8; 21] {
    let mut key = [0u8; 21];
    key[0] = ACCOUNT_KEY_PREFIX;
    key[1..].copy_from_slice(address.as_bytes());
    key
}

/// `0x02 ‖ address_20B ‖ slot_32B`
pub fn storage_key(address: &Address, slot: &Hash) -> [u8; 53] {
    let mut key = [0u8; 53];
    key[0] = STORAGE_KEY_PREFIX;
    key[1..21].copy_from_slice(address.as_bytes());
    key[21..].copy_from_slice(slot.as_bytes());
    key
}

/// `"raw:" ‖ block_hash_32B`
pub fn block_raw_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(b"raw:");
    key.extend_from_slice(hash.as_bytes());
    key
}

/// `be_u64(height)`
pub fn block_index_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

/// `"bmp:" ‖ be_u64(height)`
pub fn bitmap_key(height: u64) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(b"bmp:");
    key[4..].copy_from_slice(&height.to_be_bytes());
    key
}
