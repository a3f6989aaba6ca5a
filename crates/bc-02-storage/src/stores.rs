//! # Typed Stores
//!
//! Thin typed facades over the key-value store: blocks (dual-indexed by hash
//! and height), receipts, and chain metadata. Writers stage into a caller's
//! [`WriteBatch`] so a block, its receipts, and the latest pointer land in
//! one atomic commit.

use crate::keys;
use crate::kv::{ColumnFamily, KeyValueStore, WriteBatch};
use crate::StorageError;
use shared_types::{Block, BlockHeader, Decodable, Encodable, Hash, Receipt};
use std::sync::Arc;

/// Block persistence: header by hash, full block under `raw:`, height index,
/// and the commit bitmap.
#[derive(Clone)]
pub struct BlockStore {
    store: Arc<dyn KeyValueStore>,
}

impl BlockStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Stage a block and its indices into `batch`.
    pub fn stage_block(&self, batch: &mut WriteBatch, block: &Block) {
        let hash = block.hash();
        batch.put(
            ColumnFamily::Blocks,
            hash.as_bytes().to_vec(),
            block.header.encode(),
        );
        batch.put(ColumnFamily::Blocks, keys::block_raw_key(&hash), block.encode());
        batch.put(
            ColumnFamily::BlockIndex,
            keys::block_index_key(block.header.number).to_vec(),
            hash.as_bytes().to_vec(),
        );
        if let Some(cert) = &block.certificate {
            batch.put(
                ColumnFamily::Metadata,
                keys::bitmap_key(block.header.number).to_vec(),
                cert.bitmap.to_be_bytes().to_vec(),
            );
        }
    }

    pub fn header(&self, hash: &Hash) -> Result<Option<BlockHeader>, StorageError> {
        match self.store.get(ColumnFamily::Blocks, hash.as_bytes())? {
            None => Ok(None),
            Some(bytes) => BlockHeader::decode(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupted {
                    context: "blocks/header",
                    detail: e.to_string(),
                }),
        }
    }

    pub fn block(&self, hash: &Hash) -> Result<Option<Block>, StorageError> {
        match self.store.get(ColumnFamily::Blocks, &keys::block_raw_key(hash))? {
            None => Ok(None),
            Some(bytes) => Block::decode(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupted {
                    context: "blocks/raw",
                    detail: e.to_string(),
                }),
        }
    }

    pub fn hash_by_height(&self, height: u64) -> Result<Option<Hash>, StorageError> {
        match self
            .store
            .get(ColumnFamily::BlockIndex, &keys::block_index_key(height))?
        {
            None => Ok(None),
            Some(bytes) => Hash::from_slice(&bytes).map(Some).ok_or(StorageError::Corrupted {
                context: "block_index",
                detail: format!("hash value of {} bytes", bytes.len()),
            }),
        }
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        match self.hash_by_height(height)? {
            None => Ok(None),
            Some(hash) => self.block(&hash),
        }
    }

    /// Commit bitmap recorded for a height, if the block finalized.
    pub fn bitmap(&self, height: u64) -> Result<Option<u64>, StorageError> {
        match self.store.get(ColumnFamily::Metadata, &keys::bitmap_key(height))? {
            None => Ok(None),
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StorageError::Corrupted {
                    context: "metadata/bitmap",
                    detail: format!("bitmap value of {} bytes", bytes.len()),
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
        }
    }
}

/// Receipt persistence by transaction hash.
#[derive(Clone)]
pub struct ReceiptStore {
    store: Arc<dyn KeyValueStore>,
}

impl ReceiptStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn stage_receipts(&self, batch: &mut WriteBatch, receipts: &[Receipt]) {
        for receipt in receipts {
            batch.put(
                ColumnFamily::Receipts,
                receipt.tx_hash.as_bytes().to_vec(),
                receipt.encode(),
            );
        }
    }

    pub fn receipt(&self, tx_hash: &Hash) -> Result<Option<Receipt>, StorageError> {
        match self.store.get(ColumnFamily::Receipts, tx_hash.as_bytes())? {
            None => Ok(None),
            Some(bytes) => Receipt::decode(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupted {
                    context: "receipts",
                    detail: e.to_string(),
                }),
        }
    }
}

/// Chain metadata scalars.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn KeyValueStore>,
}

impl MetadataStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn stage_latest_block(&self, batch: &mut WriteBatch, hash: &Hash) {
        batch.put(
            ColumnFamily::Metadata,
            keys::META_LATEST_BLOCK.to_vec(),
            hash.as_bytes().to_vec(),
        );
    }

    /// Hash of the most recently committed block, if any.
    pub fn latest_block(&self) -> Result<Option<Hash>, StorageError> {
        match self.store.get(ColumnFamily::Metadata, keys::META_LATEST_BLOCK)? {
            None => Ok(None),
            Some(bytes) => Hash::from_slice(&bytes).map(Some).ok_or(StorageError::Corrupted {
                context: "metadata/latest_block",
                detail: format!("hash value of {} bytes", bytes.len()),
            }),
        }
    }
}
