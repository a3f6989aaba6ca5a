//! # RocksDB Storage Adapter
//!
//! Production backend behind [`KeyValueStore`].
//!
//! ## Configuration
//!
//! Tuned for blockchain workloads:
//! - Snappy compression
//! - Bloom filters (10 bits per key)
//! - LRU block cache (256MB default)
//! - One RocksDB column family per logical [`ColumnFamily`]

use crate::kv::{BatchOp, ColumnFamily, KeyValueStore, WriteBatch};
use crate::StorageError;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteOptions, DB};
use std::path::Path;

/// RocksDB tuning knobs.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    /// Block cache size in bytes.
    pub block_cache_size: usize,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
    /// Maximum number of write buffers.
    pub max_write_buffer_number: i32,
    /// fsync after each commit.
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Smaller buffers, no fsync. For tests.
    pub fn for_testing() -> Self {
        Self {
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

/// RocksDB-backed store.
pub struct RocksDbStore {
    db: DB,
    config: RocksDbConfig,
}

impl RocksDbStore {
    /// Open or create the database at `path` with all column families.
    pub fn open(path: impl AsRef<Path>, config: RocksDbConfig) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ColumnFamily::ALL
            .iter()
            .map(|cf| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(cf.name(), cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(Self { db, config })
    }

    fn handle(&self, cf: ColumnFamily) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(cf.name())
            .ok_or_else(|| StorageError::Backend(format!("missing column family {cf}")))
    }
}

impl KeyValueStore for RocksDbStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        let handle = self.handle(cf)?;
        self.db
            .get_cf(handle, key)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut inner = rocksdb::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    inner.put_cf(self.handle(cf)?, key, value);
                }
                BatchOp::Delete { cf, key } => {
                    inner.delete_cf(self.handle(cf)?, key);
                }
            }
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db
            .write_opt(inner, &write_opts)
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    fn scan_prefix(
        &self,
        cf: ColumnFamily,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let handle = self.handle(cf)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix, Direction::Forward)
        };
        let mut out = Vec::new();
        for item in self.db.iterator_cf(handle, mode) {
            let (key, value) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }
}
