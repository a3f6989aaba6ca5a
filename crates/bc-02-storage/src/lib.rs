//! # Block Storage Subsystem
//!
//! Persistence for the node: a key-value store partitioned into six logical
//! column families, written exclusively through atomic [`WriteBatch`]es.
//!
//! ## Column Families
//!
//! - `state` - flat cache snapshot (accounts and storage slots)
//! - `trie_nodes` - hash → encoded trie node
//! - `blocks` - header by hash, full block under a `raw:` prefix
//! - `receipts` - tx hash → receipt
//! - `metadata` - latest-block pointer, commit bitmaps, misc. scalars
//! - `block_index` - big-endian height → block hash
//!
//! ## Backends
//!
//! [`MemoryStore`] for tests and ephemeral nodes, [`RocksDbStore`] for
//! production (snappy compression, bloom filters, column-family isolation).

pub mod errors;
pub mod keys;
pub mod kv;
pub mod memory;
#[cfg(feature = "rocks")]
pub mod rocks;
pub mod stores;

pub use errors::StorageError;
pub use kv::{BatchOp, ColumnFamily, KeyValueStore, WriteBatch};
pub use memory::MemoryStore;
#[cfg(feature = "rocks")]
pub use rocks::{RocksDbConfig, RocksDbStore};
pub use stores::{BlockStore, MetadataStore, ReceiptStore};
