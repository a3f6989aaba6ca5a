//! # Key-Value Store Abstraction
//!
//! The trait every backend implements, plus the [`WriteBatch`] that is the
//! only mutation path. Batch scopes are explicit: building one and dropping
//! it without committing is a bug, and the drop logs a warning loud enough
//! to show up in any triage.

use crate::StorageError;
use std::fmt;
use tracing::warn;

/// Logical column families. Every key lives in exactly one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    State,
    TrieNodes,
    Blocks,
    Receipts,
    Metadata,
    BlockIndex,
}

impl ColumnFamily {
    /// All families, in on-disk declaration order.
    pub const ALL: [ColumnFamily; 6] = [
        ColumnFamily::State,
        ColumnFamily::TrieNodes,
        ColumnFamily::Blocks,
        ColumnFamily::Receipts,
        ColumnFamily::Metadata,
        ColumnFamily::BlockIndex,
    ];

    /// On-disk name of this family.
    pub fn name(&self) -> &'static str {
        match self {
            ColumnFamily::State => "state",
            ColumnFamily::TrieNodes => "trie_nodes",
            ColumnFamily::Blocks => "blocks",
            ColumnFamily::Receipts => "receipts",
            ColumnFamily::Metadata => "metadata",
            ColumnFamily::BlockIndex => "block_index",
        }
    }
}

impl fmt::Display for ColumnFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One operation inside a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOp {
    Put {
        cf: ColumnFamily,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        cf: ColumnFamily,
        key: Vec<u8>,
    },
}

/// An atomic group of writes. Built locally, committed once through
/// [`KeyValueStore::commit`]; all-or-nothing at the backend.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    consumed: bool,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, cf: ColumnFamily, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete {
            cf,
            key: key.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Consume the batch for commit. Only backends call this.
    pub fn into_ops(mut self) -> Vec<BatchOp> {
        self.consumed = true;
        std::mem::take(&mut self.ops)
    }
}

impl Drop for WriteBatch {
    fn drop(&mut self) {
        if !self.consumed && !self.ops.is_empty() {
            warn!(
                ops = self.ops.len(),
                "write batch dropped without commit; mutations were discarded"
            );
        }
    }
}

/// Backend-neutral key-value store. Implementations are thread-safe; batches
/// commit atomically.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Apply a batch atomically.
    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError>;

    /// All `(key, value)` pairs in a family whose key starts with `prefix`.
    /// An empty prefix scans the whole family (used for cache restore).
    fn scan_prefix(
        &self,
        cf: ColumnFamily,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Convenience single put.
    fn put(&self, cf: ColumnFamily, key: &[u8], value: &[u8]) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(cf, key, value);
        self.commit(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_accumulates_ops() {
        let mut batch = WriteBatch::new();
        assert!(batch.is_empty());
        batch.put(ColumnFamily::State, b"k".to_vec(), b"v".to_vec());
        batch.delete(ColumnFamily::State, b"k2".to_vec());
        assert_eq!(batch.len(), 2);
        let ops = batch.into_ops();
        assert!(matches!(ops[0], BatchOp::Put { .. }));
        assert!(matches!(ops[1], BatchOp::Delete { .. }));
    }

    #[test]
    fn family_names_are_stable() {
        let names: Vec<_> = ColumnFamily::ALL.iter().map(|cf| cf.name()).collect();
        assert_eq!(
            names,
            ["state", "trie_nodes", "blocks", "receipts", "metadata", "block_index"]
        );
    }
}
