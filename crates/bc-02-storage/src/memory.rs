//! # In-Memory Store
//!
//! BTreeMap-backed store for tests and nodes configured without a data
//! directory. Matches RocksDB semantics: atomic batches, prefix scans in
//! key order.

use crate::kv::{BatchOp, ColumnFamily, KeyValueStore, WriteBatch};
use crate::StorageError;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// Ephemeral store; contents vanish on drop.
#[derive(Default)]
pub struct MemoryStore {
    families: RwLock<HashMap<ColumnFamily, BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, cf: ColumnFamily, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self
            .families
            .read()
            .get(&cf)
            .and_then(|map| map.get(key).cloned()))
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut families = self.families.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    families.entry(cf).or_default().insert(key, value);
                }
                BatchOp::Delete { cf, key } => {
                    families.entry(cf).or_default().remove(&key);
                }
            }
        }
        Ok(())
    }

    fn scan_prefix(
        &self,
        cf: ColumnFamily,
        prefix: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let families = self.families.read();
        let Some(map) = families.get(&cf) else {
            return Ok(Vec::new());
        };
        Ok(map
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_commit_and_get() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::State, b"a".to_vec(), b"1".to_vec());
        batch.put(ColumnFamily::Blocks, b"a".to_vec(), b"2".to_vec());
        store.commit(batch).unwrap();

        assert_eq!(
            store.get(ColumnFamily::State, b"a").unwrap(),
            Some(b"1".to_vec())
        );
        // Families are isolated.
        assert_eq!(
            store.get(ColumnFamily::Blocks, b"a").unwrap(),
            Some(b"2".to_vec())
        );
        assert_eq!(store.get(ColumnFamily::Receipts, b"a").unwrap(), None);
    }

    #[test]
    fn delete_in_same_batch_wins() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::State, b"k".to_vec(), b"v".to_vec());
        batch.delete(ColumnFamily::State, b"k".to_vec());
        store.commit(batch).unwrap();
        assert_eq!(store.get(ColumnFamily::State, b"k").unwrap(), None);
    }

    #[test]
    fn prefix_scan_is_bounded() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::State, vec![1, 1], b"a".to_vec());
        batch.put(ColumnFamily::State, vec![1, 2], b"b".to_vec());
        batch.put(ColumnFamily::State, vec![2, 1], b"c".to_vec());
        store.commit(batch).unwrap();

        let hits = store.scan_prefix(ColumnFamily::State, &[1]).unwrap();
        assert_eq!(hits.len(), 2);
        let all = store.scan_prefix(ColumnFamily::State, &[]).unwrap();
        assert_eq!(all.len(), 3);
    }
}
