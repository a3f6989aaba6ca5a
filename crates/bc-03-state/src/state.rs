//! # State Manager
//!
//! Owns the flat cache and the trie, and is the only component that writes
//! the `state` and `trie_nodes` column families. The executor mutates the
//! cache through this type; on block commit everything flushes into the
//! caller's write batch and the new world root comes back.
//!
//! The world trie maps `BLAKE3(address)` to the account's 137-byte encoding;
//! each account's storage trie maps `BLAKE3(slot)` to the raw slot bytes,
//! and its root is embedded in the account encoding. Both tries share the
//! `trie_nodes` family.

use crate::cache::{FlatState, Snapshot};
use crate::errors::StateError;
use crate::node::TrieNode;
use crate::trie::Trie;
use bc_02_storage::{keys, ColumnFamily, KeyValueStore, WriteBatch};
use shared_types::{Account, Address, Decodable, Encodable, Hash, EMPTY_TRIE_ROOT};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// World-state facade over the flat cache and the trie.
pub struct StateManager {
    store: Arc<dyn KeyValueStore>,
    cache: FlatState,
    /// World trie as of the last commit, kept for proof generation.
    world: Trie,
    /// Trie node ids already written to disk; staging skips them.
    persisted_nodes: HashSet<Hash>,
    committed_root: Hash,
}

impl StateManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            cache: FlatState::new(),
            world: Trie::new(),
            persisted_nodes: HashSet::new(),
            committed_root: EMPTY_TRIE_ROOT,
        }
    }

    /// Root as of the last commit.
    pub fn committed_root(&self) -> Hash {
        self.committed_root
    }

    // =========================================================================
    // CACHE ACCESS (executor hot path)
    // =========================================================================

    pub fn account(&self, address: &Address) -> Option<Account> {
        self.cache.account(address)
    }

    pub fn set_account(&mut self, address: Address, account: Account) {
        self.cache.set_account(address, account);
    }

    pub fn remove_account(&mut self, address: Address) {
        self.cache.remove_account(address);
    }

    pub fn storage(&self, address: &Address, slot: &Hash) -> Option<Vec<u8>> {
        self.cache.storage(address, slot)
    }

    pub fn set_storage(&mut self, address: Address, slot: Hash, value: Vec<u8>) {
        self.cache.set_storage(address, slot, value);
    }

    pub fn remove_storage(&mut self, address: Address, slot: Hash) {
        self.cache.remove_storage(address, slot);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.cache.snapshot()
    }

    pub fn rollback(&mut self, snapshot: Snapshot) {
        self.cache.rollback(snapshot);
    }

    // =========================================================================
    // ROOTS
    // =========================================================================

    /// World root implied by the current cache contents, without flushing.
    /// Used for per-transaction receipt roots and proposal pre-validation.
    pub fn compute_root(&self) -> Hash {
        let (mut world, _) = self.build_tries();
        world.root_hash()
    }

    /// Flush the cache into `batch` (flat rows plus new trie nodes) and
    /// return the new committed root. The caller commits the batch; commit
    /// semantics are all-or-nothing at the store.
    pub fn commit(&mut self, batch: &mut WriteBatch) -> Result<Hash, StateError> {
        let (mut world, storage_tries) = self.build_tries();
        let root = world.root_hash();

        // Trie nodes: storage tries first, then the world trie.
        for (_, mut trie) in storage_tries {
            let _ = trie.root_hash();
            for (hash, node) in trie.nodes() {
                if self.persisted_nodes.insert(*hash) {
                    batch.put(ColumnFamily::TrieNodes, hash.as_bytes().to_vec(), node.encode());
                }
            }
        }
        for (hash, node) in world.nodes() {
            if self.persisted_nodes.insert(*hash) {
                batch.put(ColumnFamily::TrieNodes, hash.as_bytes().to_vec(), node.encode());
            }
        }

        // Flat rows. Accounts whose storage changed re-encode with the new
        // storage root even when untouched themselves.
        let mut touched: Vec<Address> = self.cache.dirty_accounts();
        touched.extend(self.cache.dirty_storage_accounts());
        touched.sort();
        touched.dedup();

        for address in touched {
            match self.cache.account_cell(&address).cloned() {
                Some(Some(mut account)) => {
                    account.storage_root = storage_root_of(&self.cache, &address);
                    batch.put(
                        ColumnFamily::State,
                        keys::account_key(&address).to_vec(),
                        account.encode(),
                    );
                    self.cache.seed_account(address, account);
                }
                Some(None) => {
                    batch.delete(ColumnFamily::State, keys::account_key(&address).to_vec());
                }
                // Slots changed under an address with no account row; the
                // executor only writes storage through existing contracts,
                // so nothing to re-encode.
                None => {}
            }
        }

        for (address, slot) in self.cache.dirty_slots() {
            match self.cache.storage_cell(&address, &slot) {
                Some(Some(value)) => {
                    batch.put(
                        ColumnFamily::State,
                        keys::storage_key(&address, &slot).to_vec(),
                        value.clone(),
                    );
                }
                _ => {
                    batch.delete(ColumnFamily::State, keys::storage_key(&address, &slot).to_vec());
                }
            }
        }

        self.cache.mark_flushed();
        self.world = world;
        self.committed_root = root;
        Ok(root)
    }

    // =========================================================================
    // RESTORE
    // =========================================================================

    /// Rebuild the flat cache from the `state` column family (full restore)
    /// and recompute the committed root from it.
    pub fn restore(&mut self) -> Result<(), StateError> {
        let rows = self.store.scan_prefix(ColumnFamily::State, &[])?;
        let mut accounts = 0usize;
        let mut slots = 0usize;
        for (key, value) in rows {
            match (key.first(), key.len()) {
                (Some(&keys::ACCOUNT_KEY_PREFIX), 21) => {
                    let address = Address::from_slice(&key[1..])
                        .ok_or(StateError::MalformedStateKey(key.len()))?;
                    let account = Account::decode(&value).map_err(|source| StateError::Decode {
                        context: "state/account",
                        source,
                    })?;
                    self.cache.seed_account(address, account);
                    accounts += 1;
                }
                (Some(&keys::STORAGE_KEY_PREFIX), 53) => {
                    let address = Address::from_slice(&key[1..21])
                        .ok_or(StateError::MalformedStateKey(key.len()))?;
                    let slot = Hash::from_slice(&key[21..])
                        .ok_or(StateError::MalformedStateKey(key.len()))?;
                    self.cache.seed_storage(address, slot, value);
                    slots += 1;
                }
                _ => return Err(StateError::MalformedStateKey(key.len())),
            }
        }
        let (mut world, _) = self.build_tries();
        self.committed_root = world.root_hash();
        self.world = world;
        debug!(accounts, slots, root = %self.committed_root, "flat cache restored");
        Ok(())
    }

    /// Compare the restored root against the one a block header claims.
    pub fn verify_root(&self, expected: &Hash) -> Result<(), StateError> {
        if self.committed_root != *expected {
            return Err(StateError::RootMismatch {
                expected: *expected,
                actual: self.committed_root,
            });
        }
        Ok(())
    }

    // =========================================================================
    // PROOFS
    // =========================================================================

    /// Inclusion/exclusion proof for an account against the committed root.
    pub fn prove_account(&mut self, address: &Address) -> Result<Vec<Vec<u8>>, StateError> {
        self.world.prove(&world_key(address))
    }

    /// Fetch a trie node by identity: committed version first, then disk.
    pub fn trie_node(&mut self, hash: &Hash) -> Result<TrieNode, StateError> {
        if let Some(node) = self.world.nodes().get(hash) {
            return Ok(node.clone());
        }
        match self.store.get(ColumnFamily::TrieNodes, hash.as_bytes())? {
            Some(bytes) => TrieNode::decode(&bytes).map_err(|source| StateError::Decode {
                context: "trie_nodes",
                source,
            }),
            None => Err(StateError::MissingTrieNode(*hash)),
        }
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    /// Construct the world trie (and per-account storage tries) from the
    /// cache alone. Deterministic in the cache contents.
    fn build_tries(&self) -> (Trie, Vec<(Address, Trie)>) {
        let mut world = Trie::new();
        let mut storage_tries = Vec::new();
        for (address, account) in self.cache.live_accounts() {
            let slots = self.cache.live_slots(address);
            let storage_root = if slots.is_empty() {
                EMPTY_TRIE_ROOT
            } else {
                let mut trie = Trie::new();
                for (slot, value) in slots {
                    trie.put(Hash::digest(slot.as_bytes()), value);
                }
                let root = trie.root_hash();
                storage_tries.push((*address, trie));
                root
            };
            let mut entry = account.clone();
            entry.storage_root = storage_root;
            world.put(world_key(address), entry.encode());
        }
        (world, storage_tries)
    }
}

/// World-trie key for an address.
fn world_key(address: &Address) -> Hash {
    Hash::digest(address.as_bytes())
}

fn storage_root_of(cache: &FlatState, address: &Address) -> Hash {
    let slots = cache.live_slots(address);
    if slots.is_empty() {
        return EMPTY_TRIE_ROOT;
    }
    let mut trie = Trie::new();
    for (slot, value) in slots {
        trie.put(Hash::digest(slot.as_bytes()), value);
    }
    trie.root_hash()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::verify_proof;
    use bc_02_storage::MemoryStore;
    use shared_types::U256;

    fn addr(i: u8) -> Address {
        Address::from_bytes([i; 20])
    }

    fn manager() -> (Arc<dyn KeyValueStore>, StateManager) {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        (store.clone(), StateManager::new(store))
    }

    #[test]
    fn commit_then_restore_reproduces_root() {
        let (store, mut state) = manager();
        state.set_account(addr(1), Account::new_eoa(U256::from(100u64)));
        state.set_account(addr(2), Account::new_eoa(U256::from(200u64)));
        state.set_storage(addr(2), Hash::digest(b"slot"), vec![7, 7]);

        let mut batch = WriteBatch::new();
        let root = state.commit(&mut batch).unwrap();
        store.commit(batch).unwrap();
        assert_ne!(root, EMPTY_TRIE_ROOT);

        let mut fresh = StateManager::new(store);
        fresh.restore().unwrap();
        assert_eq!(fresh.committed_root(), root);
        fresh.verify_root(&root).unwrap();
        assert_eq!(
            fresh.account(&addr(1)).unwrap().balance,
            U256::from(100u64)
        );
        assert_eq!(fresh.storage(&addr(2), &Hash::digest(b"slot")), Some(vec![7, 7]));
    }

    #[test]
    fn verify_root_rejects_wrong_root() {
        let (_, mut state) = manager();
        state.set_account(addr(1), Account::default());
        let mut batch = WriteBatch::new();
        state.commit(&mut batch).unwrap();
        bc_02_storage::KeyValueStore::commit(&MemoryStore::new(), batch).unwrap();

        let bogus = Hash::digest(b"bogus");
        assert!(matches!(
            state.verify_root(&bogus),
            Err(StateError::RootMismatch { .. })
        ));
    }

    #[test]
    fn storage_changes_move_the_world_root() {
        let (store, mut state) = manager();
        state.set_account(addr(1), Account::new_contract(Hash::digest(b"code")));
        let mut batch = WriteBatch::new();
        let root_without = state.commit(&mut batch).unwrap();
        store.commit(batch).unwrap();

        state.set_storage(addr(1), Hash::digest(b"k"), vec![1]);
        let mut batch = WriteBatch::new();
        let root_with = state.commit(&mut batch).unwrap();
        store.commit(batch).unwrap();
        assert_ne!(root_without, root_with);

        // The account row now carries a non-empty storage root.
        let restored = StateManager::new(store.clone());
        let mut restored = restored;
        restored.restore().unwrap();
        assert_ne!(
            restored.account(&addr(1)).unwrap().storage_root,
            EMPTY_TRIE_ROOT
        );
    }

    #[test]
    fn compute_root_tracks_uncommitted_writes_and_rollback() {
        let (_, mut state) = manager();
        state.set_account(addr(1), Account::new_eoa(U256::from(1u64)));
        let before = state.compute_root();

        let snap = state.snapshot();
        state.set_account(addr(1), Account::new_eoa(U256::from(2u64)));
        assert_ne!(state.compute_root(), before);

        state.rollback(snap);
        assert_eq!(state.compute_root(), before);
    }

    #[test]
    fn account_proof_against_committed_root() {
        let (store, mut state) = manager();
        state.set_account(addr(1), Account::new_eoa(U256::from(100u64)));
        state.set_account(addr(9), Account::new_eoa(U256::from(900u64)));
        let mut batch = WriteBatch::new();
        let root = state.commit(&mut batch).unwrap();
        store.commit(batch).unwrap();

        let expected = state.account(&addr(1)).unwrap().encode();
        let proof = state.prove_account(&addr(1)).unwrap();
        assert!(verify_proof(
            &root,
            &world_key(&addr(1)),
            Some(&expected),
            &proof
        ));

        let missing = addr(42);
        let proof = state.prove_account(&missing).unwrap();
        assert!(verify_proof(&root, &world_key(&missing), None, &proof));
    }

    #[test]
    fn trie_node_lookup_and_missing_error() {
        let (store, mut state) = manager();
        state.set_account(addr(1), Account::default());
        let mut batch = WriteBatch::new();
        let root = state.commit(&mut batch).unwrap();
        store.commit(batch).unwrap();

        // Root node resolvable from memory and from disk.
        let node = state.trie_node(&root).unwrap();
        assert_eq!(node.hash(), root);

        let absent = Hash::digest(b"absent");
        assert!(matches!(
            state.trie_node(&absent),
            Err(StateError::MissingTrieNode(_))
        ));
    }
}
