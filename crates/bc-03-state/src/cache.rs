//! # Flat State Cache
//!
//! In-memory materialization of the full world state: `address → Account`
//! plus `(address, slot) → bytes`. The executor reads and writes only this
//! cache; the trie sees the result at commit time.
//!
//! Mutations are journaled so a transaction can snapshot on entry and roll
//! back on revert in O(changes), not O(state). Deletions are tombstones
//! until the flush turns them into batch deletes.

use shared_types::{Account, Address, Hash};
use std::collections::{HashMap, HashSet};

/// Journal position; rolling back to it undoes everything after.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Snapshot(usize);

enum JournalEntry {
    /// Previous cache cell for an account. Outer `None`: key was absent.
    Account {
        address: Address,
        prev: Option<Option<Account>>,
    },
    /// Previous cache cell for a storage slot.
    Storage {
        address: Address,
        slot: Hash,
        prev: Option<Option<Vec<u8>>>,
    },
}

/// The flat cache. `None` cells are tombstones awaiting flush.
#[derive(Default)]
pub struct FlatState {
    accounts: HashMap<Address, Option<Account>>,
    storage: HashMap<Address, HashMap<Hash, Option<Vec<u8>>>>,
    journal: Vec<JournalEntry>,
    dirty_accounts: HashSet<Address>,
    dirty_slots: HashSet<(Address, Hash)>,
}

impl FlatState {
    pub fn new() -> Self {
        Self::default()
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn account(&self, address: &Address) -> Option<Account> {
        self.accounts.get(address).and_then(Clone::clone)
    }

    pub fn storage(&self, address: &Address, slot: &Hash) -> Option<Vec<u8>> {
        self.storage
            .get(address)
            .and_then(|slots| slots.get(slot))
            .and_then(Clone::clone)
    }

    /// Live (non-tombstoned) slots of one account.
    pub fn live_slots(&self, address: &Address) -> Vec<(Hash, Vec<u8>)> {
        self.storage
            .get(address)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|(k, v)| v.as_ref().map(|v| (*k, v.clone())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Addresses of live accounts.
    pub fn live_accounts(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.accounts
            .iter()
            .filter_map(|(addr, cell)| cell.as_ref().map(|acc| (addr, acc)))
    }

    // =========================================================================
    // WRITES (journaled)
    // =========================================================================

    pub fn set_account(&mut self, address: Address, account: Account) {
        let prev = self.accounts.insert(address, Some(account));
        self.journal.push(JournalEntry::Account { address, prev });
        self.dirty_accounts.insert(address);
    }

    /// Tombstone an account; the flush deletes its row.
    pub fn remove_account(&mut self, address: Address) {
        let prev = self.accounts.insert(address, None);
        self.journal.push(JournalEntry::Account { address, prev });
        self.dirty_accounts.insert(address);
    }

    pub fn set_storage(&mut self, address: Address, slot: Hash, value: Vec<u8>) {
        let prev = self
            .storage
            .entry(address)
            .or_default()
            .insert(slot, Some(value));
        self.journal.push(JournalEntry::Storage { address, slot, prev });
        self.dirty_slots.insert((address, slot));
    }

    pub fn remove_storage(&mut self, address: Address, slot: Hash) {
        let prev = self.storage.entry(address).or_default().insert(slot, None);
        self.journal.push(JournalEntry::Storage { address, slot, prev });
        self.dirty_slots.insert((address, slot));
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Mark the current journal position.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot(self.journal.len())
    }

    /// Undo every mutation after `snapshot`, newest first.
    pub fn rollback(&mut self, snapshot: Snapshot) {
        while self.journal.len() > snapshot.0 {
            let Some(entry) = self.journal.pop() else {
                break;
            };
            match entry {
                JournalEntry::Account { address, prev } => match prev {
                    Some(cell) => {
                        self.accounts.insert(address, cell);
                    }
                    None => {
                        self.accounts.remove(&address);
                    }
                },
                JournalEntry::Storage { address, slot, prev } => {
                    let slots = self.storage.entry(address).or_default();
                    match prev {
                        Some(cell) => {
                            slots.insert(slot, cell);
                        }
                        None => {
                            slots.remove(&slot);
                        }
                    }
                }
            }
        }
    }

    // =========================================================================
    // RESTORE AND FLUSH BOOKKEEPING
    // =========================================================================

    /// Insert during restore: no journal, no dirty marking.
    pub fn seed_account(&mut self, address: Address, account: Account) {
        self.accounts.insert(address, Some(account));
    }

    /// Insert during restore: no journal, no dirty marking.
    pub fn seed_storage(&mut self, address: Address, slot: Hash, value: Vec<u8>) {
        self.storage.entry(address).or_default().insert(slot, Some(value));
    }

    /// Accounts touched since the last flush.
    pub fn dirty_accounts(&self) -> Vec<Address> {
        self.dirty_accounts.iter().copied().collect()
    }

    /// Slots touched since the last flush.
    pub fn dirty_slots(&self) -> Vec<(Address, Hash)> {
        self.dirty_slots.iter().copied().collect()
    }

    /// Accounts with at least one touched slot.
    pub fn dirty_storage_accounts(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .dirty_slots
            .iter()
            .map(|(addr, _)| *addr)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        out.sort();
        out
    }

    /// Current cache cell, tombstone included, for the flush.
    pub fn account_cell(&self, address: &Address) -> Option<&Option<Account>> {
        self.accounts.get(address)
    }

    /// Current slot cell, tombstone included, for the flush.
    pub fn storage_cell(&self, address: &Address, slot: &Hash) -> Option<&Option<Vec<u8>>> {
        self.storage.get(address).and_then(|slots| slots.get(slot))
    }

    /// Forget dirty tracking and the journal after a successful flush. Also
    /// drops tombstoned cells: the batch deletes are on their way down.
    pub fn mark_flushed(&mut self) {
        for address in std::mem::take(&mut self.dirty_accounts) {
            if matches!(self.accounts.get(&address), Some(None)) {
                self.accounts.remove(&address);
            }
        }
        for (address, slot) in std::mem::take(&mut self.dirty_slots) {
            if let Some(slots) = self.storage.get_mut(&address) {
                if matches!(slots.get(&slot), Some(None)) {
                    slots.remove(&slot);
                }
            }
        }
        self.journal.clear();
    }
}
