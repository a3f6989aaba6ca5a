//! # Validator Set
//!
//! The active set of one epoch: at most 64 entries, each pinned to a bitmap
//! index. Fixed for the epoch; changes land at the next boundary.

use shared_types::{Address, BlsPub, ValidatorEntry, U256};
use std::collections::HashMap;

/// Epoch-fixed validator set with index and address lookups.
#[derive(Clone, Debug, Default)]
pub struct ValidatorSet {
    entries: Vec<ValidatorEntry>,
    by_address: HashMap<Address, usize>,
    by_bls: HashMap<BlsPub, usize>,
    total_stake: U256,
}

impl ValidatorSet {
    pub fn new(entries: Vec<ValidatorEntry>) -> Self {
        let by_address = entries
            .iter()
            .enumerate()
            .map(|(i, v)| (v.address, i))
            .collect();
        let by_bls = entries
            .iter()
            .enumerate()
            .map(|(i, v)| (v.bls_pubkey, i))
            .collect();
        let total_stake = entries
            .iter()
            .filter(|v| v.active)
            .fold(U256::zero(), |acc, v| acc.saturating_add(v.stake));
        Self {
            entries,
            by_address,
            by_bls,
            total_stake,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Active members only.
    pub fn active(&self) -> impl Iterator<Item = &ValidatorEntry> {
        self.entries.iter().filter(|v| v.active)
    }

    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    pub fn total_stake(&self) -> U256 {
        self.total_stake
    }

    pub fn entries(&self) -> &[ValidatorEntry] {
        &self.entries
    }

    pub fn by_index(&self, index: u8) -> Option<&ValidatorEntry> {
        self.entries.iter().find(|v| v.index == index)
    }

    pub fn by_address(&self, address: &Address) -> Option<&ValidatorEntry> {
        self.by_address.get(address).map(|&i| &self.entries[i])
    }

    pub fn by_bls_key(&self, key: &BlsPub) -> Option<&ValidatorEntry> {
        self.by_bls.get(key).map(|&i| &self.entries[i])
    }

    /// Quorum threshold `⌈2N/3⌉ + 1` over the active count, capped at N so
    /// a single-validator devnet can finalize alone.
    pub fn quorum(&self) -> usize {
        let n = self.active_count();
        ((2 * n).div_ceil(3) + 1).min(n.max(1))
    }

    /// Record a commit bitmap into the per-epoch signing counters.
    pub fn record_signed(&mut self, bitmap: u64) {
        for entry in &mut self.entries {
            if entry.index < 64 && bitmap & (1u64 << entry.index) != 0 {
                entry.signed_blocks_in_epoch += 1;
            }
        }
    }

    /// Reset signing counters at an epoch boundary.
    pub fn reset_epoch_counters(&mut self) {
        for entry in &mut self.entries {
            entry.signed_blocks_in_epoch = 0;
        }
    }

    /// Deactivate a member (slashing); stake bookkeeping happens in the
    /// staking contract storage.
    pub fn deactivate(&mut self, address: &Address) {
        if let Some(&i) = self.by_address.get(address) {
            if self.entries[i].active {
                self.entries[i].active = false;
                self.total_stake = self.total_stake.saturating_sub(self.entries[i].stake);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use shared_crypto::BlsKeyPair;
    use shared_types::Ed25519Pub;

    pub(crate) fn test_set(n: usize) -> (ValidatorSet, Vec<BlsKeyPair>) {
        let keypairs: Vec<BlsKeyPair> = (0..n as u64).map(BlsKeyPair::from_seed).collect();
        let entries = keypairs
            .iter()
            .enumerate()
            .map(|(i, kp)| ValidatorEntry {
                address: Address::from_bytes([i as u8 + 1; 20]),
                ed25519_pubkey: Ed25519Pub::zero(),
                bls_pubkey: kp.public_key().to_value(),
                stake: U256::from(1_000_000u64),
                index: i as u8,
                active: true,
                signed_blocks_in_epoch: 0,
            })
            .collect();
        (ValidatorSet::new(entries), keypairs)
    }

    #[test]
    fn quorum_formula() {
        // ⌈2N/3⌉+1, capped at N.
        assert_eq!(test_set(1).0.quorum(), 1);
        assert_eq!(test_set(2).0.quorum(), 2);
        assert_eq!(test_set(3).0.quorum(), 3);
        assert_eq!(test_set(4).0.quorum(), 4);
        assert_eq!(test_set(6).0.quorum(), 5);
        assert_eq!(test_set(7).0.quorum(), 6);
        assert_eq!(test_set(64).0.quorum(), 44);
    }

    #[test]
    fn record_signed_follows_bitmap() {
        let (mut set, _) = test_set(4);
        set.record_signed(0b1011);
        let signed: Vec<u32> = set
            .entries()
            .iter()
            .map(|v| v.signed_blocks_in_epoch)
            .collect();
        assert_eq!(signed, vec![1, 1, 0, 1]);
        set.reset_epoch_counters();
        assert!(set.entries().iter().all(|v| v.signed_blocks_in_epoch == 0));
    }

    #[test]
    fn deactivate_removes_stake() {
        let (mut set, _) = test_set(3);
        let total = set.total_stake();
        let victim = set.entries()[1].address;
        set.deactivate(&victim);
        assert_eq!(set.active_count(), 2);
        assert!(set.total_stake() < total);
        // Idempotent.
        set.deactivate(&victim);
        assert_eq!(set.active_count(), 2);
    }
}
