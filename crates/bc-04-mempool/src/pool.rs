//! # Transaction Pool
//!
//! Core pool data structure with three indices:
//!
//! - `by_hash`: O(1) fingerprint lookup and deduplication
//! - `by_sender`: nonce-ordered queue per account (BTreeMap keys)
//! - selection: ready heads ranked by effective tip per gas at the current
//!   base fee
//!
//! A transaction whose nonce is ahead of the sender's account nonce stays
//! queued and is simply not selectable until the gap closes.

use crate::admission::{validate, AccountView};
use crate::errors::MempoolError;
use shared_types::{Address, ChainParameters, Encodable, Hash, Transaction, U256};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Pool tuning knobs.
#[derive(Clone, Debug)]
pub struct MempoolConfig {
    /// Total transaction cap; admission evicts past this.
    pub capacity: usize,
    /// Allowed nonce look-ahead per sender.
    pub nonce_window: u64,
    /// Transactions older than this are dropped by `evict_expired`.
    pub tx_ttl: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            nonce_window: 4,
            tx_ttl: Duration::from_secs(300),
        }
    }
}

/// Admission outcome for accepted transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admitted {
    Inserted,
    /// Same hash already queued; accepted idempotently.
    Duplicate,
}

struct PoolEntry {
    tx: Transaction,
    inserted_at: Instant,
}

/// The mempool.
pub struct Mempool {
    config: MempoolConfig,
    params: ChainParameters,
    /// Fee floor for admission; tracks the chain head.
    base_fee: U256,
    by_hash: HashMap<Hash, PoolEntry>,
    by_sender: HashMap<Address, BTreeMap<u64, Hash>>,
}

impl Mempool {
    pub fn new(config: MempoolConfig, params: ChainParameters) -> Self {
        let base_fee = params.initial_base_fee;
        Self {
            config,
            params,
            base_fee,
            by_hash: HashMap::new(),
            by_sender: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.by_hash.get(hash).map(|entry| &entry.tx)
    }

    /// Track the chain head's base fee for admission and ranking.
    pub fn set_base_fee(&mut self, base_fee: U256) {
        self.base_fee = base_fee;
    }

    // =========================================================================
    // ADMISSION
    // =========================================================================

    /// Validate and queue a transaction.
    pub fn insert(
        &mut self,
        tx: Transaction,
        view: &dyn AccountView,
    ) -> Result<Admitted, MempoolError> {
        let hash = tx.hash();
        if self.by_hash.contains_key(&hash) {
            trace!(%hash, "duplicate transaction accepted idempotently");
            return Ok(Admitted::Duplicate);
        }

        validate(&tx, view, &self.params, self.base_fee, self.config.nonce_window)?;

        // Same-nonce replacement needs a strictly better tip.
        if let Some(existing_hash) = self
            .by_sender
            .get(&tx.sender)
            .and_then(|queue| queue.get(&tx.nonce))
            .copied()
        {
            let incumbent_tip = self.tip_of(&existing_hash);
            let new_tip = tx.effective_tip_per_gas(self.base_fee);
            if new_tip <= incumbent_tip {
                return Err(MempoolError::FeeBelowBase {
                    offered: new_tip,
                    required: incumbent_tip,
                });
            }
            self.remove(&existing_hash);
        }

        if self.by_hash.len() >= self.config.capacity {
            let Some((victim, victim_tip)) = self.eviction_candidate() else {
                return Err(MempoolError::MempoolFull {
                    capacity: self.config.capacity,
                });
            };
            let new_tip = tx.effective_tip_per_gas(self.base_fee);
            if new_tip <= victim_tip {
                return Err(MempoolError::MempoolFull {
                    capacity: self.config.capacity,
                });
            }
            debug!(victim = %victim, "evicting lowest-tip transaction of largest sender queue");
            self.remove(&victim);
        }

        self.by_sender
            .entry(tx.sender)
            .or_default()
            .insert(tx.nonce, hash);
        self.by_hash.insert(
            hash,
            PoolEntry {
                tx,
                inserted_at: Instant::now(),
            },
        );
        Ok(Admitted::Inserted)
    }

    // =========================================================================
    // SELECTION
    // =========================================================================

    /// Pick transactions for a candidate block: per-sender contiguous-nonce
    /// prefixes starting at the account nonce, merged across senders in
    /// descending tip order, bounded by gas, count, and encoded size.
    pub fn take_for_block(
        &self,
        view: &dyn AccountView,
        block_gas_limit: u64,
        max_txs: usize,
        max_bytes: usize,
    ) -> Vec<Transaction> {
        // Ready chain per sender: contiguous nonces from the account nonce.
        let mut chains: Vec<Vec<&Transaction>> = Vec::new();
        for (sender, queue) in &self.by_sender {
            let mut next = view.nonce_of(sender);
            let mut chain = Vec::new();
            while let Some(hash) = queue.get(&next) {
                if let Some(entry) = self.by_hash.get(hash) {
                    chain.push(&entry.tx);
                }
                next += 1;
            }
            if !chain.is_empty() {
                chains.push(chain);
            }
        }

        let mut selected = Vec::new();
        let mut cursors = vec![0usize; chains.len()];
        let mut gas_total: u64 = 0;
        let mut bytes_total: usize = 0;

        while selected.len() < max_txs {
            // Highest-tip head among the chains; ties break on hash for
            // determinism across replicas.
            let mut best: Option<(usize, U256, Hash)> = None;
            for (i, chain) in chains.iter().enumerate() {
                let Some(tx) = chain.get(cursors[i]) else {
                    continue;
                };
                let tip = tx.effective_tip_per_gas(self.base_fee);
                let hash = tx.hash();
                let better = match &best {
                    None => true,
                    Some((_, best_tip, best_hash)) => {
                        tip > *best_tip || (tip == *best_tip && hash < *best_hash)
                    }
                };
                if better {
                    best = Some((i, tip, hash));
                }
            }
            let Some((i, _, _)) = best else {
                break;
            };
            let tx = chains[i][cursors[i]];
            let encoded_len = tx.encode().len();
            if gas_total.saturating_add(tx.gas_limit) > block_gas_limit
                || bytes_total + encoded_len > max_bytes
            {
                // This sender's later nonces cannot run without this one.
                cursors[i] = chains[i].len();
                continue;
            }
            gas_total += tx.gas_limit;
            bytes_total += encoded_len;
            selected.push(tx.clone());
            cursors[i] += 1;
        }
        selected
    }

    // =========================================================================
    // MAINTENANCE
    // =========================================================================

    /// Drop committed transactions, and any queued transaction made stale by
    /// the new account nonces.
    pub fn remove_committed(&mut self, txs: &[Transaction], view: &dyn AccountView) {
        for tx in txs {
            self.remove(&tx.hash());
        }
        let stale: Vec<Hash> = self
            .by_sender
            .iter()
            .flat_map(|(sender, queue)| {
                let account_nonce = view.nonce_of(sender);
                queue
                    .range(..account_nonce)
                    .map(|(_, hash)| *hash)
                    .collect::<Vec<_>>()
            })
            .collect();
        for hash in stale {
            self.remove(&hash);
        }
    }

    /// Drop transactions older than the configured TTL.
    pub fn evict_expired(&mut self) {
        let ttl = self.config.tx_ttl;
        let expired: Vec<Hash> = self
            .by_hash
            .iter()
            .filter(|(_, entry)| entry.inserted_at.elapsed() > ttl)
            .map(|(hash, _)| *hash)
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "evicting expired transactions");
        }
        for hash in expired {
            self.remove(&hash);
        }
    }

    fn remove(&mut self, hash: &Hash) {
        if let Some(entry) = self.by_hash.remove(hash) {
            if let Some(queue) = self.by_sender.get_mut(&entry.tx.sender) {
                queue.remove(&entry.tx.nonce);
                if queue.is_empty() {
                    self.by_sender.remove(&entry.tx.sender);
                }
            }
        }
    }

    fn tip_of(&self, hash: &Hash) -> U256 {
        self.by_hash
            .get(hash)
            .map(|entry| entry.tx.effective_tip_per_gas(self.base_fee))
            .unwrap_or_default()
    }

    /// Lowest-tip transaction of the largest sender queue.
    fn eviction_candidate(&self) -> Option<(Hash, U256)> {
        let (_, queue) = self
            .by_sender
            .iter()
            .max_by_key(|(sender, queue)| (queue.len(), *sender))?;
        queue
            .values()
            .map(|hash| (*hash, self.tip_of(hash)))
            .min_by_key(|(_, tip)| *tip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::tests::{signed_tx, MapView};
    use shared_crypto::{derive_address, Ed25519KeyPair};
    use shared_types::Account;
    use std::collections::HashMap;

    fn pool() -> Mempool {
        let mut params = ChainParameters::default();
        params.initial_base_fee = U256::one();
        params.min_gas_price = U256::one();
        Mempool::new(MempoolConfig::default(), params)
    }

    fn view_for(keys: &[&Ed25519KeyPair]) -> MapView {
        let mut accounts = HashMap::new();
        for key in keys {
            let address = derive_address(&key.public_key().to_value());
            accounts.insert(address, Account::new_eoa(U256::from(10_000_000_000u64)));
        }
        MapView(accounts)
    }

    #[test]
    fn duplicate_is_idempotent() {
        let key = Ed25519KeyPair::from_seed(1);
        let view = view_for(&[&key]);
        let mut pool = pool();
        let tx = signed_tx(&key, 0, 5);
        assert_eq!(pool.insert(tx.clone(), &view).unwrap(), Admitted::Inserted);
        assert_eq!(pool.insert(tx, &view).unwrap(), Admitted::Duplicate);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn selection_ranks_by_tip() {
        let low = Ed25519KeyPair::from_seed(1);
        let high = Ed25519KeyPair::from_seed(2);
        let view = view_for(&[&low, &high]);
        let mut pool = pool();
        pool.insert(signed_tx(&low, 0, 5), &view).unwrap();
        pool.insert(signed_tx(&high, 0, 50), &view).unwrap();

        let picked = pool.take_for_block(&view, 1_000_000, 10, 1 << 20);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].sender, derive_address(&high.public_key().to_value()));
        assert_eq!(picked[1].sender, derive_address(&low.public_key().to_value()));
    }

    #[test]
    fn gapped_nonce_is_held_back() {
        let key = Ed25519KeyPair::from_seed(1);
        let view = view_for(&[&key]);
        let mut pool = pool();
        // Nonce 0 and 2 queued, 1 missing: only 0 is selectable.
        pool.insert(signed_tx(&key, 0, 5), &view).unwrap();
        pool.insert(signed_tx(&key, 2, 5), &view).unwrap();

        let picked = pool.take_for_block(&view, 1_000_000, 10, 1 << 20);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].nonce, 0);

        // Gap closes: all three go, in nonce order.
        pool.insert(signed_tx(&key, 1, 5), &view).unwrap();
        let picked = pool.take_for_block(&view, 1_000_000, 10, 1 << 20);
        assert_eq!(
            picked.iter().map(|tx| tx.nonce).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn gas_budget_bounds_selection() {
        let key = Ed25519KeyPair::from_seed(1);
        let view = view_for(&[&key]);
        let mut pool = pool();
        pool.insert(signed_tx(&key, 0, 5), &view).unwrap();
        pool.insert(signed_tx(&key, 1, 5), &view).unwrap();

        // Room for exactly one 21k transfer.
        let picked = pool.take_for_block(&view, 30_000, 10, 1 << 20);
        assert_eq!(picked.len(), 1);
    }

    #[test]
    fn capacity_evicts_lowest_tip_of_largest_queue() {
        let spammer = Ed25519KeyPair::from_seed(1);
        let other = Ed25519KeyPair::from_seed(2);
        let view = view_for(&[&spammer, &other]);
        let mut params = ChainParameters::default();
        params.initial_base_fee = U256::one();
        let mut pool = Mempool::new(
            MempoolConfig {
                capacity: 3,
                ..MempoolConfig::default()
            },
            params,
        );

        pool.insert(signed_tx(&spammer, 0, 5), &view).unwrap();
        pool.insert(signed_tx(&spammer, 1, 2), &view).unwrap();
        pool.insert(signed_tx(&other, 0, 10), &view).unwrap();
        assert_eq!(pool.len(), 3);

        // Richer transaction pushes out the spammer's cheapest.
        pool.insert(signed_tx(&other, 1, 20), &view).unwrap();
        assert_eq!(pool.len(), 3);
        let victim = signed_tx(&spammer, 1, 2).hash();
        assert!(!pool.contains(&victim));

        // A tip no better than the would-be victim is refused outright.
        let err = pool.insert(signed_tx(&spammer, 2, 1), &view).unwrap_err();
        assert!(matches!(err, MempoolError::MempoolFull { .. }));
    }

    #[test]
    fn remove_committed_prunes_stale_nonces() {
        let key = Ed25519KeyPair::from_seed(1);
        let mut view = view_for(&[&key]);
        let mut pool = pool();
        let tx0 = signed_tx(&key, 0, 5);
        let tx1 = signed_tx(&key, 1, 5);
        pool.insert(tx0.clone(), &view).unwrap();
        pool.insert(tx1.clone(), &view).unwrap();

        // Block committed both; account nonce is now 2.
        let sender = tx0.sender;
        view.0.get_mut(&sender).unwrap().nonce = 2;
        pool.remove_committed(&[tx0], &view);
        // tx1 was not in the committed list but its nonce is stale now.
        assert!(pool.is_empty());
    }

    #[test]
    fn replacement_needs_strictly_better_tip() {
        let key = Ed25519KeyPair::from_seed(1);
        let view = view_for(&[&key]);
        let mut pool = pool();
        pool.insert(signed_tx(&key, 0, 5), &view).unwrap();

        let err = pool.insert(signed_tx(&key, 0, 5), &view);
        // Same hash: duplicate, not replacement.
        assert_eq!(err.unwrap(), Admitted::Duplicate);

        let err = pool.insert(signed_tx(&key, 0, 4), &view).unwrap_err();
        assert!(matches!(err, MempoolError::FeeBelowBase { .. }));

        pool.insert(signed_tx(&key, 0, 6), &view).unwrap();
        assert_eq!(pool.len(), 1);
    }
}
