//! # Epoch Manager
//!
//! The active validator set, leader-schedule seed, and per-epoch counters
//! are fixed at epoch begin (heights divisible by `epoch_length`). Stake
//! deposits and registrations made during epoch `e` are read out of the
//! staking contract's storage at the boundary and take effect in `e + 1`;
//! equivocation and inactivity penalties are applied to the same storage at
//! the same moment. Matured unbonds are pull-based: the staker claims them
//! with a withdraw transaction, so boundaries do not move balances.

use crate::slashing::EquivocationEvidence;
use crate::validators::ValidatorSet;
use bc_03_state::StateManager;
use bc_05_execution::StakingContract;
use shared_crypto::blake3_hash;
use shared_types::{Address, ChainParameters, Encoder, Hash, ValidatorEntry, U256};
use std::collections::HashSet;
use tracing::{info, warn};

/// Divisor for the inactivity penalty: stake / 100 per lazy epoch.
const INACTIVITY_PENALTY_DIVISOR: u64 = 100;

/// Why stake was burned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PenaltyKind {
    Equivocation,
    Inactivity,
}

/// One applied stake penalty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Penalty {
    pub validator: Address,
    pub kind: PenaltyKind,
    pub amount: U256,
}

/// Tracks the current epoch number and seed, and rotates the set at
/// boundaries.
pub struct EpochManager {
    params: ChainParameters,
    epoch: u64,
    seed: Hash,
}

impl EpochManager {
    /// Epoch 0 from the genesis block hash.
    pub fn genesis(params: ChainParameters, genesis_hash: Hash) -> Self {
        let seed = Self::derive_seed(0, &genesis_hash);
        Self {
            params,
            epoch: 0,
            seed,
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn seed(&self) -> Hash {
        self.seed
    }

    /// Restore path: jump straight to `epoch` using its boundary block hash
    /// as the seed anchor.
    pub fn advance_to(&mut self, epoch: u64, anchor: &Hash) {
        self.epoch = epoch;
        self.seed = Self::derive_seed(epoch, anchor);
    }

    fn derive_seed(epoch: u64, anchor: &Hash) -> Hash {
        let mut enc = Encoder::with_capacity(56);
        enc.put_fixed(b"bslt-epoch-seed:");
        enc.put_u64(epoch);
        enc.put_hash(anchor);
        blake3_hash(&enc.finish())
    }

    /// Close the finished epoch: decide the penalties it earned and advance
    /// the epoch counter and seed. Pure bookkeeping; nothing touches state
    /// until [`Self::apply_penalties`] runs inside the first block of the
    /// new epoch, so the burns land in that block's state root.
    pub fn close_epoch(
        &mut self,
        boundary_hash: Hash,
        outgoing: &ValidatorSet,
        evidence: &[EquivocationEvidence],
    ) -> Vec<Penalty> {
        let mut penalties = Vec::new();
        let mut banned: HashSet<Address> = HashSet::new();

        for item in evidence {
            if let Some(entry) = outgoing.by_index(item.validator) {
                warn!(validator = %entry.address, "equivocation: full stake forfeited");
                banned.insert(entry.address);
                penalties.push(Penalty {
                    validator: entry.address,
                    kind: PenaltyKind::Equivocation,
                    amount: entry.stake,
                });
            }
        }

        let threshold = u64::from(self.params.inactivity_threshold_percent);
        for entry in outgoing.active() {
            if banned.contains(&entry.address) {
                continue;
            }
            let signed = u64::from(entry.signed_blocks_in_epoch);
            if signed * 100 < threshold * self.params.epoch_length {
                let amount = entry.stake / U256::from(INACTIVITY_PENALTY_DIVISOR);
                if amount.is_zero() {
                    continue;
                }
                penalties.push(Penalty {
                    validator: entry.address,
                    kind: PenaltyKind::Inactivity,
                    amount,
                });
            }
        }

        self.epoch += 1;
        self.seed = Self::derive_seed(self.epoch, &boundary_hash);
        info!(
            epoch = self.epoch,
            penalties = penalties.len(),
            "epoch closed"
        );
        penalties
    }

    /// Burn the decided penalties out of the staking storage. Equivocation
    /// penalties remove the full recorded stake even if it grew since.
    pub fn apply_penalties(state: &mut StateManager, penalties: &[Penalty]) {
        for penalty in penalties {
            let amount = match penalty.kind {
                PenaltyKind::Equivocation => U256::MAX,
                PenaltyKind::Inactivity => penalty.amount,
            };
            StakingContract::penalize(state, &penalty.validator, amount);
        }
    }

    /// Read the active set for the current epoch out of staking storage.
    pub fn build_set(&self, state: &StateManager, banned: &HashSet<Address>) -> ValidatorSet {
        let mut candidates: Vec<(Address, U256)> = StakingContract::registered_validators(state)
            .into_iter()
            .filter(|address| !banned.contains(address))
            .map(|address| (address, StakingContract::stake_of(state, &address)))
            .filter(|(_, stake)| *stake >= self.params.min_validator_stake)
            .collect();
        // Heaviest stake first; address breaks ties deterministically.
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        candidates.truncate(self.params.validator_set_size as usize);

        let entries: Vec<ValidatorEntry> = candidates
            .into_iter()
            .enumerate()
            .filter_map(|(index, (address, stake))| {
                let (ed25519_pubkey, bls_pubkey) = StakingContract::validator_keys(state, &address)?;
                Some(ValidatorEntry {
                    address,
                    ed25519_pubkey,
                    bls_pubkey,
                    stake,
                    index: index as u8,
                    active: true,
                    signed_blocks_in_epoch: 0,
                })
            })
            .collect();
        ValidatorSet::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::VotePhase;
    use bc_02_storage::MemoryStore;
    use bc_05_execution::{
        install_system_accounts, ContractEnv, ContractRegistry, GasMeter, STAKING_CONTRACT,
    };
    use shared_crypto::{BlsKeyPair, Ed25519KeyPair};
    use std::sync::Arc;

    fn params() -> ChainParameters {
        let mut params = ChainParameters::default();
        params.min_validator_stake = U256::from(1_000u64);
        params.validator_set_size = 4;
        params.epoch_length = 10;
        params.inactivity_threshold_percent = 50;
        params
    }

    fn register(state: &mut StateManager, seed: u64, stake: u64) -> Address {
        let address = Address::from_bytes([seed as u8 + 1; 20]);
        let ed = Ed25519KeyPair::from_seed(seed).public_key().to_value();
        let bls = BlsKeyPair::from_seed(seed).public_key().to_value();
        let mut keys = Vec::with_capacity(80);
        keys.extend_from_slice(ed.as_bytes());
        keys.extend_from_slice(bls.as_bytes());

        let mut gas = GasMeter::new(10_000_000);
        let mut logs = Vec::new();
        let registry = ContractRegistry::new();
        let mut env = ContractEnv::new(
            state,
            &mut gas,
            &mut logs,
            &registry,
            STAKING_CONTRACT,
            address,
            U256::zero(),
            0,
            0,
        );
        StakingContract::deposit(&mut env, address, U256::from(stake)).unwrap();
        StakingContract::register_validator(&mut env, address, &keys, U256::from(1_000u64)).unwrap();
        address
    }

    fn staked_state(stakes: &[u64]) -> (StateManager, Vec<Address>) {
        let mut state = StateManager::new(Arc::new(MemoryStore::new()));
        install_system_accounts(&mut state);
        let mut staking = state.account(&STAKING_CONTRACT).unwrap();
        staking.balance = U256::from(1_000_000_000u64);
        state.set_account(STAKING_CONTRACT, staking);
        let addrs = stakes
            .iter()
            .enumerate()
            .map(|(i, stake)| register(&mut state, i as u64, *stake))
            .collect();
        (state, addrs)
    }

    #[test]
    fn build_set_orders_by_stake_and_caps_size() {
        let (state, addrs) = staked_state(&[5_000, 9_000, 2_000, 7_000, 8_000]);
        let manager = EpochManager::genesis(params(), Hash::zero());
        let set = manager.build_set(&state, &HashSet::new());

        // Cap of 4: the 2_000 staker is dropped; heaviest first.
        assert_eq!(set.len(), 4);
        assert_eq!(set.entries()[0].address, addrs[1]);
        assert_eq!(set.entries()[1].address, addrs[4]);
        assert_eq!(set.entries()[2].address, addrs[3]);
        assert_eq!(set.entries()[3].address, addrs[0]);
        assert_eq!(set.entries()[0].index, 0);
        assert_eq!(set.total_stake(), U256::from(29_000u64));
    }

    #[test]
    fn below_minimum_stake_is_excluded() {
        let (state, _) = staked_state(&[500]);
        let manager = EpochManager::genesis(params(), Hash::zero());
        let set = manager.build_set(&state, &HashSet::new());
        assert!(set.is_empty());
    }

    #[test]
    fn rotation_burns_equivocator_and_drops_it() {
        let (mut state, addrs) = staked_state(&[5_000, 6_000, 7_000]);
        let mut manager = EpochManager::genesis(params(), Hash::zero());
        let mut outgoing = manager.build_set(&state, &HashSet::new());
        // Everyone signed every block, isolating the equivocation burn.
        for _ in 0..10 {
            outgoing.record_signed(u64::MAX);
        }

        let equivocator_index = outgoing.by_address(&addrs[1]).unwrap().index;
        let evidence = vec![EquivocationEvidence {
            validator: equivocator_index,
            number: 3,
            view: 0,
            phase: VotePhase::Prepare,
            first_hash: Hash::digest(b"a"),
            second_hash: Hash::digest(b"b"),
        }];

        let penalties = manager.close_epoch(Hash::digest(b"b10"), &outgoing, &evidence);
        EpochManager::apply_penalties(&mut state, &penalties);
        let next = manager.build_set(&state, &HashSet::new());

        assert_eq!(manager.epoch(), 1);
        assert!(next.by_address(&addrs[1]).is_none());
        assert_eq!(StakingContract::stake_of(&state, &addrs[1]), U256::zero());
        assert!(penalties
            .iter()
            .any(|p| p.validator == addrs[1] && p.kind == PenaltyKind::Equivocation));
        // The other two survive.
        assert!(next.by_address(&addrs[0]).is_some());
        assert!(next.by_address(&addrs[2]).is_some());
    }

    #[test]
    fn inactive_validator_pays_the_small_penalty() {
        let (mut state, addrs) = staked_state(&[10_000, 10_000]);
        let mut manager = EpochManager::genesis(params(), Hash::zero());
        let mut outgoing = manager.build_set(&state, &HashSet::new());

        // Validator at index of addrs[0] signs every block; the other none.
        let active_index = outgoing.by_address(&addrs[0]).unwrap().index;
        for _ in 0..10 {
            outgoing.record_signed(1u64 << active_index);
        }

        let penalties = manager.close_epoch(Hash::digest(b"b10"), &outgoing, &[]);
        EpochManager::apply_penalties(&mut state, &penalties);
        assert_eq!(penalties.len(), 1);
        assert_eq!(penalties[0].validator, addrs[1]);
        assert_eq!(penalties[0].kind, PenaltyKind::Inactivity);
        assert_eq!(penalties[0].amount, U256::from(100u64));
        assert_eq!(
            StakingContract::stake_of(&state, &addrs[1]),
            U256::from(9_900u64)
        );
    }

    #[test]
    fn seed_changes_every_epoch() {
        let (state, _) = staked_state(&[5_000]);
        let mut manager = EpochManager::genesis(params(), Hash::zero());
        let seed0 = manager.seed();
        let mut outgoing = manager.build_set(&state, &HashSet::new());
        for _ in 0..10 {
            outgoing.record_signed(u64::MAX);
        }
        manager.close_epoch(Hash::digest(b"b10"), &outgoing, &[]);
        assert_ne!(manager.seed(), seed0);
    }
}
