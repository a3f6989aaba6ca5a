//! # Genesis
//!
//! Builds block 0 and its state: funded accounts, the staking system
//! contract seeded with the genesis validators' stakes and keys, and the
//! genesis header whose state root anchors the chain.

use bc_02_storage::{BlockStore, KeyValueStore, MetadataStore, WriteBatch};
use bc_03_state::StateManager;
use bc_05_execution::{install_system_accounts, ContractEnv, ContractRegistry, GasMeter, StakingContract, STAKING_CONTRACT};
use shared_types::{
    Account, Address, Block, BlockHeader, BlsPub, ChainParameters, Ed25519Pub, Hash, U256,
};
use std::sync::Arc;
use tracing::info;

/// One genesis validator: funded, staked, and registered before block 1.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GenesisValidator {
    pub address: Address,
    pub ed25519_pubkey: Ed25519Pub,
    pub bls_pubkey: BlsPub,
    pub stake: U256,
}

/// Genesis state description.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct GenesisConfig {
    /// Pre-funded externally-owned accounts.
    pub accounts: Vec<(Address, U256)>,
    pub validators: Vec<GenesisValidator>,
    /// Timestamp written into block 0.
    pub timestamp: i64,
}

impl GenesisConfig {
    /// Materialize genesis into `state` and persist block 0. Returns the
    /// genesis block.
    pub fn build(
        &self,
        params: &ChainParameters,
        store: &Arc<dyn KeyValueStore>,
        state: &mut StateManager,
    ) -> anyhow::Result<Block> {
        install_system_accounts(state);

        for (address, balance) in &self.accounts {
            state.set_account(*address, Account::new_eoa(*balance));
        }

        // Stake ledger: balances live in the contract, records in its slots.
        let total_stake = self
            .validators
            .iter()
            .fold(U256::zero(), |acc, v| acc.saturating_add(v.stake));
        let mut staking = state
            .account(&STAKING_CONTRACT)
            .unwrap_or_else(|| Account::new_contract(Hash::zero()));
        staking.balance = staking.balance.saturating_add(total_stake);
        state.set_account(STAKING_CONTRACT, staking);

        let registry = ContractRegistry::new();
        let mut gas = GasMeter::new(u64::MAX);
        let mut logs = Vec::new();
        let mut env = ContractEnv::new(
            state,
            &mut gas,
            &mut logs,
            &registry,
            STAKING_CONTRACT,
            Address::zero(),
            U256::zero(),
            0,
            self.timestamp,
        );
        for validator in &self.validators {
            let mut keys = Vec::with_capacity(80);
            keys.extend_from_slice(validator.ed25519_pubkey.as_bytes());
            keys.extend_from_slice(validator.bls_pubkey.as_bytes());
            StakingContract::deposit(&mut env, validator.address, validator.stake)?;
            StakingContract::register_validator(
                &mut env,
                validator.address,
                &keys,
                params.min_validator_stake,
            )?;
        }

        let mut batch = WriteBatch::new();
        let state_root = state.commit(&mut batch)?;

        let block = Block {
            header: BlockHeader {
                number: 0,
                parent_hash: Hash::zero(),
                state_root,
                transactions_root: Hash::zero(),
                receipts_root: Hash::zero(),
                timestamp: self.timestamp,
                proposer: Address::zero(),
                chain_id: params.chain_id,
                gas_used: 0,
                gas_limit: params.block_gas_limit,
                base_fee: params.initial_base_fee,
                protocol_version: params.protocol_version,
                extra_data: Vec::new(),
            },
            transactions: Vec::new(),
            receipts: Vec::new(),
            certificate: None,
        };

        BlockStore::new(store.clone()).stage_block(&mut batch, &block);
        MetadataStore::new(store.clone()).stage_latest_block(&mut batch, &block.hash());
        store.commit(batch)?;

        info!(hash = %block.hash(), root = %state_root, validators = self.validators.len(), "genesis written");
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_02_storage::MemoryStore;
    use shared_crypto::{derive_address, BlsKeyPair, Ed25519KeyPair};

    pub(crate) fn dev_genesis(n_validators: u64) -> GenesisConfig {
        let validators = (0..n_validators)
            .map(|i| {
                let ed = Ed25519KeyPair::from_seed(i);
                let bls = BlsKeyPair::from_seed(i);
                GenesisValidator {
                    address: derive_address(&ed.public_key().to_value()),
                    ed25519_pubkey: ed.public_key().to_value(),
                    bls_pubkey: bls.public_key().to_value(),
                    stake: U256::from(2_000_000u64),
                }
            })
            .collect();
        GenesisConfig {
            accounts: vec![(Address::from_bytes([0xaa; 20]), U256::from(1_000_000_000_000u64))],
            validators,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn genesis_builds_and_registers_validators() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let mut state = StateManager::new(store.clone());
        let params = ChainParameters::default();
        let config = dev_genesis(4);

        let block = config.build(&params, &store, &mut state).unwrap();
        assert_eq!(block.header.number, 0);
        assert_eq!(block.header.parent_hash, Hash::zero());
        assert_eq!(block.header.base_fee, params.initial_base_fee);

        // State is on disk: a fresh manager restores it with a matching root.
        let mut restored = StateManager::new(store.clone());
        restored.restore().unwrap();
        restored.verify_root(&block.header.state_root).unwrap();

        assert_eq!(StakingContract::registered_validators(&restored).len(), 4);
        assert_eq!(
            restored.account(&Address::from_bytes([0xaa; 20])).unwrap().balance,
            U256::from(1_000_000_000_000u64)
        );

        // Block 0 is fetchable by height.
        let blocks = BlockStore::new(store);
        assert_eq!(blocks.block_by_height(0).unwrap().unwrap(), block);
    }
}
