//! Shared fixtures: deterministic keys, funded genesis configs, and signed
//! transactions.

use node_runtime::{GenesisConfig, GenesisValidator, NodeKeys};
use shared_crypto::{derive_address, BlsKeyPair, Ed25519KeyPair};
use shared_types::{Address, ChainParameters, Ed25519Sig, Transaction, TxKind, U256};

/// Deterministic validator keys for seed `i`.
pub fn keys(seed: u64) -> NodeKeys {
    NodeKeys {
        ed25519: Ed25519KeyPair::from_seed(seed),
        bls: BlsKeyPair::from_seed(seed),
    }
}

pub fn address_of(seed: u64) -> Address {
    derive_address(&Ed25519KeyPair::from_seed(seed).public_key().to_value())
}

/// Devnet parameters: single validator, in-memory store, flat base fee of 1
/// so the literal-value scenarios come out exact.
pub fn devnet_params() -> ChainParameters {
    let mut params = ChainParameters::default();
    params.validator_set_size = 1;
    params.validator_index = 0;
    params.initial_base_fee = U256::one();
    params.min_gas_price = U256::one();
    params.epoch_length = 100;
    params
}

/// Genesis with validators from seeds `0..n` and one funded user account
/// per entry in `balances` (seeds 100, 101, ...).
pub fn genesis_with(n_validators: u64, balances: &[u64]) -> GenesisConfig {
    let validators = (0..n_validators)
        .map(|i| {
            let keys = keys(i);
            GenesisValidator {
                address: derive_address(&keys.ed25519.public_key().to_value()),
                ed25519_pubkey: keys.ed25519.public_key().to_value(),
                bls_pubkey: keys.bls.public_key().to_value(),
                stake: U256::from(2_000_000u64),
            }
        })
        .collect();
    let accounts = balances
        .iter()
        .enumerate()
        .map(|(i, balance)| (address_of(100 + i as u64), U256::from(*balance)))
        .collect();
    GenesisConfig {
        accounts,
        validators,
        timestamp: 1_700_000_000,
    }
}

/// Signed legacy transfer from the account of key-seed `from_seed`.
pub fn signed_transfer(
    from_seed: u64,
    to: Address,
    nonce: u64,
    value: u64,
    gas_price: u64,
) -> Transaction {
    let key = Ed25519KeyPair::from_seed(from_seed);
    let pubkey = key.public_key().to_value();
    let mut tx = Transaction {
        kind: TxKind::Transfer,
        nonce,
        sender: derive_address(&pubkey),
        to,
        value: U256::from(value),
        gas_limit: 21_000,
        gas_price: U256::from(gas_price),
        max_fee_per_gas: U256::zero(),
        max_priority_fee_per_gas: U256::zero(),
        data: Vec::new(),
        priority: 0,
        chain_id: 31337,
        compliance_proofs: Vec::new(),
        signature: Ed25519Sig::zero(),
        sender_pubkey: pubkey,
    };
    tx.signature = key.sign(&tx.signing_bytes()).to_value();
    tx
}
