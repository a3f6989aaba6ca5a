//! # Admission Validation
//!
//! The rule chain every incoming transaction passes before it may queue,
//! checked in order so the caller sees the first failure:
//!
//! 1. Structural: data size, chain id, signature, sender/pubkey binding.
//! 2. Nonce: at or above the account nonce, within the look-ahead window.
//! 3. Gas and fees: intrinsic floor, fee-field coherence, base fee floor.
//! 4. Balance: worst-case cost covered.

use crate::errors::MempoolError;
use shared_crypto::{derive_address, Ed25519PublicKey, Ed25519Signature};
use shared_types::fees;
use shared_types::{Account, Address, ChainParameters, Transaction, U256};

/// Read access to current account state. The node wires the state manager
/// in behind this.
pub trait AccountView {
    fn account(&self, address: &Address) -> Option<Account>;

    fn nonce_of(&self, address: &Address) -> u64 {
        self.account(address).map(|a| a.nonce).unwrap_or(0)
    }

    fn balance_of(&self, address: &Address) -> U256 {
        self.account(address).map(|a| a.balance).unwrap_or_default()
    }
}

/// Run the full admission chain. `base_fee` is the fee floor of the block
/// currently being built.
pub fn validate(
    tx: &Transaction,
    view: &dyn AccountView,
    params: &ChainParameters,
    base_fee: U256,
    nonce_window: u64,
) -> Result<(), MempoolError> {
    // 1. Structural.
    if tx.data.len() > params.max_transaction_data_bytes {
        return Err(MempoolError::OversizedInput {
            actual: tx.data.len(),
            limit: params.max_transaction_data_bytes,
        });
    }
    if tx.chain_id != params.chain_id {
        return Err(MempoolError::ChainIdMismatch {
            expected: params.chain_id,
            actual: tx.chain_id,
        });
    }
    if derive_address(&tx.sender_pubkey) != tx.sender {
        return Err(MempoolError::InvalidSignature);
    }
    let pubkey =
        Ed25519PublicKey::from_value(&tx.sender_pubkey).map_err(|_| MempoolError::InvalidSignature)?;
    let signature = Ed25519Signature::from_value(&tx.signature);
    pubkey
        .verify(&tx.signing_bytes(), &signature)
        .map_err(|_| MempoolError::InvalidSignature)?;

    // 2. Nonce window.
    let account_nonce = view.nonce_of(&tx.sender);
    if tx.nonce < account_nonce {
        return Err(MempoolError::NonceTooLow {
            account_nonce,
            tx_nonce: tx.nonce,
        });
    }
    if tx.nonce > account_nonce.saturating_add(nonce_window) {
        return Err(MempoolError::NonceGap {
            account_nonce,
            tx_nonce: tx.nonce,
            window: nonce_window,
        });
    }

    // 3. Gas and fees.
    let intrinsic = fees::intrinsic_gas(tx.kind, &tx.data, params);
    if tx.gas_limit < intrinsic {
        return Err(MempoolError::IntrinsicGasTooLow {
            limit: tx.gas_limit,
            intrinsic,
        });
    }
    if tx.is_legacy() {
        if tx.gas_price < base_fee || tx.gas_price < params.min_gas_price {
            return Err(MempoolError::FeeBelowBase {
                offered: tx.gas_price,
                required: base_fee.max(params.min_gas_price),
            });
        }
    } else {
        if tx.max_priority_fee_per_gas > tx.max_fee_per_gas {
            return Err(MempoolError::FeeBelowBase {
                offered: tx.max_fee_per_gas,
                required: tx.max_priority_fee_per_gas,
            });
        }
        if tx.max_fee_per_gas < base_fee {
            return Err(MempoolError::FeeBelowBase {
                offered: tx.max_fee_per_gas,
                required: base_fee,
            });
        }
    }

    // 4. Balance cover at the fee cap.
    let required = tx.max_cost();
    let available = view.balance_of(&tx.sender);
    if available < required {
        return Err(MempoolError::InsufficientFunds {
            required,
            available,
        });
    }

    Ok(())
}
