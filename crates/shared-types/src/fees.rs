//! # Protocol Fee Arithmetic
//!
//! The base-fee update rule and the intrinsic gas table. Pure functions over
//! [`ChainParameters`](crate::ChainParameters); the mempool prices admission
//! with them and the executor charges with them, so they live beside the
//! shared types rather than in either subsystem.

use crate::params::ChainParameters;
use crate::primitives::U256;
use crate::TxKind;

/// Gas per non-zero byte of transaction data.
pub const DATA_NONZERO_BYTE_GAS: u64 = 16;
/// Gas per zero byte of transaction data.
pub const DATA_ZERO_BYTE_GAS: u64 = 4;

/// Base fee of the block following a parent with the given usage.
///
/// Let `target = parent_gas_limit / elasticity`. At exactly `target` the fee
/// is unchanged; above it the fee rises by
/// `max(1, base · (used − target) / target / denominator)`; below it the fee
/// falls symmetrically, floored at zero.
pub fn next_base_fee(
    parent_base_fee: U256,
    parent_gas_used: u64,
    parent_gas_limit: u64,
    params: &ChainParameters,
) -> U256 {
    let target = parent_gas_limit / params.elasticity_multiplier;
    if target == 0 {
        return parent_base_fee;
    }
    let denominator = U256::from(params.base_fee_change_denominator);

    if parent_gas_used == target {
        parent_base_fee
    } else if parent_gas_used > target {
        let delta = parent_base_fee
            .saturating_mul(U256::from(parent_gas_used - target))
            / U256::from(target)
            / denominator;
        parent_base_fee.saturating_add(delta.max(U256::one()))
    } else {
        let delta = parent_base_fee
            .saturating_mul(U256::from(target - parent_gas_used))
            / U256::from(target)
            / denominator;
        parent_base_fee.saturating_sub(delta)
    }
}

/// Gas charged before any execution: the per-kind floor plus the data cost.
pub fn intrinsic_gas(kind: TxKind, data: &[u8], params: &ChainParameters) -> u64 {
    let base = match kind {
        TxKind::Transfer => params.transfer_gas_cost,
        TxKind::ContractDeploy => params.contract_deploy_gas_cost,
        TxKind::ContractCall
        | TxKind::StakeDeposit
        | TxKind::StakeWithdraw
        | TxKind::ValidatorRegister => params.contract_call_gas_cost,
    };
    base.saturating_add(data_gas(data))
}

/// Per-byte data cost with the zero/non-zero split.
pub fn data_gas(data: &[u8]) -> u64 {
    let zero = data.iter().filter(|b| **b == 0).count() as u64;
    let nonzero = data.len() as u64 - zero;
    zero.saturating_mul(DATA_ZERO_BYTE_GAS)
        .saturating_add(nonzero.saturating_mul(DATA_NONZERO_BYTE_GAS))
}
