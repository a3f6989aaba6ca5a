//! # Chain Parameters
//!
//! The finite configuration surface of the node. Parameters are fixed at
//! genesis and within an epoch; `validate()` rejects combinations the
//! protocol cannot run with.

use crate::primitives::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on the validator set: the commit bitmap is one 64-bit word.
pub const MAX_VALIDATOR_SET_SIZE: u8 = 64;

/// Invalid parameter combinations.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error("validator_set_size {0} exceeds the bitmap capacity of 64")]
    ValidatorSetTooLarge(u8),
    #[error("validator_set_size must be at least 1")]
    EmptyValidatorSet,
    #[error("block_gas_limit must be non-zero")]
    ZeroGasLimit,
    #[error("epoch_length must be non-zero")]
    ZeroEpochLength,
    #[error("block_time_ms must be non-zero")]
    ZeroBlockTime,
    #[error("elasticity_multiplier must be non-zero")]
    ZeroElasticity,
    #[error("base_fee_change_denominator must be non-zero")]
    ZeroDenominator,
    #[error("max_extra_data_bytes {0} exceeds the protocol cap of 32")]
    ExtraDataCapTooLarge(usize),
    #[error("inactivity_threshold_percent {0} exceeds 100")]
    BadInactivityThreshold(u8),
}

/// Complete chain configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParameters {
    /// Replay-protection domain; signed into every transaction.
    pub chain_id: u32,
    /// Target interval between blocks.
    pub block_time_ms: u64,
    /// Gas ceiling per block.
    pub block_gas_limit: u64,
    pub max_block_size_bytes: usize,
    pub max_transactions_per_block: usize,
    pub max_transaction_data_bytes: usize,
    pub max_extra_data_bytes: usize,
    /// Admission floor for legacy gas prices.
    pub min_gas_price: U256,
    /// Base fee of block 1.
    pub initial_base_fee: U256,
    /// Flat credit to the proposer of every committed block.
    pub block_reward: U256,
    /// Bounds per-block base fee movement to 1/denominator.
    pub base_fee_change_denominator: u64,
    /// `target gas = block_gas_limit / elasticity_multiplier`.
    pub elasticity_multiplier: u64,
    pub transfer_gas_cost: u64,
    pub contract_deploy_gas_cost: u64,
    pub contract_call_gas_cost: u64,
    /// Active-set cap, at most 64.
    pub validator_set_size: u8,
    pub min_validator_stake: U256,
    /// Blocks per epoch; the validator set is fixed inside an epoch.
    pub epoch_length: u64,
    /// Blocks a withdrawal request waits before it matures.
    pub unbonding_period: u64,
    /// Validators signing fewer than this percentage of epoch blocks are
    /// penalized for inactivity.
    pub inactivity_threshold_percent: u8,
    pub token_decimals: u8,
    pub protocol_version: u32,
    /// Empty string selects the in-memory store.
    pub data_dir: String,
    /// `>= 0` enables validator mode with that bitmap index.
    pub validator_index: i32,
    /// Peer addresses to dial at startup.
    pub peers: Vec<String>,
    pub p2p_port: u16,
    pub rpc_port: u16,
}

impl Default for ChainParameters {
    fn default() -> Self {
        Self {
            chain_id: 31337,
            block_time_ms: 2000,
            block_gas_limit: 30_000_000,
            max_block_size_bytes: 4 * 1024 * 1024,
            max_transactions_per_block: 2048,
            max_transaction_data_bytes: 128 * 1024,
            max_extra_data_bytes: 32,
            min_gas_price: U256::one(),
            initial_base_fee: U256::from(1_000_000_000u64),
            block_reward: U256::zero(),
            base_fee_change_denominator: 8,
            elasticity_multiplier: 2,
            transfer_gas_cost: 21_000,
            contract_deploy_gas_cost: 500_000,
            contract_call_gas_cost: 50_000,
            validator_set_size: 4,
            min_validator_stake: U256::from(1_000_000u64),
            epoch_length: 100,
            unbonding_period: 200,
            inactivity_threshold_percent: 50,
            token_decimals: 18,
            protocol_version: 1,
            data_dir: String::new(),
            validator_index: -1,
            peers: Vec::new(),
            p2p_port: 30303,
            rpc_port: 8545,
        }
    }
}

impl ChainParameters {
    /// Reject configurations the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.validator_set_size > MAX_VALIDATOR_SET_SIZE {
            return Err(ParamsError::ValidatorSetTooLarge(self.validator_set_size));
        }
        if self.validator_set_size == 0 {
            return Err(ParamsError::EmptyValidatorSet);
        }
        if self.block_gas_limit == 0 {
            return Err(ParamsError::ZeroGasLimit);
        }
        if self.epoch_length == 0 {
            return Err(ParamsError::ZeroEpochLength);
        }
        if self.block_time_ms == 0 {
            return Err(ParamsError::ZeroBlockTime);
        }
        if self.elasticity_multiplier == 0 {
            return Err(ParamsError::ZeroElasticity);
        }
        if self.base_fee_change_denominator == 0 {
            return Err(ParamsError::ZeroDenominator);
        }
        if self.max_extra_data_bytes > 32 {
            return Err(ParamsError::ExtraDataCapTooLarge(self.max_extra_data_bytes));
        }
        if self.inactivity_threshold_percent > 100 {
            return Err(ParamsError::BadInactivityThreshold(
                self.inactivity_threshold_percent,
            ));
        }
        Ok(())
    }

    /// Gas usage the base-fee rule steers toward.
    pub fn gas_target(&self) -> u64 {
        self.block_gas_limit / self.elasticity_multiplier
    }

    /// True when this node participates in consensus.
    pub fn is_validator(&self) -> bool {
        self.validator_index >= 0
    }

    /// Epoch number containing the given height.
    pub fn epoch_of(&self, height: u64) -> u64 {
        height / self.epoch_length
    }

    /// True at the first height of an epoch.
    pub fn is_epoch_boundary(&self, height: u64) -> bool {
        height % self.epoch_length == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        ChainParameters::default().validate().unwrap();
    }

    #[test]
    fn bitmap_cap_enforced() {
        let mut params = ChainParameters::default();
        params.validator_set_size = 65;
        assert_eq!(
            params.validate(),
            Err(ParamsError::ValidatorSetTooLarge(65))
        );
        params.validator_set_size = 64;
        params.validate().unwrap();
    }

    #[test]
    fn epoch_arithmetic() {
        let mut params = ChainParameters::default();
        params.epoch_length = 100;
        assert_eq!(params.epoch_of(0), 0);
        assert_eq!(params.epoch_of(99), 0);
        assert_eq!(params.epoch_of(100), 1);
        assert!(params.is_epoch_boundary(0));
        assert!(params.is_epoch_boundary(200));
        assert!(!params.is_epoch_boundary(201));
    }

    #[test]
    fn gas_target_uses_elasticity() {
        let mut params = ChainParameters::default();
        params.block_gas_limit = 100_000_000;
        params.elasticity_multiplier = 2;
        assert_eq!(params.gas_target(), 50_000_000);
    }
}
