//! Execution error types and their receipt codes.

use bc_03_state::StateError;
use thiserror::Error;

/// Failures during transaction execution. Most become failed receipts; the
/// `State` variant is fatal to the block.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("out of gas: needed {needed}, remaining {remaining}")]
    OutOfGas { needed: u64, remaining: u64 },

    #[error("invalid nonce: account at {account_nonce}, transaction has {tx_nonce}")]
    InvalidNonce { account_nonce: u64, tx_nonce: u64 },

    #[error("insufficient funds for upfront gas cost")]
    InsufficientFunds,

    #[error("reverted by contract: {0}")]
    RevertedByContract(String),

    #[error("call depth exceeded at {0}")]
    CallDepthExceeded(usize),

    #[error("re-entrant call into active contract")]
    Reentrancy,

    #[error("unknown selector {0:02x?}")]
    UnknownSelector([u8; 4]),

    #[error("malformed contract code or call data")]
    MalformedCode,

    #[error("compliance proof missing")]
    ComplianceProofMissing,

    #[error("compliance proof invalid: {0}")]
    ComplianceProofInvalid(String),

    #[error("compliance nullifier already used in this block")]
    ComplianceDuplicateNullifier,

    /// Storage-level failure; the node halts rather than diverge.
    #[error(transparent)]
    State(#[from] StateError),
}

impl ExecutionError {
    /// Receipt error code for this failure.
    pub fn code(&self) -> u16 {
        match self {
            ExecutionError::OutOfGas { .. } => error_code::OUT_OF_GAS,
            ExecutionError::InvalidNonce { .. } => error_code::INVALID_NONCE,
            ExecutionError::InsufficientFunds => error_code::INSUFFICIENT_FUNDS,
            ExecutionError::RevertedByContract(_) => error_code::REVERTED,
            ExecutionError::CallDepthExceeded(_) => error_code::CALL_DEPTH_EXCEEDED,
            ExecutionError::Reentrancy => error_code::REENTRANCY,
            ExecutionError::UnknownSelector(_) => error_code::UNKNOWN_SELECTOR,
            ExecutionError::MalformedCode => error_code::MALFORMED_CODE,
            ExecutionError::ComplianceProofMissing => error_code::COMPLIANCE_MISSING,
            ExecutionError::ComplianceProofInvalid(_) => error_code::COMPLIANCE_INVALID,
            ExecutionError::ComplianceDuplicateNullifier => error_code::COMPLIANCE_NULLIFIER,
            ExecutionError::State(_) => error_code::INTERNAL,
        }
    }
}

/// Receipt error codes. Zero is success.
pub mod error_code {
    pub const SUCCESS: u16 = 0;
    pub const OUT_OF_GAS: u16 = 1;
    pub const INVALID_NONCE: u16 = 2;
    pub const INSUFFICIENT_FUNDS: u16 = 3;
    pub const REVERTED: u16 = 4;
    pub const CALL_DEPTH_EXCEEDED: u16 = 5;
    pub const REENTRANCY: u16 = 6;
    pub const UNKNOWN_SELECTOR: u16 = 7;
    pub const MALFORMED_CODE: u16 = 8;
    pub const COMPLIANCE_MISSING: u16 = 9;
    pub const COMPLIANCE_INVALID: u16 = 10;
    pub const COMPLIANCE_NULLIFIER: u16 = 11;
    pub const INTERNAL: u16 = u16::MAX;
}
