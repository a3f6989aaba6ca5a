//! Mempool error types.

use shared_types::U256;
use thiserror::Error;

/// Admission and pool failures. Each admission rule has its own kind.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum MempoolError {
    /// Transaction data exceeds the configured size cap.
    #[error("transaction data of {actual} bytes exceeds cap of {limit}")]
    OversizedInput { actual: usize, limit: usize },

    /// Transaction was signed for another chain.
    #[error("chain id {actual} does not match local chain {expected}")]
    ChainIdMismatch { expected: u32, actual: u32 },

    /// Signature invalid, or the sender public key does not hash to the
    /// claimed sender address.
    #[error("invalid transaction signature")]
    InvalidSignature,

    /// Nonce below the sender's current account nonce.
    #[error("nonce too low: account is at {account_nonce}, transaction has {tx_nonce}")]
    NonceTooLow { account_nonce: u64, tx_nonce: u64 },

    /// Nonce beyond the configured look-ahead window.
    #[error("nonce gap: transaction nonce {tx_nonce} exceeds {account_nonce} + window {window}")]
    NonceGap {
        account_nonce: u64,
        tx_nonce: u64,
        window: u64,
    },

    /// Fee fields incoherent or below the current base fee floor.
    #[error("fee below base: offered {offered}, required {required}")]
    FeeBelowBase { offered: U256, required: U256 },

    /// Gas limit under the intrinsic cost of the transaction.
    #[error("gas limit {limit} below intrinsic gas {intrinsic}")]
    IntrinsicGasTooLow { limit: u64, intrinsic: u64 },

    /// Sender balance cannot cover `gas_limit · price + value`.
    #[error("insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: U256, available: U256 },

    /// Pool at capacity and the incoming transaction lost the eviction
    /// comparison.
    #[error("mempool full at {capacity} transactions")]
    MempoolFull { capacity: usize },
}
