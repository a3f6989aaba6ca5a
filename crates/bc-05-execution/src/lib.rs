//! # Execution Subsystem
//!
//! The deterministic state-transition function. For each committed block the
//! executor runs its transactions in order against the flat state cache:
//! nonce and balance checks, EIP-1559 fee charging, selector-dispatched
//! contract calls, gas refunds, tip credit and base-fee burn, and a receipt
//! per transaction carrying the cache-computed post-state root.
//!
//! Execution is single-threaded per block and never suspends mid
//! transaction; reverts roll the cache back to a per-transaction snapshot
//! while the nonce increment and fee burn stand.

pub mod compliance;
pub mod contracts;
pub mod errors;
pub mod executor;
pub mod gas;

pub use compliance::{
    ComplianceError, ComplianceVerifier, NoopVerifier, NullifierSet, Outcome, Requirement,
};
pub use contracts::{
    builtin_selector, sdk_selector, Contract, ContractEnv, ContractRegistry, StakingContract,
    CODE_SLOT, MANIFEST_MAGIC, STAKING_CONTRACT,
};
pub use errors::{error_code, ExecutionError};
pub use executor::{install_system_accounts, BlockContext, Executor};
pub use gas::GasMeter;
