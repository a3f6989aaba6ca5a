//! # Contract Model
//!
//! Contracts are selector-dispatched units registered by type id, not
//! arbitrary bytecode. The "code" of a deployed contract is a four-byte
//! manifest header `[0xBA, 0x5A, type_id_hi, type_id_lo]` followed by its
//! constructor arguments; deployment resolves the type id against the
//! registry and the stored blob is only ever interpreted through it.
//!
//! Two selector schemes are wire-visible and must not be mixed up:
//! built-in contracts use `BLAKE3(name)[0..4]`; SDK units use 32-bit FNV-1a
//! of the name, little-endian.

pub mod staking;

pub use staking::StakingContract;

use crate::errors::ExecutionError;
use crate::gas::GasMeter;
use bc_03_state::StateManager;
use shared_types::{Account, Address, Hash, Log, U256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Leading bytes of every deployed code blob.
pub const MANIFEST_MAGIC: [u8; 2] = [0xba, 0x5a];

/// System-reserved storage slot holding a contract's code blob.
pub const CODE_SLOT: Hash = Hash([0xff; 32]);

/// Well-known address of the staking system contract.
pub const STAKING_CONTRACT: Address = Address([
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x01,
]);

/// Raw dispatch depth cap.
pub const MAX_CALL_DEPTH: usize = 1024;
/// SDK cross-call depth cap.
pub const MAX_SDK_CALL_DEPTH: usize = 8;

/// Gas schedule for contract storage and logging.
pub const SLOAD_GAS: u64 = 200;
pub const SSTORE_GAS: u64 = 5_000;
/// Refund accrued when a store clears a previously occupied slot.
pub const SSTORE_CLEAR_REFUND: u64 = 4_800;
pub const LOG_GAS: u64 = 375;
pub const LOG_DATA_BYTE_GAS: u64 = 8;

/// Built-in selector: first four bytes of `BLAKE3(name)`.
pub fn builtin_selector(name: &str) -> [u8; 4] {
    let digest = Hash::digest(name.as_bytes());
    let mut selector = [0u8; 4];
    selector.copy_from_slice(&digest.as_bytes()[..4]);
    selector
}

/// SDK selector: 32-bit FNV-1a of the name, little-endian.
pub fn sdk_selector(name: &str) -> [u8; 4] {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash.to_le_bytes()
}

/// Split a code blob into `(type_id, constructor_args)`.
pub fn parse_manifest(code: &[u8]) -> Result<(u16, &[u8]), ExecutionError> {
    if code.len() < 4 || code[..2] != MANIFEST_MAGIC {
        return Err(ExecutionError::MalformedCode);
    }
    let type_id = u16::from_be_bytes([code[2], code[3]]);
    Ok((type_id, &code[4..]))
}

/// Build a code blob from a type id and constructor arguments.
pub fn build_manifest(type_id: u16, constructor_args: &[u8]) -> Vec<u8> {
    let mut code = Vec::with_capacity(4 + constructor_args.len());
    code.extend_from_slice(&MANIFEST_MAGIC);
    code.extend_from_slice(&type_id.to_be_bytes());
    code.extend_from_slice(constructor_args);
    code
}

// =============================================================================
// CONTRACT TRAIT AND REGISTRY
// =============================================================================

/// A registered contract type.
pub trait Contract: Send + Sync {
    fn type_id(&self) -> u16;

    /// Run on deployment with the manifest's constructor arguments.
    fn construct(&self, env: &mut ContractEnv<'_>, args: &[u8]) -> Result<(), ExecutionError>;

    /// Handle a call. `selector` is the first four bytes of the call data;
    /// `input` is the rest.
    fn dispatch(
        &self,
        env: &mut ContractEnv<'_>,
        selector: [u8; 4],
        input: &[u8],
    ) -> Result<Vec<u8>, ExecutionError>;
}

/// Type-id → contract factory map, populated at node startup.
#[derive(Default)]
pub struct ContractRegistry {
    by_type: HashMap<u16, Arc<dyn Contract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the protocol's built-in contracts installed.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StakingContract));
        registry
    }

    pub fn register(&mut self, contract: Arc<dyn Contract>) {
        self.by_type.insert(contract.type_id(), contract);
    }

    pub fn get(&self, type_id: u16) -> Option<Arc<dyn Contract>> {
        self.by_type.get(&type_id).cloned()
    }

    /// Resolve a deployed code blob to its contract type.
    pub fn resolve(&self, code: &[u8]) -> Result<Arc<dyn Contract>, ExecutionError> {
        let (type_id, _) = parse_manifest(code)?;
        self.get(type_id).ok_or(ExecutionError::MalformedCode)
    }
}

// =============================================================================
// EXECUTION ENVIRONMENT
// =============================================================================

/// Everything a contract invocation may touch. There is no process-global
/// storage provider: each transaction execution carries its own cache
/// handle, and re-entrancy state lives here rather than in thread-locals.
pub struct ContractEnv<'a> {
    pub state: &'a mut StateManager,
    pub gas: &'a mut GasMeter,
    pub logs: &'a mut Vec<Log>,
    /// The contract whose storage is in scope.
    pub contract: Address,
    pub caller: Address,
    pub value: U256,
    pub block_number: u64,
    pub block_timestamp: i64,
    registry: &'a ContractRegistry,
    /// Contracts currently on the call stack.
    active: HashSet<Address>,
    depth: usize,
    sdk_depth: usize,
}

impl<'a> ContractEnv<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        state: &'a mut StateManager,
        gas: &'a mut GasMeter,
        logs: &'a mut Vec<Log>,
        registry: &'a ContractRegistry,
        contract: Address,
        caller: Address,
        value: U256,
        block_number: u64,
        block_timestamp: i64,
    ) -> Self {
        let mut active = HashSet::new();
        active.insert(contract);
        Self {
            state,
            gas,
            logs,
            contract,
            caller,
            value,
            block_number,
            block_timestamp,
            registry,
            active,
            depth: 1,
            sdk_depth: 1,
        }
    }

    /// Read a slot of the active contract.
    pub fn get_storage(&mut self, slot: &Hash) -> Result<Option<Vec<u8>>, ExecutionError> {
        self.gas.consume(SLOAD_GAS)?;
        Ok(self.state.storage(&self.contract, slot))
    }

    /// Write a slot of the active contract. Clearing an occupied slot
    /// accrues the storage refund.
    pub fn set_storage(&mut self, slot: Hash, value: Vec<u8>) -> Result<(), ExecutionError> {
        self.gas.consume(SSTORE_GAS)?;
        self.state.set_storage(self.contract, slot, value);
        Ok(())
    }

    /// Delete a slot of the active contract.
    pub fn remove_storage(&mut self, slot: Hash) -> Result<(), ExecutionError> {
        self.gas.consume(SSTORE_GAS)?;
        if self.state.storage(&self.contract, &slot).is_some() {
            self.gas.add_refund(SSTORE_CLEAR_REFUND);
        }
        self.state.remove_storage(self.contract, slot);
        Ok(())
    }

    /// Append an event log.
    pub fn emit(&mut self, event_sig: Hash, topics: Vec<Hash>, data: Vec<u8>) -> Result<(), ExecutionError> {
        self.gas
            .consume(LOG_GAS.saturating_add(data.len() as u64 * LOG_DATA_BYTE_GAS))?;
        self.logs.push(Log {
            contract: self.contract,
            event_sig,
            topics,
            data,
        });
        Ok(())
    }

    /// Move balance between accounts, creating the recipient if needed.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), ExecutionError> {
        if amount.is_zero() {
            return Ok(());
        }
        let mut src = self
            .state
            .account(&from)
            .ok_or(ExecutionError::InsufficientFunds)?;
        src.balance = src
            .balance
            .checked_sub(amount)
            .ok_or(ExecutionError::InsufficientFunds)?;
        self.state.set_account(from, src);
        let mut dst = self.state.account(&to).unwrap_or_else(|| Account::new_eoa(U256::zero()));
        dst.balance = dst.balance.saturating_add(amount);
        self.state.set_account(to, dst);
        Ok(())
    }

    /// Call another SDK contract. Depth-capped at [`MAX_SDK_CALL_DEPTH`]
    /// with an explicit re-entrancy guard over the active set.
    pub fn cross_call(
        &mut self,
        target: Address,
        selector: [u8; 4],
        input: &[u8],
    ) -> Result<Vec<u8>, ExecutionError> {
        if self.sdk_depth >= MAX_SDK_CALL_DEPTH {
            return Err(ExecutionError::CallDepthExceeded(self.sdk_depth));
        }
        if self.depth >= MAX_CALL_DEPTH {
            return Err(ExecutionError::CallDepthExceeded(self.depth));
        }
        if !self.active.insert(target) {
            return Err(ExecutionError::Reentrancy);
        }

        let code = self
            .state
            .storage(&target, &CODE_SLOT)
            .ok_or(ExecutionError::MalformedCode)?;
        let contract = self.registry.resolve(&code)?;

        let saved_contract = self.contract;
        let saved_caller = self.caller;
        let saved_value = self.value;
        self.caller = saved_contract;
        self.contract = target;
        self.value = U256::zero();
        self.depth += 1;
        self.sdk_depth += 1;

        let result = contract.dispatch(self, selector, input);

        self.contract = saved_contract;
        self.caller = saved_caller;
        self.value = saved_value;
        self.depth -= 1;
        self.sdk_depth -= 1;
        self.active.remove(&target);
        result
    }
}
