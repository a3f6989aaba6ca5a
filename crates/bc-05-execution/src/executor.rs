//! # Transaction Executor
//!
//! Deterministic per-block state transition. For each transaction:
//!
//! 1. nonce check against the sender account
//! 2. effective gas price under the block's base fee
//! 3. upfront debit of `gas_limit · price`
//! 4. nonce increment, then the compliance hook
//! 5. dispatch on transaction kind
//! 6. refund-adjusted gas accounting
//! 7. tip credit to the proposer, base-fee burn
//! 8. receipt with the cache-computed post-state root
//!
//! Failures roll the cache back to the per-transaction snapshot but keep
//! the nonce increment and the fee charge for gas actually consumed.
//! Receipts leave the executor with a zero block hash; the block sealer
//! backfills it once the header hash is fixed.

use crate::compliance::{ComplianceError, ComplianceVerifier, NullifierSet, Outcome};
use crate::contracts::{
    ContractEnv, ContractRegistry, StakingContract, CODE_SLOT, STAKING_CONTRACT,
};
use crate::errors::{error_code, ExecutionError};
use crate::gas::GasMeter;
use bc_03_state::StateManager;
use shared_crypto::derive_contract_address;
use shared_types::{
    fees, Account, AccountKind, Address, ChainParameters, Decoder, Hash, Log, Receipt,
    Transaction, TxKind, U256,
};
use std::sync::Arc;
use tracing::{debug, trace};

/// Block-scoped execution inputs.
#[derive(Clone, Debug)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: i64,
    pub base_fee: U256,
    pub proposer: Address,
    pub gas_limit: u64,
}

/// The state-transition engine. Holds the contract registry and the
/// compliance hook; all mutable state is the caller's [`StateManager`].
pub struct Executor {
    params: ChainParameters,
    registry: ContractRegistry,
    compliance: Arc<dyn ComplianceVerifier>,
    nullifiers: NullifierSet,
}

impl Executor {
    pub fn new(
        params: ChainParameters,
        registry: ContractRegistry,
        compliance: Arc<dyn ComplianceVerifier>,
    ) -> Self {
        Self {
            params,
            registry,
            compliance,
            nullifiers: NullifierSet::new(),
        }
    }

    pub fn params(&self) -> &ChainParameters {
        &self.params
    }

    /// Execute a block's transactions in order. Returns the receipts and
    /// total gas used. Only storage-level faults abort the block; individual
    /// transaction failures become failed receipts.
    pub fn execute_block(
        &self,
        state: &mut StateManager,
        ctx: &BlockContext,
        txs: &[Transaction],
    ) -> Result<(Vec<Receipt>, u64), ExecutionError> {
        self.nullifiers.reset();
        self.compliance.reset_nullifiers();

        let mut receipts = Vec::with_capacity(txs.len());
        let mut gas_total: u64 = 0;
        for (index, tx) in txs.iter().enumerate() {
            let receipt = self.execute_transaction(state, ctx, tx, index as u32)?;
            gas_total = gas_total.saturating_add(receipt.gas_used);
            receipts.push(receipt);
        }

        if !self.params.block_reward.is_zero() {
            let mut proposer = state
                .account(&ctx.proposer)
                .unwrap_or_else(|| Account::new_eoa(U256::zero()));
            proposer.balance = proposer.balance.saturating_add(self.params.block_reward);
            state.set_account(ctx.proposer, proposer);
        }

        debug!(
            number = ctx.number,
            txs = txs.len(),
            gas = gas_total,
            "block executed"
        );
        Ok((receipts, gas_total))
    }

    fn execute_transaction(
        &self,
        state: &mut StateManager,
        ctx: &BlockContext,
        tx: &Transaction,
        tx_index: u32,
    ) -> Result<Receipt, ExecutionError> {
        let tx_hash = tx.hash();
        let price = tx.effective_gas_price(ctx.base_fee);
        let snapshot = state.snapshot();

        // 1. Nonce against the sender account.
        let mut sender = state.account(&tx.sender).unwrap_or_default();
        if tx.nonce != sender.nonce {
            trace!(%tx_hash, "invalid nonce");
            return Ok(self.failed_receipt(
                state,
                ctx,
                tx,
                tx_index,
                0,
                price,
                error_code::INVALID_NONCE,
                Vec::new(),
            ));
        }

        // 3. Upfront debit of the full gas allowance.
        let upfront = price.saturating_mul(U256::from(tx.gas_limit));
        let Some(debited) = sender.balance.checked_sub(upfront) else {
            return Ok(self.failed_receipt(
                state,
                ctx,
                tx,
                tx_index,
                0,
                price,
                error_code::INSUFFICIENT_FUNDS,
                Vec::new(),
            ));
        };

        // 4. Nonce increment; effects from here on survive reverts.
        sender.balance = debited;
        sender.nonce += 1;
        state.set_account(tx.sender, sender);
        let committed = state.snapshot();

        let mut gas = GasMeter::new(tx.gas_limit);
        let intrinsic = fees::intrinsic_gas(tx.kind, &tx.data, &self.params);
        if gas.consume(intrinsic).is_err() {
            // Admission enforces the intrinsic floor; a block from a faulty
            // leader can still carry such a transaction.
            gas.consume_all();
            self.settle_failure(state, ctx, tx, price, &gas, committed);
            return Ok(self.failed_receipt(
                state,
                ctx,
                tx,
                tx_index,
                gas.gas_used(),
                price,
                error_code::OUT_OF_GAS,
                Vec::new(),
            ));
        }

        // Compliance hook, nullifiers first.
        if let Some(code) = self.check_compliance(tx, ctx) {
            // Charge intrinsic only; refund the rest, keep nonce and debit.
            self.settle_fees(state, ctx, tx, price, intrinsic);
            return Ok(self.failed_receipt(
                state, ctx, tx, tx_index, intrinsic, price, code, Vec::new(),
            ));
        }

        // 5. Dispatch.
        let mut logs = Vec::new();
        match self.dispatch(state, &mut gas, &mut logs, ctx, tx) {
            Ok(()) => {
                // 6–7. Refund-adjusted accounting, tip, burn.
                let effective_used = gas.effective_gas_used();
                self.settle_fees(state, ctx, tx, price, effective_used);
                let post_state_root = state.compute_root();
                Ok(Receipt {
                    tx_hash,
                    block_hash: Hash::zero(),
                    block_number: ctx.number,
                    tx_index,
                    from: tx.sender,
                    to: tx.to,
                    gas_used: effective_used,
                    success: true,
                    error_code: error_code::SUCCESS,
                    post_state_root,
                    effective_gas_price: price,
                    logs,
                })
            }
            Err(err @ ExecutionError::State(_)) => Err(err),
            Err(err) => {
                if matches!(err, ExecutionError::OutOfGas { .. }) {
                    gas.consume_all();
                }
                trace!(%tx_hash, error = %err, "transaction reverted");
                // Roll back contract effects; nonce and gas charge stand.
                state.rollback(snapshot);
                let mut sender = state.account(&tx.sender).unwrap_or_default();
                sender.nonce += 1;
                sender.balance = sender
                    .balance
                    .saturating_sub(price.saturating_mul(U256::from(gas.gas_used())));
                state.set_account(tx.sender, sender);
                self.credit_tip(state, ctx, price, gas.gas_used());
                Ok(self.failed_receipt(
                    state,
                    ctx,
                    tx,
                    tx_index,
                    gas.gas_used(),
                    price,
                    err.code(),
                    Vec::new(),
                ))
            }
        }
    }

    /// Per-block nullifier uniqueness, then the pluggable verifier.
    fn check_compliance(&self, tx: &Transaction, ctx: &BlockContext) -> Option<u16> {
        for proof in &tx.compliance_proofs {
            if !self.nullifiers.insert(proof.nullifier) {
                return Some(error_code::COMPLIANCE_NULLIFIER);
            }
        }
        let requirements = self.compliance.get_requirements(&tx.to);
        match self
            .compliance
            .verify_proofs(&tx.compliance_proofs, &requirements, ctx.timestamp)
        {
            Outcome::Allowed => None,
            Outcome::Failed(ComplianceError::MissingProof) => Some(error_code::COMPLIANCE_MISSING),
            Outcome::Failed(ComplianceError::InvalidProof(_)) => {
                Some(error_code::COMPLIANCE_INVALID)
            }
            Outcome::Failed(ComplianceError::DuplicateNullifier(_)) => {
                Some(error_code::COMPLIANCE_NULLIFIER)
            }
        }
    }

    fn dispatch(
        &self,
        state: &mut StateManager,
        gas: &mut GasMeter,
        logs: &mut Vec<Log>,
        ctx: &BlockContext,
        tx: &Transaction,
    ) -> Result<(), ExecutionError> {
        match tx.kind {
            TxKind::Transfer => self.transfer(state, tx.sender, tx.to, tx.value),
            TxKind::ContractDeploy => {
                let contract_addr = derive_contract_address(&tx.sender, tx.nonce);
                let (_, args) = crate::contracts::parse_manifest(&tx.data)?;
                let contract = self.registry.resolve(&tx.data)?;

                let mut account = Account::new_contract(Hash::digest(&tx.data));
                account.balance = tx.value;
                state.set_account(contract_addr, account);
                state.set_storage(contract_addr, CODE_SLOT, tx.data.clone());
                self.transfer_out(state, tx.sender, tx.value)?;

                let args = args.to_vec();
                let mut env = ContractEnv::new(
                    state,
                    gas,
                    logs,
                    &self.registry,
                    contract_addr,
                    tx.sender,
                    tx.value,
                    ctx.number,
                    ctx.timestamp,
                );
                contract.construct(&mut env, &args)
            }
            TxKind::ContractCall => {
                if !state.account(&tx.to).is_some_and(|a| a.is_contract()) {
                    return Err(ExecutionError::MalformedCode);
                }
                let code = state
                    .storage(&tx.to, &CODE_SLOT)
                    .ok_or(ExecutionError::MalformedCode)?;
                let contract = self.registry.resolve(&code)?;
                if tx.data.len() < 4 {
                    return Err(ExecutionError::MalformedCode);
                }
                let mut selector = [0u8; 4];
                selector.copy_from_slice(&tx.data[..4]);

                self.transfer(state, tx.sender, tx.to, tx.value)?;
                let input = tx.data[4..].to_vec();
                let mut env = ContractEnv::new(
                    state,
                    gas,
                    logs,
                    &self.registry,
                    tx.to,
                    tx.sender,
                    tx.value,
                    ctx.number,
                    ctx.timestamp,
                );
                contract.dispatch(&mut env, selector, &input).map(|_| ())
            }
            TxKind::StakeDeposit => {
                self.transfer(state, tx.sender, STAKING_CONTRACT, tx.value)?;
                let mut env = ContractEnv::new(
                    state,
                    gas,
                    logs,
                    &self.registry,
                    STAKING_CONTRACT,
                    tx.sender,
                    tx.value,
                    ctx.number,
                    ctx.timestamp,
                );
                StakingContract::deposit(&mut env, tx.sender, tx.value)
            }
            TxKind::StakeWithdraw => {
                let amount = if tx.data.len() >= 32 {
                    let mut dec = Decoder::new(&tx.data[..32]);
                    dec.get_u256().unwrap_or_default()
                } else {
                    U256::zero()
                };
                let mut env = ContractEnv::new(
                    state,
                    gas,
                    logs,
                    &self.registry,
                    STAKING_CONTRACT,
                    tx.sender,
                    U256::zero(),
                    ctx.number,
                    ctx.timestamp,
                );
                StakingContract::withdraw(&mut env, tx.sender, amount, self.params.unbonding_period)
            }
            TxKind::ValidatorRegister => {
                let mut env = ContractEnv::new(
                    state,
                    gas,
                    logs,
                    &self.registry,
                    STAKING_CONTRACT,
                    tx.sender,
                    U256::zero(),
                    ctx.number,
                    ctx.timestamp,
                );
                StakingContract::register_validator(
                    &mut env,
                    tx.sender,
                    &tx.data,
                    self.params.min_validator_stake,
                )
            }
        }
    }

    /// Move `value` from sender to recipient, creating the recipient.
    fn transfer(
        &self,
        state: &mut StateManager,
        from: Address,
        to: Address,
        value: U256,
    ) -> Result<(), ExecutionError> {
        if value.is_zero() {
            return Ok(());
        }
        self.transfer_out(state, from, value)?;
        let mut recipient = state
            .account(&to)
            .unwrap_or_else(|| Account::new_eoa(U256::zero()));
        recipient.balance = recipient.balance.saturating_add(value);
        state.set_account(to, recipient);
        Ok(())
    }

    fn transfer_out(
        &self,
        state: &mut StateManager,
        from: Address,
        value: U256,
    ) -> Result<(), ExecutionError> {
        if value.is_zero() {
            return Ok(());
        }
        let mut sender = state.account(&from).unwrap_or_default();
        sender.balance = sender
            .balance
            .checked_sub(value)
            .ok_or(ExecutionError::InsufficientFunds)?;
        state.set_account(from, sender);
        Ok(())
    }

    /// Refund unused gas to the sender and credit the proposer tip; the
    /// base-fee share of `gas_used` stays debited (burned).
    fn settle_fees(
        &self,
        state: &mut StateManager,
        ctx: &BlockContext,
        tx: &Transaction,
        price: U256,
        gas_used: u64,
    ) {
        let unused = tx.gas_limit - gas_used;
        if unused > 0 {
            let mut sender = state.account(&tx.sender).unwrap_or_default();
            sender.balance = sender
                .balance
                .saturating_add(price.saturating_mul(U256::from(unused)));
            state.set_account(tx.sender, sender);
        }
        self.credit_tip(state, ctx, price, gas_used);
    }

    fn credit_tip(&self, state: &mut StateManager, ctx: &BlockContext, price: U256, gas_used: u64) {
        let tip = price.saturating_sub(ctx.base_fee);
        if tip.is_zero() || gas_used == 0 {
            return;
        }
        let mut proposer = state
            .account(&ctx.proposer)
            .unwrap_or_else(|| Account::new_eoa(U256::zero()));
        proposer.balance = proposer
            .balance
            .saturating_add(tip.saturating_mul(U256::from(gas_used)));
        state.set_account(ctx.proposer, proposer);
    }

    fn settle_failure(
        &self,
        state: &mut StateManager,
        ctx: &BlockContext,
        tx: &Transaction,
        price: U256,
        gas: &GasMeter,
        committed: bc_03_state::Snapshot,
    ) {
        state.rollback(committed);
        let refund = tx.gas_limit - gas.gas_used();
        if refund > 0 {
            let mut sender = state.account(&tx.sender).unwrap_or_default();
            sender.balance = sender
                .balance
                .saturating_add(price.saturating_mul(U256::from(refund)));
            state.set_account(tx.sender, sender);
        }
        self.credit_tip(state, ctx, price, gas.gas_used());
    }

    #[allow(clippy::too_many_arguments)]
    fn failed_receipt(
        &self,
        state: &StateManager,
        ctx: &BlockContext,
        tx: &Transaction,
        tx_index: u32,
        gas_used: u64,
        price: U256,
        error_code: u16,
        logs: Vec<Log>,
    ) -> Receipt {
        Receipt {
            tx_hash: tx.hash(),
            block_hash: Hash::zero(),
            block_number: ctx.number,
            tx_index,
            from: tx.sender,
            to: tx.to,
            gas_used,
            success: false,
            error_code,
            post_state_root: state.compute_root(),
            effective_gas_price: price,
            logs,
        }
    }
}

/// Ensure the staking system account exists in a genesis state.
pub fn install_system_accounts(state: &mut StateManager) {
    if state.account(&STAKING_CONTRACT).is_none() {
        let mut account = Account::new_contract(Hash::zero());
        account.kind = AccountKind::System;
        state.set_account(STAKING_CONTRACT, account);
    }
}
