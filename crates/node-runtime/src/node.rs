//! # Node Orchestrator
//!
//! Owns every subsystem and drives the height loop. Startup opens the
//! store (in-memory when `data_dir` is empty), loads the latest block
//! pointer, restores the flat cache, and halts unless the recomputed trie
//! root equals the stored tip's `state_root`. With `validator_index ≥ 0`
//! and keys the node proposes and votes; otherwise it only applies
//! committed blocks.
//!
//! Execution of a block is single-threaded: the loop owns the state
//! manager exclusively from the start of a commit to its batch write.

use crate::genesis::GenesisConfig;
use anyhow::{bail, Context};
use bc_02_storage::{
    BlockStore, KeyValueStore, MemoryStore, MetadataStore, ReceiptStore, RocksDbConfig,
    RocksDbStore, WriteBatch,
};
use bc_03_state::StateManager;
use bc_04_mempool::{AccountView, Admitted, Mempool, MempoolConfig, MempoolError};
use bc_05_execution::{BlockContext, ComplianceVerifier, ContractRegistry, Executor};
use bc_06_consensus::{
    Action, ConsensusEngine, EpochManager, Penalty, Proposal, ViewChange, Vote,
};
use shared_crypto::{derive_address, BlsKeyPair, Ed25519KeyPair};
use shared_types::{
    fees, Block, BlockHeader, ChainParameters, Decodable, Encodable, Envelope, Hash, MessageType,
    Receipt, Transaction,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Outbound network port. The gossip layer implements this; tests capture.
pub trait NetworkSink: Send + Sync {
    fn broadcast(&self, envelope: Envelope);
}

/// Sink that drops everything (single-node devnet, tests).
pub struct NullNetwork;

impl NetworkSink for NullNetwork {
    fn broadcast(&self, _envelope: Envelope) {}
}

/// Validator signing keys.
pub struct NodeKeys {
    pub ed25519: Ed25519KeyPair,
    pub bls: BlsKeyPair,
}

/// Inbound events from the network layer or local RPC.
#[derive(Debug)]
pub enum NodeEvent {
    Envelope(Envelope),
    SubmitTransaction(Transaction),
    Shutdown,
}

struct StateView<'a>(&'a StateManager);

impl AccountView for StateView<'_> {
    fn account(&self, address: &shared_types::Address) -> Option<shared_types::Account> {
        self.0.account(address)
    }
}

/// The wired node.
pub struct Node {
    params: ChainParameters,
    store: Arc<dyn KeyValueStore>,
    state: StateManager,
    mempool: Mempool,
    executor: Executor,
    engine: ConsensusEngine,
    epoch: EpochManager,
    blocks: BlockStore,
    receipts: ReceiptStore,
    metadata: MetadataStore,
    network: Arc<dyn NetworkSink>,
    keys: Option<NodeKeys>,
    node_id: [u8; 32],
    tip: BlockHeader,
    /// Timer re-arm requested by the engine this iteration.
    pending_timeout: Option<Duration>,
    /// Penalties decided at the last epoch boundary, burned inside the
    /// first block of the new epoch so they are part of its state root.
    pending_penalties: Vec<Penalty>,
}

impl Node {
    /// Open (or create) the chain and wire the subsystems.
    pub fn new(
        params: ChainParameters,
        genesis: GenesisConfig,
        network: Arc<dyn NetworkSink>,
        keys: Option<NodeKeys>,
        compliance: Arc<dyn ComplianceVerifier>,
        registry: ContractRegistry,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn KeyValueStore> = if params.data_dir.is_empty() {
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(
                RocksDbStore::open(&params.data_dir, RocksDbConfig::default())
                    .context("opening rocksdb")?,
            )
        };
        Self::with_store(params, genesis, store, network, keys, compliance, registry)
    }

    /// Wire the node over an already opened store (restarts share it).
    pub fn with_store(
        params: ChainParameters,
        genesis: GenesisConfig,
        store: Arc<dyn KeyValueStore>,
        network: Arc<dyn NetworkSink>,
        keys: Option<NodeKeys>,
        compliance: Arc<dyn ComplianceVerifier>,
        registry: ContractRegistry,
    ) -> anyhow::Result<Self> {
        params.validate().context("invalid chain parameters")?;

        let blocks = BlockStore::new(store.clone());
        let metadata = MetadataStore::new(store.clone());
        let mut state = StateManager::new(store.clone());

        // Restore from the latest pointer, or build genesis.
        let (tip, genesis_hash) = match metadata.latest_block()? {
            Some(latest_hash) => {
                let tip = blocks
                    .header(&latest_hash)?
                    .context("latest pointer names a missing block")?;
                state.restore().context("restoring flat cache")?;
                state
                    .verify_root(&tip.state_root)
                    .context("restored state does not reproduce the stored root; refusing to run")?;
                let genesis_hash = blocks
                    .hash_by_height(0)?
                    .context("missing genesis block")?;
                info!(height = tip.number, root = %tip.state_root, "state restored");
                (tip, genesis_hash)
            }
            None => {
                let block = genesis.build(&params, &store, &mut state)?;
                (block.header.clone(), block.hash())
            }
        };

        // Epoch bookkeeping: replay boundary seeds up to the tip.
        let mut epoch = EpochManager::genesis(params.clone(), genesis_hash);
        let current_epoch = params.epoch_of(tip.number + 1);
        for e in 1..=current_epoch {
            let boundary = e * params.epoch_length - 1;
            let anchor = blocks
                .hash_by_height(boundary)?
                .context("missing epoch boundary block")?;
            epoch.advance_to(e, &anchor);
        }
        let validators = epoch.build_set(&state, &HashSet::new());
        if validators.is_empty() {
            bail!("no eligible validators at genesis");
        }

        let local_address = keys
            .as_ref()
            .map(|k| derive_address(&k.ed25519.public_key().to_value()));
        let local_index = match (&keys, params.is_validator()) {
            (Some(_), true) => local_address
                .and_then(|addr| validators.by_address(&addr))
                .map(|v| v.index),
            _ => None,
        };
        if params.is_validator() && local_index.is_none() {
            warn!("validator mode requested but this node is not in the active set; running as replica");
        }
        match local_index {
            Some(index) => info!(index, "running in validator mode"),
            None => info!("running as read-only replica"),
        }

        // The engine holds its own copy of the BLS key for vote signing.
        let engine_bls = match local_index {
            Some(_) => keys.as_ref().map(|k| k.bls.clone()),
            None => None,
        };
        let engine = ConsensusEngine::new(
            params.clone(),
            validators,
            epoch.seed(),
            tip.number + 1,
            tip.hash(),
            engine_bls,
            local_index,
        );

        let mut mempool = Mempool::new(
            MempoolConfig {
                capacity: 4096,
                nonce_window: 4,
                tx_ttl: Duration::from_secs(300),
            },
            params.clone(),
        );
        mempool.set_base_fee(next_base_fee_of(&tip, &params));

        let node_id = *Hash::digest(&tip.chain_id.to_le_bytes()).as_bytes();
        let receipts = ReceiptStore::new(store.clone());

        Ok(Self {
            executor: Executor::new(params.clone(), registry, compliance),
            params,
            store,
            state,
            mempool,
            engine,
            epoch,
            blocks,
            receipts,
            metadata,
            network,
            keys,
            node_id,
            tip,
            pending_timeout: None,
            pending_penalties: Vec::new(),
        })
    }

    pub fn tip(&self) -> &BlockHeader {
        &self.tip
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn receipt(&self, tx_hash: &Hash) -> Option<Receipt> {
        self.receipts.receipt(tx_hash).ok().flatten()
    }

    pub fn block_by_height(&self, height: u64) -> Option<Block> {
        self.blocks.block_by_height(height).ok().flatten()
    }

    /// Mempool admission endpoint.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<Admitted, MempoolError> {
        let result = self.mempool.insert(tx, &StateView(&self.state));
        if let Err(err) = &result {
            debug!(%err, "transaction rejected");
        }
        result
    }

    // =========================================================================
    // MAIN LOOP
    // =========================================================================

    /// Drive consensus until the event channel closes or `Shutdown` arrives.
    pub async fn run(mut self, mut events: mpsc::Receiver<NodeEvent>) -> anyhow::Result<()> {
        let mut block_interval =
            tokio::time::interval(Duration::from_millis(self.params.block_time_ms));
        let view_timer = tokio::time::sleep(Duration::from_millis(self.params.block_time_ms * 2));
        tokio::pin!(view_timer);

        let actions = self.engine.start_height(self.tip.number + 1, self.tip.hash());
        self.perform(actions)?;
        if let Some(duration) = self.pending_timeout.take() {
            view_timer.as_mut().reset(tokio::time::Instant::now() + duration);
        }

        loop {
            tokio::select! {
                _ = block_interval.tick() => {
                    self.on_block_timer()?;
                }
                () = &mut view_timer => {
                    let actions = self.engine.on_view_timeout();
                    self.perform(actions)?;
                }
                event = events.recv() => {
                    match event {
                        None | Some(NodeEvent::Shutdown) => {
                            info!("node shutting down");
                            return Ok(());
                        }
                        Some(event) => self.on_event(event)?,
                    }
                }
            }
            if let Some(duration) = self.pending_timeout.take() {
                view_timer.as_mut().reset(tokio::time::Instant::now() + duration);
            }
        }
    }

    fn on_event(&mut self, event: NodeEvent) -> anyhow::Result<()> {
        match event {
            NodeEvent::SubmitTransaction(tx) => {
                let _ = self.submit_transaction(tx);
                Ok(())
            }
            NodeEvent::Envelope(envelope) => self.on_envelope(envelope),
            NodeEvent::Shutdown => Ok(()),
        }
    }

    /// Decode and route one wire message.
    pub fn on_envelope(&mut self, envelope: Envelope) -> anyhow::Result<()> {
        match envelope.msg_type {
            MessageType::ConsensusProposal => match Proposal::decode(&envelope.payload) {
                Ok(proposal) => self.on_remote_proposal(proposal),
                Err(err) => {
                    debug!(%err, "undecodable proposal dropped");
                    Ok(())
                }
            },
            MessageType::ConsensusVote => match Vote::decode(&envelope.payload) {
                Ok(vote) => {
                    match self.engine.on_vote(&vote) {
                        Ok(actions) => self.perform(actions)?,
                        Err(err) => debug!(%err, "vote rejected"),
                    }
                    Ok(())
                }
                Err(err) => {
                    debug!(%err, "undecodable vote dropped");
                    Ok(())
                }
            },
            MessageType::ConsensusViewChange => match ViewChange::decode(&envelope.payload) {
                Ok(vc) => {
                    match self.engine.on_view_change(&vc) {
                        Ok(actions) => self.perform(actions)?,
                        Err(err) => debug!(%err, "view change rejected"),
                    }
                    Ok(())
                }
                Err(err) => {
                    debug!(%err, "undecodable view change dropped");
                    Ok(())
                }
            },
            MessageType::TxPayload => {
                if let Ok(tx) = Transaction::decode(&envelope.payload) {
                    let _ = self.submit_transaction(tx);
                }
                Ok(())
            }
            MessageType::BlockPayload => {
                // Replica path: apply a committed block from a peer.
                if let Ok(block) = Block::decode(&envelope.payload) {
                    self.on_remote_committed_block(block)?;
                }
                Ok(())
            }
            // Mesh management and discovery are the gossip layer's concern.
            _ => Ok(()),
        }
    }

    /// Devnet/test hook: act as if the block timer fired. On a
    /// single-validator chain this proposes, self-votes through both
    /// phases, and commits synchronously.
    pub fn produce_block_now(&mut self) -> anyhow::Result<()> {
        self.on_block_timer()
    }

    fn on_block_timer(&mut self) -> anyhow::Result<()> {
        // The leader proposes when a height is idle; replicas just wait.
        if self.engine.is_local_leader()
            && matches!(self.engine.phase(), bc_06_consensus::Phase::Idle)
        {
            self.propose_now()?;
        }
        self.mempool.evict_expired();
        Ok(())
    }

    fn on_remote_proposal(&mut self, proposal: Proposal) -> anyhow::Result<()> {
        let block = match Block::decode(&proposal.block_data) {
            Ok(block) => block,
            Err(err) => {
                warn!(%err, "proposal carried an undecodable block; requesting view change");
                let actions = self.engine.on_view_timeout();
                return self.perform(actions);
            }
        };
        if let Err(err) = self.pre_validate(&block) {
            warn!(%err, "proposal failed pre-execution; requesting view change");
            let actions = self.engine.on_view_timeout();
            return self.perform(actions);
        }
        match self.engine.on_proposal(&proposal, block) {
            Ok(actions) => self.perform(actions),
            Err(err) => {
                debug!(%err, "proposal rejected");
                Ok(())
            }
        }
    }

    /// Replica path: a block with a commit certificate, applied in height
    /// order only.
    fn on_remote_committed_block(&mut self, block: Block) -> anyhow::Result<()> {
        if block.header.number != self.tip.number + 1 {
            debug!(
                height = block.header.number,
                tip = self.tip.number,
                "out-of-order block ignored"
            );
            return Ok(());
        }
        let Some(certificate) = block.certificate.clone() else {
            debug!("committed block without certificate ignored");
            return Ok(());
        };
        bc_06_consensus::verify_certificate(
            &certificate,
            bc_06_consensus::VotePhase::Commit,
            block.header.number,
            &block.hash(),
            self.engine.validators(),
        )
        .map_err(|err| anyhow::anyhow!("invalid commit certificate: {err}"))?;
        self.commit_block(block)
    }

    // =========================================================================
    // PROPOSAL BUILDING
    // =========================================================================

    fn propose_now(&mut self) -> anyhow::Result<()> {
        let block = match self.engine.prepared_block() {
            // Re-propose the highest prepared block after a view change.
            Some(prepared) => prepared.clone(),
            None => self.build_candidate()?,
        };
        let proposal = match self.engine.make_proposal(&block) {
            Ok(proposal) => proposal,
            Err(err) => {
                debug!(%err, "not proposing");
                return Ok(());
            }
        };
        self.broadcast(MessageType::ConsensusProposal, proposal.encode());
        match self.engine.on_proposal(&proposal, block) {
            Ok(actions) => self.perform(actions),
            Err(err) => {
                error!(%err, "own proposal rejected locally");
                Ok(())
            }
        }
    }

    /// Build a candidate block: select transactions, pre-execute them on a
    /// snapshot, seal the header with the resulting roots, roll back.
    fn build_candidate(&mut self) -> anyhow::Result<Block> {
        let base_fee = next_base_fee_of(&self.tip, &self.params);
        self.mempool.set_base_fee(base_fee);
        let txs = self.mempool.take_for_block(
            &StateView(&self.state),
            self.params.block_gas_limit,
            self.params.max_transactions_per_block,
            self.params.max_block_size_bytes,
        );

        let proposer = self
            .keys
            .as_ref()
            .map(|k| derive_address(&k.ed25519.public_key().to_value()))
            .unwrap_or_default();
        let ctx = BlockContext {
            number: self.tip.number + 1,
            timestamp: now_unix(),
            base_fee,
            proposer,
            gas_limit: self.params.block_gas_limit,
        };

        let snapshot = self.state.snapshot();
        if self.params.is_epoch_boundary(ctx.number) {
            EpochManager::apply_penalties(&mut self.state, &self.pending_penalties);
        }
        let result = self.executor.execute_block(&mut self.state, &ctx, &txs);
        let (receipts, gas_used) = match result {
            Ok(ok) => ok,
            Err(err) => {
                self.state.rollback(snapshot);
                bail!("candidate execution failed: {err}");
            }
        };
        let state_root = self.state.compute_root();
        self.state.rollback(snapshot);

        let header = BlockHeader {
            number: ctx.number,
            parent_hash: self.tip.hash(),
            state_root,
            transactions_root: Block::compute_transactions_root(&txs),
            receipts_root: Block::compute_receipts_root(&receipts),
            timestamp: ctx.timestamp,
            proposer,
            chain_id: self.params.chain_id,
            gas_used,
            gas_limit: self.params.block_gas_limit,
            base_fee,
            protocol_version: self.params.protocol_version,
            extra_data: Vec::new(),
        };
        debug!(number = header.number, txs = txs.len(), gas = gas_used, "candidate built");
        Ok(Block {
            header,
            transactions: txs,
            receipts,
            certificate: None,
        })
    }

    /// Re-execute a proposed block on a snapshot and check every header
    /// commitment before voting for it.
    fn pre_validate(&mut self, block: &Block) -> anyhow::Result<()> {
        let header = &block.header;
        if header.parent_hash != self.tip.hash() {
            bail!("parent mismatch");
        }
        if header.chain_id != self.params.chain_id {
            bail!("chain id mismatch");
        }
        if header.extra_data.len() > self.params.max_extra_data_bytes {
            bail!("oversized extra data");
        }
        let expected_base = next_base_fee_of(&self.tip, &self.params);
        if header.base_fee != expected_base {
            bail!("base fee {} does not follow from parent", header.base_fee);
        }
        if header.transactions_root != Block::compute_transactions_root(&block.transactions) {
            bail!("transactions root mismatch");
        }

        let ctx = BlockContext {
            number: header.number,
            timestamp: header.timestamp,
            base_fee: header.base_fee,
            proposer: header.proposer,
            gas_limit: header.gas_limit,
        };
        let snapshot = self.state.snapshot();
        if self.params.is_epoch_boundary(ctx.number) {
            EpochManager::apply_penalties(&mut self.state, &self.pending_penalties);
        }
        let outcome = (|| -> anyhow::Result<()> {
            let (receipts, gas_used) = self
                .executor
                .execute_block(&mut self.state, &ctx, &block.transactions)?;
            if gas_used != header.gas_used {
                bail!("gas used {} != header {}", gas_used, header.gas_used);
            }
            if Block::compute_receipts_root(&receipts) != header.receipts_root {
                bail!("receipts root mismatch");
            }
            if self.state.compute_root() != header.state_root {
                bail!("state root mismatch");
            }
            Ok(())
        })();
        self.state.rollback(snapshot);
        outcome
    }

    // =========================================================================
    // COMMIT
    // =========================================================================

    fn perform(&mut self, actions: Vec<Action>) -> anyhow::Result<()> {
        for action in actions {
            match action {
                Action::BroadcastVote(vote) => {
                    self.broadcast(MessageType::ConsensusVote, vote.encode());
                }
                Action::BroadcastViewChange(vc) => {
                    self.broadcast(MessageType::ConsensusViewChange, vc.encode());
                }
                Action::ScheduleTimeout(duration) => {
                    self.pending_timeout = Some(duration);
                }
                Action::Propose { .. } => {
                    self.propose_now()?;
                }
                Action::CommitBlock { block, .. } => {
                    self.commit_block(*block)?;
                }
            }
        }
        Ok(())
    }

    /// Final commit: execute for real, flush state, persist block and
    /// receipts in one batch, advance to the next height.
    fn commit_block(&mut self, mut block: Block) -> anyhow::Result<()> {
        let header = block.header.clone();
        let block_hash = header.hash();
        let ctx = BlockContext {
            number: header.number,
            timestamp: header.timestamp,
            base_fee: header.base_fee,
            proposer: header.proposer,
            gas_limit: header.gas_limit,
        };

        if self.params.is_epoch_boundary(header.number) {
            EpochManager::apply_penalties(&mut self.state, &self.pending_penalties);
        }
        let (mut receipts, gas_used) = self
            .executor
            .execute_block(&mut self.state, &ctx, &block.transactions)
            .context("executing committed block")?;
        if gas_used != header.gas_used {
            // A certificate exists for this block; diverging here means our
            // state disagrees with the quorum. Halt rather than fork.
            bail!(
                "committed block {} gas mismatch: {} != {}",
                header.number,
                gas_used,
                header.gas_used
            );
        }

        let mut batch = WriteBatch::new();
        let state_root = self.state.commit(&mut batch)?;
        if state_root != header.state_root {
            bail!(
                "committed block {} state root mismatch: {} != {}",
                header.number,
                state_root,
                header.state_root
            );
        }

        for receipt in &mut receipts {
            receipt.block_hash = block_hash;
        }
        block.receipts = receipts.clone();
        self.blocks.stage_block(&mut batch, &block);
        self.receipts.stage_receipts(&mut batch, &receipts);
        self.metadata.stage_latest_block(&mut batch, &block_hash);
        self.store.commit(batch).context("persisting block")?;

        info!(
            height = header.number,
            hash = %block_hash,
            txs = block.transactions.len(),
            gas = gas_used,
            "block committed"
        );

        self.mempool
            .remove_committed(&block.transactions, &StateView(&self.state));
        self.mempool.set_base_fee(next_base_fee_of(&header, &self.params));
        if self.params.is_epoch_boundary(header.number) {
            // The epoch-start block carried the burns; they are spent.
            self.pending_penalties.clear();
        }
        self.tip = header;

        // Epoch boundary: close the finished epoch and fix the next set
        // before the first height of the new epoch starts. The penalty
        // burns are only staged here; they execute inside that height.
        if self.params.is_epoch_boundary(self.tip.number + 1) {
            let evidence = self.engine.slashing_mut().drain_epoch();
            let outgoing = self.engine.validators().clone();
            let penalties = self.epoch.close_epoch(block_hash, &outgoing, &evidence);

            let snapshot = self.state.snapshot();
            EpochManager::apply_penalties(&mut self.state, &penalties);
            let next_set = self.epoch.build_set(&self.state, &HashSet::new());
            self.state.rollback(snapshot);
            self.pending_penalties = penalties;

            if next_set.is_empty() {
                bail!("validator set empty after epoch rotation");
            }
            self.engine.update_epoch(next_set, self.epoch.seed());
        }

        let actions = self.engine.start_height(self.tip.number + 1, block_hash);
        self.perform(actions)
    }

    fn broadcast(&self, msg_type: MessageType, payload: Vec<u8>) {
        self.network
            .broadcast(Envelope::new(msg_type, self.node_id, now_unix_millis(), payload));
    }
}

/// Base fee of the block after `parent`.
fn next_base_fee_of(parent: &BlockHeader, params: &ChainParameters) -> shared_types::U256 {
    if parent.number == 0 {
        // Block 1 uses the configured genesis base fee directly.
        params.initial_base_fee
    } else {
        fees::next_base_fee(parent.base_fee, parent.gas_used, parent.gas_limit, params)
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn now_unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
