//! # Core Domain Entities
//!
//! Chain entities shared by every subsystem, with their canonical binary
//! encodings.
//!
//! ## Clusters
//!
//! - **Chain**: `Transaction`, `BlockHeader`, `Block`, `Receipt`, `Log`
//! - **State**: `Account`, `AccountKind`
//! - **Consensus**: `ValidatorEntry`, `CommitCertificate`
//! - **Compliance**: `ComplianceProof`
//!
//! Entity hashes are BLAKE3 over the canonical encoding. A transaction hash
//! covers every field except the signature; a block hash covers the header.

use crate::codec::{CodecError, Decodable, Decoder, Encodable, Encoder};
use crate::primitives::{Address, BlsPub, BlsSig, Ed25519Pub, Ed25519Sig, Hash, U256};
use serde::{Deserialize, Serialize};

/// Root hash of an empty trie. Also the `storage_root` of every
/// externally-owned account.
pub const EMPTY_TRIE_ROOT: Hash = Hash::zero();

/// Upper bound on `BlockHeader::extra_data`.
pub const MAX_EXTRA_DATA_BYTES: usize = 32;

// =============================================================================
// CLUSTER: STATE
// =============================================================================

/// Discriminates the three account classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccountKind {
    /// Externally-owned account controlled by an Ed25519 key.
    Eoa = 0,
    /// Deployed contract with code and storage.
    Contract = 1,
    /// Protocol-owned contract at a well-known address (staking, etc.).
    System = 2,
}

impl AccountKind {
    pub fn from_u8(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::Eoa),
            1 => Ok(Self::Contract),
            2 => Ok(Self::System),
            tag => Err(CodecError::InvalidTag {
                tag,
                context: "AccountKind",
            }),
        }
    }
}

/// World-state entry for one address.
///
/// Encodes to exactly 137 bytes:
/// `nonce(8) ‖ balance(32) ‖ storage_root(32) ‖ code_hash(32) ‖ kind(1) ‖
/// compliance_hash(32)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub storage_root: Hash,
    pub code_hash: Hash,
    pub kind: AccountKind,
    pub compliance_hash: Hash,
}

impl Account {
    /// Encoded width in the `state` column family.
    pub const ENCODED_LEN: usize = 137;

    /// Fresh externally-owned account with the given balance.
    pub fn new_eoa(balance: U256) -> Self {
        Self {
            nonce: 0,
            balance,
            storage_root: EMPTY_TRIE_ROOT,
            code_hash: Hash::zero(),
            kind: AccountKind::Eoa,
            compliance_hash: Hash::zero(),
        }
    }

    /// Fresh contract account holding the given code hash.
    pub fn new_contract(code_hash: Hash) -> Self {
        Self {
            nonce: 0,
            balance: U256::zero(),
            storage_root: EMPTY_TRIE_ROOT,
            code_hash,
            kind: AccountKind::Contract,
            compliance_hash: Hash::zero(),
        }
    }

    pub fn is_contract(&self) -> bool {
        matches!(self.kind, AccountKind::Contract | AccountKind::System)
    }
}

impl Default for Account {
    fn default() -> Self {
        Self::new_eoa(U256::zero())
    }
}

impl Encodable for Account {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u64(self.nonce);
        enc.put_u256(&self.balance);
        enc.put_hash(&self.storage_root);
        enc.put_hash(&self.code_hash);
        enc.put_u8(self.kind as u8);
        enc.put_hash(&self.compliance_hash);
    }
}

impl Decodable for Account {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            nonce: dec.get_u64()?,
            balance: dec.get_u256()?,
            storage_root: dec.get_hash()?,
            code_hash: dec.get_hash()?,
            kind: AccountKind::from_u8(dec.get_u8()?)?,
            compliance_hash: dec.get_hash()?,
        })
    }
}

// =============================================================================
// CLUSTER: TRANSACTIONS
// =============================================================================

/// Transaction kinds. The tag byte leads the canonical encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxKind {
    Transfer = 0,
    ContractDeploy = 1,
    ContractCall = 2,
    StakeDeposit = 3,
    StakeWithdraw = 4,
    ValidatorRegister = 5,
}

impl TxKind {
    pub fn from_u8(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::Transfer),
            1 => Ok(Self::ContractDeploy),
            2 => Ok(Self::ContractCall),
            3 => Ok(Self::StakeDeposit),
            4 => Ok(Self::StakeWithdraw),
            5 => Ok(Self::ValidatorRegister),
            tag => Err(CodecError::InvalidTag {
                tag,
                context: "TxKind",
            }),
        }
    }
}

/// A zero-knowledge compliance proof attached to a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceProof {
    /// Identifies the proof schema and its registered verification key.
    pub schema_id: u32,
    /// Per-block uniqueness token.
    pub nullifier: Hash,
    /// Opaque proof bytes consumed by the verifier.
    pub payload: Vec<u8>,
}

impl Encodable for ComplianceProof {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u32(self.schema_id);
        enc.put_hash(&self.nullifier);
        enc.put_bytes(&self.payload);
    }
}

impl Decodable for ComplianceProof {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            schema_id: dec.get_u32()?,
            nullifier: dec.get_hash()?,
            payload: dec.get_bytes()?,
        })
    }
}

/// A signed transaction.
///
/// Fee fields support two modes: legacy pricing reads `gas_price`; dynamic
/// pricing reads `max_fee_per_gas`/`max_priority_fee_per_gas` and ignores
/// `gas_price`. A transaction is dynamic iff `max_fee_per_gas` is non-zero.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub kind: TxKind,
    pub nonce: u64,
    pub sender: Address,
    pub to: Address,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub data: Vec<u8>,
    pub priority: u8,
    pub chain_id: u32,
    pub compliance_proofs: Vec<ComplianceProof>,
    pub signature: Ed25519Sig,
    pub sender_pubkey: Ed25519Pub,
}

impl Transaction {
    /// Dynamic-fee transactions carry a non-zero `max_fee_per_gas`.
    pub fn is_legacy(&self) -> bool {
        self.max_fee_per_gas.is_zero()
    }

    /// The canonical encoding of every field except the signature. This is
    /// both the signing preimage and the hash preimage.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(256 + self.data.len());
        self.encode_unsigned(&mut enc);
        enc.finish()
    }

    /// Transaction hash: BLAKE3 over [`Self::signing_bytes`].
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.signing_bytes())
    }

    /// Price actually charged per gas unit under the given base fee.
    pub fn effective_gas_price(&self, base_fee: U256) -> U256 {
        if self.is_legacy() {
            self.gas_price
        } else {
            let tip_capped = base_fee.saturating_add(self.max_priority_fee_per_gas);
            tip_capped.min(self.max_fee_per_gas)
        }
    }

    /// Portion of the effective price above the base fee, paid to the
    /// proposer. Zero when the effective price does not clear the base fee.
    pub fn effective_tip_per_gas(&self, base_fee: U256) -> U256 {
        self.effective_gas_price(base_fee).saturating_sub(base_fee)
    }

    /// Worst-case cost for admission: `gas_limit · price + value` where the
    /// price is the fee cap (legacy `gas_price` or dynamic `max_fee`).
    pub fn max_cost(&self) -> U256 {
        let cap = if self.is_legacy() {
            self.gas_price
        } else {
            self.max_fee_per_gas
        };
        cap.saturating_mul(U256::from(self.gas_limit))
            .saturating_add(self.value)
    }

    fn encode_unsigned(&self, enc: &mut Encoder) {
        enc.put_u8(self.kind as u8);
        enc.put_u64(self.nonce);
        enc.put_address(&self.sender);
        enc.put_address(&self.to);
        enc.put_u256(&self.value);
        enc.put_u64(self.gas_limit);
        enc.put_u256(&self.gas_price);
        enc.put_u256(&self.max_fee_per_gas);
        enc.put_u256(&self.max_priority_fee_per_gas);
        enc.put_bytes(&self.data);
        enc.put_u8(self.priority);
        enc.put_u32(self.chain_id);
        enc.put_uvarint(self.compliance_proofs.len() as u64);
        for proof in &self.compliance_proofs {
            proof.encode_into(enc);
        }
        self.sender_pubkey.encode_into(enc);
    }
}

impl Encodable for Transaction {
    fn encode_into(&self, enc: &mut Encoder) {
        self.encode_unsigned(enc);
        self.signature.encode_into(enc);
    }
}

impl Decodable for Transaction {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let kind = TxKind::from_u8(dec.get_u8()?)?;
        let nonce = dec.get_u64()?;
        let sender = dec.get_address()?;
        let to = dec.get_address()?;
        let value = dec.get_u256()?;
        let gas_limit = dec.get_u64()?;
        let gas_price = dec.get_u256()?;
        let max_fee_per_gas = dec.get_u256()?;
        let max_priority_fee_per_gas = dec.get_u256()?;
        let data = dec.get_bytes()?;
        let priority = dec.get_u8()?;
        let chain_id = dec.get_u32()?;
        let proof_count = dec.get_uvarint()?;
        let mut compliance_proofs = Vec::with_capacity(proof_count.min(64) as usize);
        for _ in 0..proof_count {
            compliance_proofs.push(ComplianceProof::decode_from(dec)?);
        }
        let sender_pubkey = Ed25519Pub::decode_from(dec)?;
        let signature = Ed25519Sig::decode_from(dec)?;
        Ok(Self {
            kind,
            nonce,
            sender,
            to,
            value,
            gas_limit,
            gas_price,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            data,
            priority,
            chain_id,
            compliance_proofs,
            signature,
            sender_pubkey,
        })
    }
}

// =============================================================================
// CLUSTER: RECEIPTS
// =============================================================================

/// Event log emitted during contract execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub contract: Address,
    pub event_sig: Hash,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

impl Encodable for Log {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_address(&self.contract);
        enc.put_hash(&self.event_sig);
        enc.put_uvarint(self.topics.len() as u64);
        for topic in &self.topics {
            enc.put_hash(topic);
        }
        enc.put_bytes(&self.data);
    }
}

impl Decodable for Log {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let contract = dec.get_address()?;
        let event_sig = dec.get_hash()?;
        let topic_count = dec.get_uvarint()?;
        let mut topics = Vec::with_capacity(topic_count.min(64) as usize);
        for _ in 0..topic_count {
            topics.push(dec.get_hash()?);
        }
        Ok(Self {
            contract,
            event_sig,
            topics,
            data: dec.get_bytes()?,
        })
    }
}

/// Execution outcome for one transaction in one block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: Hash,
    pub block_hash: Hash,
    pub block_number: u64,
    pub tx_index: u32,
    pub from: Address,
    pub to: Address,
    pub gas_used: u64,
    pub success: bool,
    /// Zero on success; otherwise one of the executor's error codes.
    pub error_code: u16,
    pub post_state_root: Hash,
    pub effective_gas_price: U256,
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Hash of the canonical encoding, used as a receipts-root leaf.
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.encode())
    }
}

impl Encodable for Receipt {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_hash(&self.tx_hash);
        enc.put_hash(&self.block_hash);
        enc.put_u64(self.block_number);
        enc.put_u32(self.tx_index);
        enc.put_address(&self.from);
        enc.put_address(&self.to);
        enc.put_u64(self.gas_used);
        enc.put_u8(u8::from(self.success));
        enc.put_u16(self.error_code);
        enc.put_hash(&self.post_state_root);
        enc.put_u256(&self.effective_gas_price);
        enc.put_uvarint(self.logs.len() as u64);
        for log in &self.logs {
            log.encode_into(enc);
        }
    }
}

impl Decodable for Receipt {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let tx_hash = dec.get_hash()?;
        let block_hash = dec.get_hash()?;
        let block_number = dec.get_u64()?;
        let tx_index = dec.get_u32()?;
        let from = dec.get_address()?;
        let to = dec.get_address()?;
        let gas_used = dec.get_u64()?;
        let success = match dec.get_u8()? {
            0 => false,
            1 => true,
            tag => {
                return Err(CodecError::InvalidTag {
                    tag,
                    context: "Receipt.success",
                })
            }
        };
        let error_code = dec.get_u16()?;
        let post_state_root = dec.get_hash()?;
        let effective_gas_price = dec.get_u256()?;
        let log_count = dec.get_uvarint()?;
        let mut logs = Vec::with_capacity(log_count.min(64) as usize);
        for _ in 0..log_count {
            logs.push(Log::decode_from(dec)?);
        }
        Ok(Self {
            tx_hash,
            block_hash,
            block_number,
            tx_index,
            from,
            to,
            gas_used,
            success,
            error_code,
            post_state_root,
            effective_gas_price,
            logs,
        })
    }
}

// =============================================================================
// CLUSTER: BLOCKS
// =============================================================================

/// Block header. The block hash is BLAKE3 over this encoding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Hash,
    pub state_root: Hash,
    pub transactions_root: Hash,
    pub receipts_root: Hash,
    pub timestamp: i64,
    pub proposer: Address,
    pub chain_id: u32,
    pub gas_used: u64,
    pub gas_limit: u64,
    pub base_fee: U256,
    pub protocol_version: u32,
    /// Free-form proposer bytes, at most [`MAX_EXTRA_DATA_BYTES`].
    pub extra_data: Vec<u8>,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash {
        Hash::digest(&self.encode())
    }
}

impl Encodable for BlockHeader {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u64(self.number);
        enc.put_hash(&self.parent_hash);
        enc.put_hash(&self.state_root);
        enc.put_hash(&self.transactions_root);
        enc.put_hash(&self.receipts_root);
        enc.put_i64(self.timestamp);
        enc.put_address(&self.proposer);
        enc.put_u32(self.chain_id);
        enc.put_u64(self.gas_used);
        enc.put_u64(self.gas_limit);
        enc.put_u256(&self.base_fee);
        enc.put_u32(self.protocol_version);
        enc.put_bytes(&self.extra_data);
    }
}

impl Decodable for BlockHeader {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let header = Self {
            number: dec.get_u64()?,
            parent_hash: dec.get_hash()?,
            state_root: dec.get_hash()?,
            transactions_root: dec.get_hash()?,
            receipts_root: dec.get_hash()?,
            timestamp: dec.get_i64()?,
            proposer: dec.get_address()?,
            chain_id: dec.get_u32()?,
            gas_used: dec.get_u64()?,
            gas_limit: dec.get_u64()?,
            base_fee: dec.get_u256()?,
            protocol_version: dec.get_u32()?,
            extra_data: dec.get_bytes()?,
        };
        if header.extra_data.len() > MAX_EXTRA_DATA_BYTES {
            return Err(CodecError::OversizedInput {
                declared: header.extra_data.len() as u64,
                limit: MAX_EXTRA_DATA_BYTES as u64,
            });
        }
        Ok(header)
    }
}

/// Aggregated BLS commit signature plus the voter bitmap (bit per validator
/// index, so the active set is capped at 64).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCertificate {
    pub signature: BlsSig,
    pub bitmap: u64,
}

impl CommitCertificate {
    /// Number of voters recorded in the bitmap.
    pub fn voter_count(&self) -> u32 {
        self.bitmap.count_ones()
    }

    /// True if the validator at `index` signed.
    pub fn has_voter(&self, index: u8) -> bool {
        index < 64 && self.bitmap & (1u64 << index) != 0
    }
}

impl Encodable for CommitCertificate {
    fn encode_into(&self, enc: &mut Encoder) {
        self.signature.encode_into(enc);
        enc.put_u64(self.bitmap);
    }
}

impl Decodable for CommitCertificate {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            signature: BlsSig::decode_from(dec)?,
            bitmap: dec.get_u64()?,
        })
    }
}

/// A full block: header, ordered transactions, their receipts once executed,
/// and the commit certificate once finalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub receipts: Vec<Receipt>,
    pub certificate: Option<CommitCertificate>,
}

impl Block {
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Binary Merkle root over the transaction hashes.
    pub fn compute_transactions_root(txs: &[Transaction]) -> Hash {
        merkle_root(&txs.iter().map(Transaction::hash).collect::<Vec<_>>())
    }

    /// Binary Merkle root over the receipt hashes.
    pub fn compute_receipts_root(receipts: &[Receipt]) -> Hash {
        merkle_root(&receipts.iter().map(Receipt::hash).collect::<Vec<_>>())
    }
}

impl Encodable for Block {
    fn encode_into(&self, enc: &mut Encoder) {
        self.header.encode_into(enc);
        enc.put_uvarint(self.transactions.len() as u64);
        for tx in &self.transactions {
            tx.encode_into(enc);
        }
        enc.put_uvarint(self.receipts.len() as u64);
        for receipt in &self.receipts {
            receipt.encode_into(enc);
        }
        match &self.certificate {
            None => enc.put_u8(0),
            Some(cert) => {
                enc.put_u8(1);
                cert.encode_into(enc);
            }
        }
    }
}

impl Decodable for Block {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let header = BlockHeader::decode_from(dec)?;
        let tx_count = dec.get_uvarint()?;
        let mut transactions = Vec::with_capacity(tx_count.min(1024) as usize);
        for _ in 0..tx_count {
            transactions.push(Transaction::decode_from(dec)?);
        }
        let receipt_count = dec.get_uvarint()?;
        let mut receipts = Vec::with_capacity(receipt_count.min(1024) as usize);
        for _ in 0..receipt_count {
            receipts.push(Receipt::decode_from(dec)?);
        }
        let certificate = match dec.get_u8()? {
            0 => None,
            1 => Some(CommitCertificate::decode_from(dec)?),
            tag => {
                return Err(CodecError::InvalidTag {
                    tag,
                    context: "Block.certificate",
                })
            }
        };
        Ok(Self {
            header,
            transactions,
            receipts,
            certificate,
        })
    }
}

// =============================================================================
// CLUSTER: VALIDATORS
// =============================================================================

/// One member of an epoch's validator set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorEntry {
    pub address: Address,
    pub ed25519_pubkey: Ed25519Pub,
    pub bls_pubkey: BlsPub,
    pub stake: U256,
    /// Position in the commit bitmap, `0..validator_set_size`.
    pub index: u8,
    pub active: bool,
    /// Commit-bitmap appearances this epoch, for inactivity accounting.
    pub signed_blocks_in_epoch: u32,
}

impl Encodable for ValidatorEntry {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_address(&self.address);
        self.ed25519_pubkey.encode_into(enc);
        self.bls_pubkey.encode_into(enc);
        enc.put_u256(&self.stake);
        enc.put_u8(self.index);
        enc.put_u8(u8::from(self.active));
        enc.put_u32(self.signed_blocks_in_epoch);
    }
}

impl Decodable for ValidatorEntry {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            address: dec.get_address()?,
            ed25519_pubkey: Ed25519Pub::decode_from(dec)?,
            bls_pubkey: BlsPub::decode_from(dec)?,
            stake: dec.get_u256()?,
            index: dec.get_u8()?,
            active: dec.get_u8()? != 0,
            signed_blocks_in_epoch: dec.get_u32()?,
        })
    }
}

// =============================================================================
// MERKLE
// =============================================================================

/// Binary Merkle root over leaf hashes: pairs are combined with
/// `BLAKE3(left ‖ right)`, odd tails are promoted unchanged, and the empty
/// list roots to [`Hash::zero`].
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::zero();
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            if pair.len() == 2 {
                let mut preimage = [0u8; 64];
                preimage[..32].copy_from_slice(pair[0].as_bytes());
                preimage[32..].copy_from_slice(pair[1].as_bytes());
                next.push(Hash::digest(&preimage));
            } else {
                next.push(pair[0]);
            }
        }
        level = next;
    }
    level[0]
}
