//! # Consensus Messages
//!
//! The three gossiped message types and their BLS signing preimages. Every
//! preimage is domain-separated so a prepare vote can never be replayed as
//! a commit vote or a view change.

use shared_types::{
    BlsPub, BlsSig, CodecError, Decodable, Decoder, Encodable, Encoder, Hash,
};

const VOTE_DOMAIN: &[u8] = b"BSLT_VOTE_V1:";
const VIEW_CHANGE_DOMAIN: &[u8] = b"BSLT_VIEWCHANGE_V1:";

/// Voting phase inside a height.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VotePhase {
    Prepare = 0,
    Commit = 1,
}

impl VotePhase {
    pub fn from_u8(tag: u8) -> Result<Self, CodecError> {
        match tag {
            0 => Ok(Self::Prepare),
            1 => Ok(Self::Commit),
            tag => Err(CodecError::InvalidTag {
                tag,
                context: "VotePhase",
            }),
        }
    }
}

/// Leader's block proposal for `(number, view)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Proposal {
    pub view: u64,
    pub number: u64,
    pub block_hash: Hash,
    /// Canonical block bytes; replicas decode and pre-execute them.
    pub block_data: Vec<u8>,
    /// Leader's BLS signature over the block hash.
    pub proposer_sig: BlsSig,
}

impl Encodable for Proposal {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u64(self.view);
        enc.put_u64(self.number);
        enc.put_hash(&self.block_hash);
        enc.put_bytes(&self.block_data);
        self.proposer_sig.encode_into(enc);
    }
}

impl Decodable for Proposal {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            view: dec.get_u64()?,
            number: dec.get_u64()?,
            block_hash: dec.get_hash()?,
            block_data: dec.get_bytes()?,
            proposer_sig: BlsSig::decode_from(dec)?,
        })
    }
}

/// A validator's vote for a block at one phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Vote {
    pub view: u64,
    pub number: u64,
    pub block_hash: Hash,
    pub phase: VotePhase,
    pub signature: BlsSig,
    pub signer: BlsPub,
}

impl Vote {
    /// The BLS signing preimage shared by every voter on the same
    /// `(phase, number, block_hash)`; identical preimages are what make
    /// the signatures aggregatable. The view stays out of the preimage so
    /// a commit certificate verifies for anyone holding just the block;
    /// aggregation itself still happens per `(height, view)`.
    pub fn signing_message(phase: VotePhase, number: u64, block_hash: &Hash) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(VOTE_DOMAIN.len() + 41);
        enc.put_fixed(VOTE_DOMAIN);
        enc.put_u8(phase as u8);
        enc.put_u64(number);
        enc.put_hash(block_hash);
        enc.finish()
    }
}

impl Encodable for Vote {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u64(self.view);
        enc.put_u64(self.number);
        enc.put_hash(&self.block_hash);
        enc.put_u8(self.phase as u8);
        self.signature.encode_into(enc);
        self.signer.encode_into(enc);
    }
}

impl Decodable for Vote {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            view: dec.get_u64()?,
            number: dec.get_u64()?,
            block_hash: dec.get_hash()?,
            phase: VotePhase::from_u8(dec.get_u8()?)?,
            signature: BlsSig::decode_from(dec)?,
            signer: BlsPub::decode_from(dec)?,
        })
    }
}

/// Request to abandon the current view after a timeout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewChange {
    pub number: u64,
    pub current_view: u64,
    pub proposed_view: u64,
    pub signature: BlsSig,
    pub signer: BlsPub,
}

impl ViewChange {
    pub fn signing_message(number: u64, current_view: u64, proposed_view: u64) -> Vec<u8> {
        let mut enc = Encoder::with_capacity(VIEW_CHANGE_DOMAIN.len() + 24);
        enc.put_fixed(VIEW_CHANGE_DOMAIN);
        enc.put_u64(number);
        enc.put_u64(current_view);
        enc.put_u64(proposed_view);
        enc.finish()
    }
}

impl Encodable for ViewChange {
    fn encode_into(&self, enc: &mut Encoder) {
        enc.put_u64(self.number);
        enc.put_u64(self.current_view);
        enc.put_u64(self.proposed_view);
        self.signature.encode_into(enc);
        self.signer.encode_into(enc);
    }
}

impl Decodable for ViewChange {
    fn decode_from(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            number: dec.get_u64()?,
            current_view: dec.get_u64()?,
            proposed_view: dec.get_u64()?,
            signature: BlsSig::decode_from(dec)?,
            signer: BlsPub::decode_from(dec)?,
        })
    }
}
