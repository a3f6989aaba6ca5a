//! Consensus error types.

use shared_types::Hash;
use thiserror::Error;

/// Failures while processing consensus messages.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("proposal for height {height} view {view} is not from the expected leader")]
    ProposalFromWrongLeader { height: u64, view: u64 },

    #[error("proposal parent {actual} does not match local tip {expected}")]
    ParentMismatch { expected: Hash, actual: Hash },

    #[error("message for view {msg_view} is older than current view {current_view}")]
    ViewTooOld { current_view: u64, msg_view: u64 },

    #[error("message for height {msg_height} does not match current height {current_height}")]
    HeightMismatch { current_height: u64, msg_height: u64 },

    #[error("duplicate vote from validator {0}")]
    DuplicateVote(u8),

    #[error("equivocation: validator {validator} voted {first} and {second} at the same phase")]
    EquivocationEvidence {
        validator: u8,
        first: Hash,
        second: Hash,
    },

    #[error("quorum not reached: {votes} of {quorum} votes")]
    QuorumNotReached { votes: usize, quorum: usize },

    #[error("signer is not in the active validator set")]
    UnknownValidator,

    #[error("invalid BLS signature on consensus message")]
    InvalidSignature,

    #[error("block failed decoding or pre-execution")]
    InvalidBlock,

    #[error("this node is not a validator in the current epoch")]
    NotAValidator,
}
