//! # Vote Aggregation
//!
//! Collects one phase's votes for a `(height, view)`, verifying each BLS
//! signature against the active set, rejecting duplicates, and surfacing
//! equivocation (two different block hashes from the same validator) as
//! evidence. At quorum the matching votes aggregate into a certificate:
//! one BLS signature plus the voter bitmap.

use crate::errors::ConsensusError;
use crate::messages::{Vote, VotePhase};
use crate::validators::ValidatorSet;
use shared_crypto::{BlsPublicKey, BlsSignature};
use shared_types::{CommitCertificate, Hash};
use std::collections::HashMap;

/// Per-validator recorded vote.
struct RecordedVote {
    block_hash: Hash,
    signature: BlsSignature,
}

/// Aggregator for one `(height, view, phase)`.
pub struct VoteAggregator {
    number: u64,
    view: u64,
    phase: VotePhase,
    votes: HashMap<u8, RecordedVote>,
}

impl VoteAggregator {
    pub fn new(number: u64, view: u64, phase: VotePhase) -> Self {
        Self {
            number,
            view,
            phase,
            votes: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.votes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    /// Votes recorded for one block hash.
    pub fn votes_for(&self, block_hash: &Hash) -> usize {
        self.votes
            .values()
            .filter(|v| v.block_hash == *block_hash)
            .count()
    }

    /// Verify and record a vote. Returns the certificate once `quorum`
    /// matching votes exist for the vote's block hash.
    ///
    /// Duplicate identical votes error with `DuplicateVote`; a conflicting
    /// vote from the same validator errors with the equivocation evidence
    /// for the slashing pipeline.
    pub fn add_vote(
        &mut self,
        vote: &Vote,
        set: &ValidatorSet,
    ) -> Result<Option<CommitCertificate>, ConsensusError> {
        if vote.number != self.number {
            return Err(ConsensusError::HeightMismatch {
                current_height: self.number,
                msg_height: vote.number,
            });
        }
        if vote.view != self.view {
            return Err(ConsensusError::ViewTooOld {
                current_view: self.view,
                msg_view: vote.view,
            });
        }

        let entry = set
            .by_bls_key(&vote.signer)
            .filter(|v| v.active)
            .ok_or(ConsensusError::UnknownValidator)?;
        let index = entry.index;

        let pubkey = BlsPublicKey::from_value(&vote.signer)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        let signature = BlsSignature::from_value(&vote.signature)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        let message = Vote::signing_message(self.phase, self.number, &vote.block_hash);
        if !pubkey.verify(&message, &signature) {
            return Err(ConsensusError::InvalidSignature);
        }

        if let Some(existing) = self.votes.get(&index) {
            if existing.block_hash == vote.block_hash {
                return Err(ConsensusError::DuplicateVote(index));
            }
            return Err(ConsensusError::EquivocationEvidence {
                validator: index,
                first: existing.block_hash,
                second: vote.block_hash,
            });
        }

        self.votes.insert(
            index,
            RecordedVote {
                block_hash: vote.block_hash,
                signature,
            },
        );

        if self.votes_for(&vote.block_hash) >= set.quorum() {
            return Ok(Some(self.certificate(&vote.block_hash)?));
        }
        Ok(None)
    }

    /// Aggregate the votes matching `block_hash` into one certificate.
    pub fn certificate(&self, block_hash: &Hash) -> Result<CommitCertificate, ConsensusError> {
        let mut bitmap: u64 = 0;
        let mut signatures = Vec::new();
        for (index, vote) in &self.votes {
            if vote.block_hash == *block_hash {
                bitmap |= 1u64 << index;
                signatures.push(vote.signature.clone());
            }
        }
        if signatures.is_empty() {
            return Err(ConsensusError::QuorumNotReached {
                votes: 0,
                quorum: 1,
            });
        }
        let aggregate = BlsSignature::aggregate(&signatures)
            .map_err(|_| ConsensusError::InvalidSignature)?;
        Ok(CommitCertificate {
            signature: aggregate.to_value(),
            bitmap,
        })
    }
}

/// Verify a certificate against the subset of the set's public keys whose
/// bitmap bits are set.
pub fn verify_certificate(
    certificate: &CommitCertificate,
    phase: VotePhase,
    number: u64,
    block_hash: &Hash,
    set: &ValidatorSet,
) -> Result<(), ConsensusError> {
    let mut keys = Vec::new();
    for index in 0..64u8 {
        if certificate.bitmap & (1u64 << index) == 0 {
            continue;
        }
        let entry = set.by_index(index).ok_or(ConsensusError::UnknownValidator)?;
        keys.push(
            BlsPublicKey::from_value(&entry.bls_pubkey)
                .map_err(|_| ConsensusError::InvalidSignature)?,
        );
    }
    if keys.len() < set.quorum() {
        return Err(ConsensusError::QuorumNotReached {
            votes: keys.len(),
            quorum: set.quorum(),
        });
    }
    let signature = BlsSignature::from_value(&certificate.signature)
        .map_err(|_| ConsensusError::InvalidSignature)?;
    let message = Vote::signing_message(phase, number, block_hash);
    if !signature.fast_aggregate_verify(&message, &keys) {
        return Err(ConsensusError::InvalidSignature);
    }
    Ok(())
}
