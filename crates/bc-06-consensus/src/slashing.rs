//! # Slashing
//!
//! Equivocation detection and bookkeeping. Evidence is any pair of valid
//! votes from one validator for the same `(height, view, phase)` with
//! different block hashes; the penalty removes the stake and deactivates
//! the validator at the next epoch boundary.

use crate::messages::VotePhase;
use shared_types::Hash;
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// Proof of a double vote.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EquivocationEvidence {
    pub validator: u8,
    pub number: u64,
    pub view: u64,
    pub phase: VotePhase,
    pub first_hash: Hash,
    pub second_hash: Hash,
}

/// Vote history and pending slashings for the current epoch.
#[derive(Default)]
pub struct SlashingDb {
    /// `(validator, height, view, phase)` → first block hash seen.
    votes: HashMap<(u8, u64, u64, u8), Hash>,
    /// Validators with recorded evidence this epoch.
    pending: Vec<EquivocationEvidence>,
    slashed: HashSet<u8>,
}

impl SlashingDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a vote; returns evidence if it conflicts with an earlier one.
    pub fn observe_vote(
        &mut self,
        validator: u8,
        number: u64,
        view: u64,
        phase: VotePhase,
        block_hash: Hash,
    ) -> Option<EquivocationEvidence> {
        let key = (validator, number, view, phase as u8);
        match self.votes.get(&key) {
            None => {
                self.votes.insert(key, block_hash);
                None
            }
            Some(first) if *first == block_hash => None,
            Some(first) => {
                let evidence = EquivocationEvidence {
                    validator,
                    number,
                    view,
                    phase,
                    first_hash: *first,
                    second_hash: block_hash,
                };
                self.record(evidence.clone());
                Some(evidence)
            }
        }
    }

    /// File evidence received from the network or the aggregator.
    pub fn record(&mut self, evidence: EquivocationEvidence) {
        if self.slashed.insert(evidence.validator) {
            warn!(
                validator = evidence.validator,
                height = evidence.number,
                "equivocation evidence recorded; validator will be slashed at the epoch boundary"
            );
            self.pending.push(evidence);
        }
    }

    pub fn is_slashed(&self, validator: u8) -> bool {
        self.slashed.contains(&validator)
    }

    /// Evidence accumulated this epoch.
    pub fn pending(&self) -> &[EquivocationEvidence] {
        &self.pending
    }

    /// Drain at the epoch boundary after penalties apply.
    pub fn drain_epoch(&mut self) -> Vec<EquivocationEvidence> {
        self.votes.clear();
        self.slashed.clear();
        std::mem::take(&mut self.pending)
    }
}
