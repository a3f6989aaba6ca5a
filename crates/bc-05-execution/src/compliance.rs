//! # Compliance Verifier Interface
//!
//! The executor consults a pluggable proof checker before dispatching a
//! transaction. The default implementation allows everything that has no
//! requirements attached; a production implementation verifies Groth16
//! proofs against registered verification keys and checks issuer tiers.
//!
//! Nullifiers are per-block only: the executor resets the set at every
//! block boundary, and cross-block replay is already impossible through the
//! transaction's own `(sender, nonce)`.

use parking_lot::Mutex;
use shared_types::{Address, ComplianceProof, Hash};
use std::collections::HashSet;

/// Why a compliance check failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComplianceError {
    /// A requirement had no proof attached.
    MissingProof,
    /// A proof failed verification.
    InvalidProof(String),
    /// A nullifier was already used inside this block.
    DuplicateNullifier(Hash),
}

/// Verdict of a compliance check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Allowed,
    Failed(ComplianceError),
}

/// One obligation a contract imposes on its callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Requirement {
    /// Proof schema that must be satisfied.
    pub schema_id: u32,
    /// Minimum issuer tier accepted.
    pub min_issuer_tier: u8,
}

/// Pluggable proof checker.
pub trait ComplianceVerifier: Send + Sync {
    /// Check `proofs` against `requirements` at the given block time.
    fn verify_proofs(
        &self,
        proofs: &[ComplianceProof],
        requirements: &[Requirement],
        block_timestamp: i64,
    ) -> Outcome;

    /// Requirements registered for a contract address.
    fn get_requirements(&self, contract: &Address) -> Vec<Requirement>;

    /// Called at every block boundary.
    fn reset_nullifiers(&self);
}

/// Default verifier: no registry, so anything without requirements passes
/// and anything with requirements fails for lack of proof.
#[derive(Default)]
pub struct NoopVerifier;

impl ComplianceVerifier for NoopVerifier {
    fn verify_proofs(
        &self,
        _proofs: &[ComplianceProof],
        requirements: &[Requirement],
        _block_timestamp: i64,
    ) -> Outcome {
        if requirements.is_empty() {
            Outcome::Allowed
        } else {
            Outcome::Failed(ComplianceError::MissingProof)
        }
    }

    fn get_requirements(&self, _contract: &Address) -> Vec<Requirement> {
        Vec::new()
    }

    fn reset_nullifiers(&self) {}
}

/// Per-block nullifier uniqueness. The executor owns one and clears it at
/// each block boundary.
#[derive(Default)]
pub struct NullifierSet {
    seen: Mutex<HashSet<Hash>>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a nullifier; `false` if it was already used this block.
    pub fn insert(&self, nullifier: Hash) -> bool {
        self.seen.lock().insert(nullifier)
    }

    pub fn contains(&self, nullifier: &Hash) -> bool {
        self.seen.lock().contains(nullifier)
    }

    /// Block boundary: forget everything.
    pub fn reset(&self) {
        self.seen.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_allows_without_requirements() {
        let verifier = NoopVerifier;
        assert_eq!(verifier.verify_proofs(&[], &[], 0), Outcome::Allowed);
    }

    #[test]
    fn noop_fails_with_requirements() {
        let verifier = NoopVerifier;
        let requirement = Requirement {
            schema_id: 1,
            min_issuer_tier: 0,
        };
        assert_eq!(
            verifier.verify_proofs(&[], &[requirement], 0),
            Outcome::Failed(ComplianceError::MissingProof)
        );
    }

    #[test]
    fn nullifier_set_detects_reuse_until_reset() {
        let set = NullifierSet::new();
        let n = Hash::digest(b"n");
        assert!(set.insert(n));
        assert!(!set.insert(n));
        set.reset();
        assert!(set.insert(n));
    }
}
