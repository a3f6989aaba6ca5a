//! Storage error types.
//!
//! Backend faults are fatal to the node: a store that cannot read or commit
//! risks diverging state, so callers halt rather than continue.

use thiserror::Error;

/// Failures across the storage subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A write batch was consumed without being committed.
    #[error("write batch dropped with {0} uncommitted operations")]
    UncommittedBatch(usize),

    /// A trie node referenced by hash was absent from `trie_nodes`.
    #[error("missing trie node {0}")]
    MissingTrieNode(String),

    /// A stored value failed to decode.
    #[error("corrupted value under {context}: {detail}")]
    Corrupted {
        context: &'static str,
        detail: String,
    },

    /// The underlying key-value backend failed.
    #[error("storage backend: {0}")]
    Backend(String),
}
