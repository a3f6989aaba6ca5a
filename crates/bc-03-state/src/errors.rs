//! State error types.

use bc_02_storage::StorageError;
use shared_types::{CodecError, Hash};
use thiserror::Error;

/// Failures in the state subsystem.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StateError {
    /// The restored cache does not reproduce the stored root. Fatal: the
    /// node halts rather than run on diverged state.
    #[error("state root mismatch: expected {expected}, computed {actual}")]
    RootMismatch { expected: Hash, actual: Hash },

    /// A node referenced by hash is absent from `trie_nodes`.
    #[error("missing trie node {0}")]
    MissingTrieNode(Hash),

    /// A stored account or node failed to decode.
    #[error("decode failure in {context}: {source}")]
    Decode {
        context: &'static str,
        source: CodecError,
    },

    /// A key in the `state` family matched neither layout prefix.
    #[error("unrecognized state key of {0} bytes")]
    MalformedStateKey(usize),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
