//! # State Management Subsystem
//!
//! World state lives in two coupled stores:
//!
//! - A **content-addressed Merkle Patricia Trie**: every node is encoded and
//!   keyed by its BLAKE3 hash in the `trie_nodes` column family, so unchanged
//!   subtrees are shared across versions for free.
//! - A **flat state cache**: in-memory `address → Account` and
//!   `(address, slot) → bytes` maps used by the executor on the hot path,
//!   with journaled per-transaction snapshots.
//!
//! On block commit the cache flushes atomically: flat rows, trie nodes, and
//! the new root all land in one write batch.
//!
//! ## Invariant
//!
//! `block.state_root` equals the trie root computed from the flat cache
//! after executing the block's transactions against the parent state. The
//! node halts on restart if the restored cache does not reproduce the
//! stored root.

pub mod cache;
pub mod errors;
pub mod nibbles;
pub mod node;
pub mod state;
pub mod trie;

pub use cache::{FlatState, Snapshot};
pub use errors::StateError;
pub use nibbles::Nibbles;
pub use node::TrieNode;
pub use state::StateManager;
pub use trie::{verify_proof, Trie};
