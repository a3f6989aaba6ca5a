//! # Basalt Node Runtime
//!
//! Wires the subsystems into a running node: persistent store, state
//! manager, mempool, executor, and the consensus engine, driven by the
//! block-production and view timers. On startup the node either seeds a
//! genesis state or restores the flat cache from disk and refuses to run
//! unless the recomputed trie root matches the stored tip.
//!
//! Networking is a port: the node hands outbound envelopes to a
//! [`NetworkSink`](node::NetworkSink) and receives inbound ones through its
//! event channel. Validator mode (a configured `validator_index ≥ 0` plus
//! keys) proposes and votes; otherwise the node replays committed blocks as
//! a read-only replica.

pub mod genesis;
pub mod node;

pub use genesis::{GenesisConfig, GenesisValidator};
pub use node::{Node, NodeEvent, NodeKeys, NetworkSink, NullNetwork};
