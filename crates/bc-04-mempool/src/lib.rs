//! # Mempool Subsystem
//!
//! A validating, fingerprint-deduplicated, per-sender-ordered transaction
//! queue. Admission runs the full rule chain (structural checks, nonce
//! window, fee coherence, balance cover) and each rule fails with its own
//! error kind so callers can tell a replay from an underfunded sender.
//!
//! Within a sender, transactions are strictly nonce-ordered; across senders
//! the ready set is ranked by effective tip per gas under the current base
//! fee. Duplicates are accepted idempotently. At capacity, the lowest-tip
//! transaction of the largest sender queue is evicted first.

pub mod admission;
pub mod errors;
pub mod pool;

pub use admission::AccountView;
pub use errors::MempoolError;
pub use pool::{Admitted, Mempool, MempoolConfig};
