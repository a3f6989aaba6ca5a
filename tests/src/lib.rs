//! # Basalt Test Suite
//!
//! Cross-subsystem integration tests: the end-to-end scenarios that no
//! single crate can check alone (mempool → consensus → executor → storage
//! round trips, crash recovery, multi-validator commits).

pub mod common;

#[cfg(test)]
mod integration;
