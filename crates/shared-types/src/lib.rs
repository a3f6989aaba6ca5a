//! # Shared Types Crate
//!
//! This crate contains the primitive value types, the deterministic binary
//! codec, and all cross-subsystem chain entities.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: All cross-subsystem types are defined here.
//! - **Canonical Encoding**: Every structured type has exactly one binary
//!   encoding, produced by [`codec::Encoder`]; decode-then-encode is
//!   byte-identical (round-trip law).
//! - **No Ambient Hashing**: Entity hashes are computed over the canonical
//!   encoding only, never over in-memory layouts.

pub mod codec;
pub mod entities;
pub mod envelope;
pub mod fees;
pub mod params;
pub mod primitives;

pub use codec::{CodecError, Decodable, Decoder, Encodable, Encoder};
pub use entities::*;
pub use envelope::{Envelope, MessageType};
pub use params::ChainParameters;
pub use primitives::*;
