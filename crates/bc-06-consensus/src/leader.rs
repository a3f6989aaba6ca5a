//! # Leader Schedule
//!
//! Stake-weighted deterministic rotation. For `(height, view)` the seed
//! hash `BLAKE3(epoch_seed ‖ height ‖ view)` is reduced onto the cumulative
//! stake line of the active set; the validator whose interval contains the
//! point leads. Every replica derives the same leader with no communication,
//! and a view change re-rolls the draw.

use crate::validators::ValidatorSet;
use shared_types::{Encoder, Hash, U256};

/// Bitmap index of the leader for `(height, view)`, or `None` for an empty
/// active set.
pub fn leader_index(epoch_seed: &Hash, height: u64, view: u64, set: &ValidatorSet) -> Option<u8> {
    let total = set.total_stake();
    if total.is_zero() {
        // Degenerate stake distribution: fall back to round-robin over the
        // active members.
        let active: Vec<u8> = set.active().map(|v| v.index).collect();
        if active.is_empty() {
            return None;
        }
        let slot = (height.wrapping_add(view) % active.len() as u64) as usize;
        return Some(active[slot]);
    }

    let mut enc = Encoder::with_capacity(48);
    enc.put_hash(epoch_seed);
    enc.put_u64(height);
    enc.put_u64(view);
    let draw = Hash::digest(&enc.finish());
    let point = U256::from_little_endian(draw.as_bytes()) % total;

    let mut cumulative = U256::zero();
    for entry in set.active() {
        cumulative = cumulative.saturating_add(entry.stake);
        if point < cumulative {
            return Some(entry.index);
        }
    }
    // Rounding can only leave the point inside the last interval.
    set.active().last().map(|v| v.index)
}
