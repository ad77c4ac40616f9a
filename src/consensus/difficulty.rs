//! Difficulty retargeting
//!
//! Difficulty is a required leading-zero-bit count. Every
//! `DIFFICULTY_PERIOD_IN_BLOCKS` blocks it moves one bit toward the
//! target period duration.

use crate::crypto::Hash;
use crate::params::{
    DIFFICULTY_PERIOD_IN_BLOCKS, DIFFICULTY_PERIOD_IN_SECS_TARGET, INITIAL_DIFFICULTY_BITS,
};
use crate::storage::ChainState;

/// Difficulty bits required of the block following `prev_block_hash`.
///
/// Outside a period boundary this is the parent's bits. At a boundary the
/// elapsed time of the finished period is compared to the target: a fast
/// period raises difficulty by one bit, a slow one lowers it.
pub fn next_work_required(prev_block_hash: Option<&Hash>, chain: &ChainState) -> u32 {
    let prev_hash = match prev_block_hash {
        Some(hash) => hash,
        None => return INITIAL_DIFFICULTY_BITS,
    };

    let (prev_block, prev_height, _) = match chain.locate_block(prev_hash, false) {
        Some(found) => found,
        None => return INITIAL_DIFFICULTY_BITS,
    };

    if (prev_height + 1) % DIFFICULTY_PERIOD_IN_BLOCKS != 0 {
        return prev_block.header.bits;
    }

    let start_idx = (prev_height + 1 - DIFFICULTY_PERIOD_IN_BLOCKS) as usize;
    let period_start = &chain.active_chain()[start_idx];
    let elapsed = prev_block
        .header
        .timestamp
        .saturating_sub(period_start.header.timestamp);

    if elapsed < DIFFICULTY_PERIOD_IN_SECS_TARGET {
        prev_block.header.bits + 1
    } else if elapsed > DIFFICULTY_PERIOD_IN_SECS_TARGET {
        prev_block.header.bits.saturating_sub(1)
    } else {
        prev_block.header.bits
    }
}
