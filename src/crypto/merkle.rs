//! Merkle tree root computation
//!
//! Binds a block header to its ordered transaction set. Leaves are the
//! txids, each hashed once more before pairwise reduction.

use super::{hash_pair, sha256d, Hash};

/// Compute the merkle root of an ordered sequence of txids.
///
/// Odd levels duplicate their last node, so a single leaf is hashed with
/// itself. An empty sequence yields the zero hash (blocks with no
/// transactions are rejected before this matters).
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::zero();
    }

    let mut level: Vec<Hash> = leaves.iter().map(|leaf| sha256d(&leaf.0)).collect();

    if level.len() == 1 {
        level.push(level[0]);
    }

    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().unwrap());
        }

        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(hash_pair(&pair[0], &pair[1]));
        }
        level = next;
    }

    level[0]
}
