//! Property-based checks over hashing, merkle trees, difficulty, and
//! rewards.

use proptest::prelude::*;

use minichain::consensus::{block_subsidy, BlockHeader};
use minichain::crypto::{merkle_root, sha256d, Hash, PrivateKey};
use minichain::crypto::address_is_valid;
use minichain::params::{HALVE_SUBSIDY_AFTER_BLOCKS, INITIAL_SUBSIDY};
use minichain::p2p::Message;
use minichain::validation::Transaction;

fn arb_hash() -> impl Strategy<Value = Hash> {
    any::<[u8; 32]>().prop_map(Hash::from_bytes)
}

proptest! {
    #[test]
    fn merkle_odd_leaves_equal_duplicated_last(leaves in prop::collection::vec(arb_hash(), 1..40)) {
        prop_assume!(leaves.len() % 2 == 1);
        let mut padded = leaves.clone();
        padded.push(*leaves.last().unwrap());
        prop_assert_eq!(merkle_root(&leaves), merkle_root(&padded));
    }

    #[test]
    fn merkle_is_order_sensitive(leaves in prop::collection::vec(arb_hash(), 2..20), i in 0usize..20, j in 0usize..20) {
        let i = i % leaves.len();
        let j = j % leaves.len();
        prop_assume!(leaves[i] != leaves[j]);

        let mut swapped = leaves.clone();
        swapped.swap(i, j);
        prop_assert_ne!(merkle_root(&leaves), merkle_root(&swapped));
    }

    #[test]
    fn leading_zero_bits_agrees_with_satisfies_bits(bytes in any::<[u8; 32]>(), bits in 0u32..=256) {
        let hash = Hash::from_bytes(bytes);
        let zeros = hash.leading_zero_bits();
        prop_assert!(zeros <= 256);
        prop_assert_eq!(hash.satisfies_bits(bits), zeros >= bits);
    }

    #[test]
    fn subsidy_never_grows(h1 in 0u64..u64::MAX / 2, delta in 0u64..u64::MAX / 2) {
        let h2 = h1 + delta;
        prop_assert!(block_subsidy(h1) <= INITIAL_SUBSIDY);
        prop_assert!(block_subsidy(h2) <= block_subsidy(h1));
    }

    #[test]
    fn subsidy_halves_exactly(period in 0u64..64) {
        let height = period * HALVE_SUBSIDY_AFTER_BLOCKS;
        prop_assert_eq!(block_subsidy(height), INITIAL_SUBSIDY >> period);
    }

    #[test]
    fn header_hash_depends_on_every_field(
        version in any::<u32>(),
        timestamp in any::<u64>(),
        bits in 0u32..256,
        nonce in any::<u64>(),
        merkle in arb_hash(),
    ) {
        let header = BlockHeader {
            version,
            prev_block_hash: None,
            merkle_root: merkle,
            timestamp,
            bits,
            nonce,
        };
        prop_assert_eq!(header.hash(), header.hash());

        let bumped = BlockHeader { nonce: nonce.wrapping_add(1), ..header.clone() };
        prop_assert_ne!(header.hash(), bumped.hash());

        let rebitted = BlockHeader { bits: bits + 1, ..header };
        prop_assert_ne!(rebitted.hash(), bumped.hash());
    }

    #[test]
    fn generated_addresses_are_valid(seed in any::<[u8; 32]>()) {
        // Not every 32-byte string is a valid scalar.
        if let Ok(key) = PrivateKey::from_bytes(&seed) {
            prop_assert!(address_is_valid(&key.public_key().to_address()));
        }
    }

    #[test]
    fn coinbase_ids_distinct_across_heights(h1 in any::<u64>(), h2 in any::<u64>(), value in any::<u64>()) {
        prop_assume!(h1 != h2);
        let a = Transaction::create_coinbase("addr", value, h1);
        let b = Transaction::create_coinbase("addr", value, h2);
        prop_assert_ne!(a.id(), b.id());
    }

    #[test]
    fn message_frames_roundtrip(payload in any::<[u8; 32]>()) {
        let message = Message::GetBlocks {
            from_block_id: sha256d(&payload),
        };
        let bytes = message.to_bytes().unwrap();
        match Message::from_bytes(&bytes).unwrap() {
            Message::GetBlocks { from_block_id } => {
                prop_assert_eq!(from_block_id, sha256d(&payload))
            }
            other => prop_assert!(false, "wrong variant decoded: {:?}", other),
        }
    }
}
