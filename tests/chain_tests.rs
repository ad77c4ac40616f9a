//! End-to-end chain behavior: mining real blocks, spending, forks, and
//! reorganization.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use minichain::consensus::{next_work_required, Block, BlockHeader};
use minichain::crypto::{sha256d, Hash, PrivateKey};
use minichain::mining::Miner;
use minichain::node::create_genesis_block;
use minichain::params::{
    COINBASE_MATURITY, DIFFICULTY_PERIOD_IN_BLOCKS, INITIAL_DIFFICULTY_BITS, INITIAL_SUBSIDY,
    MAX_MONEY,
};
use minichain::storage::{ChainState, ACTIVE_CHAIN_IDX};
use minichain::validation::{make_txin, OutPoint, Transaction, TxOut};
use minichain::wallet::Wallet;

fn test_wallet() -> (tempfile::TempDir, Wallet) {
    let dir = tempfile::tempdir().unwrap();
    let wallet = Wallet::load_or_create(dir.path().join("wallet.dat")).unwrap();
    (dir, wallet)
}

fn miner_for(address: &str) -> Miner {
    Miner::new(address.to_string(), Arc::new(AtomicBool::new(false)))
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Assemble a block on the chain's tip with a pinned timestamp, then
/// grind out its proof-of-work.
fn mine_on(chain: &ChainState, miner: &Miner, timestamp: u64) -> Block {
    let mut candidate = miner.assemble_block(chain, None).unwrap();
    candidate.header.timestamp = timestamp;
    miner.mine(candidate).unwrap()
}

#[test]
fn test_mine_and_connect_blocks() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let mut chain = ChainState::new(create_genesis_block());

    let base = now();
    for i in 1..=3u64 {
        let block = mine_on(&chain, &miner, base + i * 10);
        assert_eq!(chain.connect_block(block, false), Some(ACTIVE_CHAIN_IDX));
        assert_eq!(chain.height(), i + 1);
    }

    // Genesis coinbase plus one coinbase per mined block.
    assert_eq!(chain.utxo().len(), 4);
    let mined_value: u64 = chain
        .utxo()
        .iter()
        .filter(|(_, utxo)| utxo.to_addr == wallet.address())
        .map(|(_, utxo)| utxo.value)
        .sum();
    assert_eq!(mined_value, 3 * INITIAL_SUBSIDY);
}

#[test]
fn test_duplicate_block_ignored() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let mut chain = ChainState::new(create_genesis_block());

    let block = mine_on(&chain, &miner, now() + 10);
    assert_eq!(
        chain.connect_block(block.clone(), false),
        Some(ACTIVE_CHAIN_IDX)
    );
    assert_eq!(chain.connect_block(block, false), None);
    assert_eq!(chain.height(), 2);
}

#[test]
fn test_tampered_block_rejected() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let mut chain = ChainState::new(create_genesis_block());

    let mut block = mine_on(&chain, &miner, now() + 10);
    block.header.nonce = block.header.nonce.wrapping_add(1);
    // Overwhelmingly likely the new id fails the difficulty target.
    if !block.id().satisfies_bits(block.header.bits) {
        assert_eq!(chain.connect_block(block, false), None);
        assert_eq!(chain.height(), 1);
        assert_eq!(chain.utxo().len(), 1);
    }
}

#[test]
fn test_orphan_block_connects_when_parent_arrives() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());

    let mut source = ChainState::new(create_genesis_block());
    let base = now();
    let first = mine_on(&source, &miner, base + 10);
    source.connect_block(first.clone(), false);
    let second = mine_on(&source, &miner, base + 20);

    let mut chain = ChainState::new(create_genesis_block());
    assert_eq!(chain.connect_block(second, false), None);
    assert_eq!(chain.orphan_blocks().len(), 1);

    // The parent's arrival pulls the orphan in too.
    assert_eq!(chain.connect_block(first, false), Some(ACTIVE_CHAIN_IDX));
    assert_eq!(chain.orphan_blocks().len(), 0);
    assert_eq!(chain.height(), 3);
}

#[test]
fn test_spend_after_maturity() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let mut chain = ChainState::new(create_genesis_block());

    let base = now();
    let reward_block = mine_on(&chain, &miner, base + 10);
    let reward_txid = reward_block.txns[0].id();
    chain.connect_block(reward_block, false);

    let spend_reward = |sequence: u32| {
        let txouts = vec![TxOut {
            value: 1000,
            to_addr: "recipient".to_string(),
        }];
        Transaction::new(
            vec![make_txin(
                wallet.key(),
                OutPoint::new(reward_txid, 0),
                &txouts,
                sequence,
            )],
            txouts,
        )
    };

    // One confirmation is not enough.
    assert!(!chain.accept_transaction(spend_reward(0)));

    for i in 0..COINBASE_MATURITY {
        let block = mine_on(&chain, &miner, base + 20 + i * 10);
        chain.connect_block(block, false);
    }

    let payment = spend_reward(1);
    let payment_id = payment.id();
    assert!(chain.accept_transaction(payment.clone()));
    assert!(chain.mempool().contains(&payment_id));

    // The next mined block should confirm it.
    let block = mine_on(&chain, &miner, base + 100);
    assert!(block.txns.iter().any(|t| t.id() == payment_id));
    chain.connect_block(block, false);

    assert!(!chain.mempool().contains(&payment_id));
    assert!(!chain
        .utxo()
        .contains(&OutPoint::new(reward_txid, 0)));
    assert!(chain.utxo().contains(&OutPoint::new(payment_id, 0)));
    let paid = chain.utxo().get(&OutPoint::new(payment_id, 0)).unwrap();
    assert_eq!(paid.value, 1000);
    assert_eq!(paid.to_addr, "recipient");
}

#[test]
fn test_overspending_transaction_rejected() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let mut chain = ChainState::new(create_genesis_block());

    let base = now();
    let reward_block = mine_on(&chain, &miner, base + 10);
    let reward_txid = reward_block.txns[0].id();
    chain.connect_block(reward_block, false);
    for i in 0..COINBASE_MATURITY {
        let block = mine_on(&chain, &miner, base + 20 + i * 10);
        chain.connect_block(block, false);
    }

    let txouts = vec![TxOut {
        value: INITIAL_SUBSIDY + 1,
        to_addr: "recipient".to_string(),
    }];
    let overspend = Transaction::new(
        vec![make_txin(
            wallet.key(),
            OutPoint::new(reward_txid, 0),
            &txouts,
            0,
        )],
        txouts,
    );

    assert!(!chain.accept_transaction(overspend));
    assert!(chain.mempool().is_empty());
    assert!(chain.mempool().orphans().is_empty());
}

#[test]
fn test_coinbase_shaped_transaction_not_admitted() {
    let mut chain = ChainState::new(create_genesis_block());

    // A peer-submitted transaction with a null outpoint claims the block
    // reward shape; only mined blocks may carry one.
    let fake = Transaction::create_coinbase("attacker-address", MAX_MONEY - 1, 99);
    assert!(!chain.accept_transaction(fake));
    assert!(chain.mempool().is_empty());
}

#[test]
fn test_spend_signed_with_wrong_key_rejected() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let mut chain = ChainState::new(create_genesis_block());

    let base = now();
    let reward_block = mine_on(&chain, &miner, base + 10);
    let reward_txid = reward_block.txns[0].id();
    chain.connect_block(reward_block, false);
    for i in 0..COINBASE_MATURITY {
        let block = mine_on(&chain, &miner, base + 20 + i * 10);
        chain.connect_block(block, false);
    }

    // The output is mature and exists, but it belongs to the wallet, not
    // to this key.
    let txouts = vec![TxOut {
        value: 1000,
        to_addr: "recipient".to_string(),
    }];
    let theft = Transaction::new(
        vec![make_txin(
            &PrivateKey::generate(),
            OutPoint::new(reward_txid, 0),
            &txouts,
            0,
        )],
        txouts,
    );

    assert!(!chain.accept_transaction(theft));
    assert!(chain.mempool().is_empty());
    // A bad signature is a hard rejection, never an orphan.
    assert!(chain.mempool().orphans().is_empty());
}

#[test]
fn test_unknown_input_parks_transaction() {
    let (_dir, wallet) = test_wallet();
    let mut chain = ChainState::new(create_genesis_block());

    let txouts = vec![TxOut {
        value: 10,
        to_addr: "recipient".to_string(),
    }];
    let orphan = Transaction::new(
        vec![make_txin(
            wallet.key(),
            OutPoint::new(sha256d(b"never-seen"), 0),
            &txouts,
            0,
        )],
        txouts,
    );

    assert!(!chain.accept_transaction(orphan));
    assert!(chain.mempool().is_empty());
    assert_eq!(chain.mempool().orphans().len(), 1);
}

#[test]
fn test_reorg_to_longer_branch() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let base = now();

    // The chain under test grows two blocks past genesis.
    let mut chain = ChainState::new(create_genesis_block());
    for i in 1..=2u64 {
        let block = mine_on(&chain, &miner, base + i * 10);
        chain.connect_block(block, false);
    }
    assert_eq!(chain.height(), 3);

    // A competitor quietly mines four blocks from genesis.
    let mut rival = ChainState::new(create_genesis_block());
    let mut rival_blocks = Vec::new();
    for i in 1..=4u64 {
        let block = mine_on(&rival, &miner, base + 30 + i * 10);
        rival.connect_block(block.clone(), false);
        rival_blocks.push(block);
    }

    // First three rival blocks only build a side branch.
    for block in &rival_blocks[..3] {
        chain.connect_block(block.clone(), false);
    }
    assert_eq!(chain.height(), 3);
    assert_eq!(chain.side_branches().len(), 1);
    assert_eq!(chain.side_branches()[0].len(), 3);

    // The fourth makes the branch win.
    chain.connect_block(rival_blocks[3].clone(), false);
    assert_eq!(chain.height(), 5);
    for (i, block) in rival_blocks.iter().enumerate() {
        assert_eq!(chain.active_chain()[i + 1].id(), block.id());
    }

    // The displaced chain is kept as a side branch.
    assert_eq!(chain.side_branches().len(), 1);
    assert_eq!(chain.side_branches()[0].len(), 2);

    // Both chains paid the same miner at overlapping heights, so every
    // displaced coinbase reappears in the new chain: the mempool drains.
    assert!(chain.mempool().is_empty());

    // UTXO set matches the new chain exactly.
    assert_eq!(chain.utxo().len(), 5);
    for block in &rival_blocks {
        assert!(chain.utxo().contains(&OutPoint::new(block.txns[0].id(), 0)));
    }
}

#[test]
fn test_shorter_branch_does_not_reorg() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let base = now();

    let mut chain = ChainState::new(create_genesis_block());
    for i in 1..=3u64 {
        let block = mine_on(&chain, &miner, base + i * 10);
        chain.connect_block(block, false);
    }
    let tip_before = chain.tip().unwrap().id();

    let mut rival = ChainState::new(create_genesis_block());
    for i in 1..=2u64 {
        let block = mine_on(&rival, &miner, base + 40 + i * 10);
        rival.connect_block(block.clone(), false);
        chain.connect_block(block, false);
    }

    assert_eq!(chain.height(), 4);
    assert_eq!(chain.tip().unwrap().id(), tip_before);
    assert_eq!(chain.side_branches().len(), 1);
}

#[test]
fn test_invalid_block_on_side_branch_rejected() {
    let (_dir, wallet) = test_wallet();
    let miner = miner_for(wallet.address());
    let base = now();

    let mut chain = ChainState::new(create_genesis_block());
    for i in 1..=3u64 {
        let block = mine_on(&chain, &miner, base + i * 10);
        chain.connect_block(block, false);
    }

    let mut rival = ChainState::new(create_genesis_block());
    let b1 = mine_on(&rival, &miner, base + 50);
    rival.connect_block(b1.clone(), false);
    chain.connect_block(b1, false);
    assert_eq!(chain.side_branches()[0].len(), 1);

    // A proof-less extension of the branch must change nothing.
    let mut b2 = mine_on(&rival, &miner, base + 60);
    b2.header.nonce = b2.header.nonce.wrapping_add(1);
    if !b2.id().satisfies_bits(b2.header.bits) {
        assert_eq!(chain.connect_block(b2, false), None);
        assert_eq!(chain.height(), 4);
        assert_eq!(chain.side_branches().len(), 1);
        assert_eq!(chain.side_branches()[0].len(), 1);
    }
}

#[test]
fn test_difficulty_retargets_at_period_boundary() {
    fn bare_chain(spacing: u64) -> Vec<Block> {
        let mut blocks: Vec<Block> = Vec::new();
        for i in 0..DIFFICULTY_PERIOD_IN_BLOCKS {
            let prev = blocks.last().map(|b| b.id());
            blocks.push(Block::new(
                BlockHeader {
                    version: 0,
                    prev_block_hash: prev,
                    merkle_root: Hash::zero(),
                    timestamp: 1000 + i * spacing,
                    bits: INITIAL_DIFFICULTY_BITS,
                    nonce: 0,
                },
                vec![],
            ));
        }
        blocks
    }

    // Blocks came twice as fast as targeted: difficulty rises.
    let fast = bare_chain(30);
    let tip = fast.last().unwrap().id();
    let mut state = ChainState::empty();
    state.set_active_chain(fast);
    assert_eq!(
        next_work_required(Some(&tip), &state),
        INITIAL_DIFFICULTY_BITS + 1
    );

    // Twice as slow: difficulty falls.
    let slow = bare_chain(120);
    let tip = slow.last().unwrap().id();
    let mut state = ChainState::empty();
    state.set_active_chain(slow);
    assert_eq!(
        next_work_required(Some(&tip), &state),
        INITIAL_DIFFICULTY_BITS - 1
    );

    // Off the boundary the parent's bits carry over.
    let mid = bare_chain(30);
    let inner = mid[10].id();
    let mut state = ChainState::empty();
    state.set_active_chain(mid);
    assert_eq!(next_work_required(Some(&inner), &state), INITIAL_DIFFICULTY_BITS);

    // No parent at all: genesis difficulty.
    assert_eq!(next_work_required(None, &state), INITIAL_DIFFICULTY_BITS);
}
