mod common;

use common::TestChain;

use ssix_chainstate::error::BlockError;
use ssix_chainstate::hierarchy::CacheHierarchy;
use ssix_chainstate::store::ChainStore;
use ssix_chainstate::validation::ChainView;
use ssix_consensus::Checkpoints;
use ssix_crypto::DalekOracle;
use std::sync::Arc;

#[test]
fn genesis_only() {
    let chain = TestChain::new();
    assert_eq!(chain.hierarchy.chain_size(), 1);
    let tip = chain.hierarchy.tip().expect("genesis tip");
    assert_eq!(tip.height, 0);
    assert_eq!(tip.hash, chain.currency.genesis_block_hash());
    assert_eq!(tip.cumulative_difficulty, 1);

    // Key image set starts empty.
    let view = chain.hierarchy.canonical_view();
    assert!(!view.key_image_spent(&ssix_primitives::types::KeyImage([7u8; 32])));
}

#[test]
fn linear_extension_to_ten() {
    let mut chain = TestChain::new();
    let hashes = chain.mine_chain(10);
    assert_eq!(chain.hierarchy.chain_size(), 11);

    for (i, hash) in hashes.iter().enumerate() {
        let block = chain.hierarchy.block_at(i as u32 + 1).expect("block");
        assert_eq!(block.hash, *hash);
    }

    // Cumulative difficulty is strictly increasing along the chain.
    let mut last = 0;
    for height in 0..chain.hierarchy.chain_size() {
        let block = chain.hierarchy.block_at(height).unwrap();
        assert!(block.cumulative_difficulty > last);
        last = block.cumulative_difficulty;
    }
}

#[test]
fn state_is_stable_across_restart() {
    let mut chain = TestChain::new();
    chain.mine_chain(10);
    let tip = chain.tip_hash();
    let block5 = chain.hierarchy.block_at(5).unwrap().hash;

    // Reopen a fresh hierarchy over the same backing store.
    let mut reopened = CacheHierarchy::new(
        Arc::clone(&chain.currency),
        Arc::new(DalekOracle::new()),
        Checkpoints::new(),
        ChainStore::new(Arc::clone(&chain.store)),
    );
    reopened.init(chain.now).expect("reload");

    assert_eq!(reopened.chain_size(), 11);
    assert_eq!(reopened.tip().unwrap().hash, tip);
    assert_eq!(reopened.block_at(5).unwrap().hash, block5);
}

#[test]
fn duplicate_submission_is_already_have() {
    let mut chain = TestChain::new();
    let parent = chain.tip_hash();
    let (block, transactions, raw) = chain.build_block(parent, 1, Vec::new());

    chain
        .hierarchy
        .submit_block(block.clone(), transactions.clone(), raw.clone(), chain.now)
        .expect("first accept");
    let size_after_first = chain.hierarchy.chain_size();
    let tip_after_first = chain.tip_hash();

    let second = chain
        .hierarchy
        .submit_block(block, transactions, raw, chain.now);
    assert!(matches!(second, Err(BlockError::AlreadyHave)));
    assert_eq!(chain.hierarchy.chain_size(), size_after_first);
    assert_eq!(chain.tip_hash(), tip_after_first);
}

#[test]
fn orphan_blocks_are_rejected_statelessly() {
    let mut chain = TestChain::new();
    chain.mine_chain(2);

    let unknown_parent = ssix_primitives::types::Hash([0xee; 32]);
    let (block, transactions, raw) = chain.build_block(chain.tip_hash(), 5, Vec::new());
    let mut orphan = block;
    orphan.header.prev_hash = unknown_parent;
    let raw = ssix_primitives::block::RawBlock {
        block: ssix_primitives::encoding::encode(&orphan),
        transactions: raw.transactions,
    };

    let before = chain.hierarchy.chain_size();
    let result = chain
        .hierarchy
        .submit_block(orphan, transactions, raw, chain.now);
    assert!(matches!(result, Err(BlockError::Orphan)));
    assert_eq!(chain.hierarchy.chain_size(), before);
    assert_eq!(chain.hierarchy.live_segment_count(), 1);
}

#[test]
fn emission_matches_generated_coins() {
    let mut chain = TestChain::new();
    chain.mine_chain(20);

    // Invariant P4: every block's generated_coins is the running sum of the
    // emission formula.
    let mut expected = 0u64;
    for height in 0..chain.hierarchy.chain_size() {
        let block = chain.hierarchy.block_at(height).unwrap();
        expected += chain.currency.base_reward(expected);
        assert_eq!(block.generated_coins, expected, "height {height}");
    }
}

#[test]
fn rewind_drops_blocks_and_returns_txs() {
    let mut chain = TestChain::new();
    let hashes = chain.mine_chain(12);

    // Spend the coinbase of block 1 inside block 13.
    let spend = chain.spend_minted(&hashes[0]);
    let spend_hash = spend.hash();
    let tip = chain.tip_hash();
    chain.mine_with_txs(tip, 0x77, vec![spend]);
    assert_eq!(chain.hierarchy.chain_size(), 14);
    assert!(chain.hierarchy.canonical_transaction(&spend_hash).is_some());

    let detached = chain.hierarchy.rewind(10).expect("rewind");
    assert_eq!(chain.hierarchy.chain_size(), 11);
    assert_eq!(detached.len(), 1);
    assert_eq!(detached[0].hash(), spend_hash);
    assert!(chain.hierarchy.canonical_transaction(&spend_hash).is_none());
}
