mod common;

use common::TestChain;

use ssix_chainstate::error::{BlockError, TxError};
use ssix_chainstate::validation::ChainView;
use ssix_primitives::transaction::TransactionInput;

#[test]
fn longer_branch_wins_and_detaches_txs() {
    let mut chain = TestChain::new();
    let a_hashes = chain.mine_chain(11);
    let ancestor = a_hashes[10]; // height 11, branch point

    // A branch: height 12 carries a spend of block 1's coinbase.
    let spend = chain.spend_minted(&a_hashes[0]);
    let spend_hash = spend.hash();
    let a12 = chain.mine_with_txs(ancestor, 0x0a12, vec![spend]);
    assert_eq!(chain.tip_hash(), a12);
    assert!(chain.hierarchy.canonical_transaction(&spend_hash).is_some());

    // B branch: two empty blocks from the same ancestor.
    let (b12_block, b12_txs, b12_raw) = chain.build_block(ancestor, 0x0b12, Vec::new());
    let b12 = b12_block.hash();
    let added = chain
        .hierarchy
        .submit_block(b12_block, b12_txs, b12_raw, chain.now)
        .expect("alt block accepted");
    assert!(!added.on_canonical, "equal work must not reorganize");
    assert_eq!(chain.tip_hash(), a12);
    chain.resolve_minted(&b12);

    let (b13_block, b13_txs, b13_raw) = chain.build_block(b12, 0x0b13, Vec::new());
    let b13 = b13_block.hash();
    let added = chain
        .hierarchy
        .submit_block(b13_block, b13_txs, b13_raw, chain.now)
        .expect("winning block accepted");

    // The heavier branch is canonical now.
    assert!(added.on_canonical);
    let reorg = added.reorg.expect("reorganization happened");
    assert_eq!(reorg.split_height, 11);
    assert_eq!(chain.tip_hash(), b13);
    assert_eq!(chain.hierarchy.chain_size(), 14);
    assert_eq!(chain.hierarchy.block_at(12).unwrap().hash, b12);

    // The spend that lived only on A is handed back for the pool.
    assert_eq!(reorg.detached_transactions.len(), 1);
    assert_eq!(reorg.detached_transactions[0].hash(), spend_hash);
    assert!(chain.hierarchy.canonical_transaction(&spend_hash).is_none());

    // Its key image is free again on the canonical chain.
    let image = match &reorg.detached_transactions[0].prefix.inputs[0] {
        TransactionInput::Key(input) => input.key_image,
        _ => unreachable!(),
    };
    assert!(!chain.hierarchy.canonical_view().key_image_spent(&image));

    // The losing branch survives as an alternative segment.
    assert!(chain.hierarchy.has_block(&a12));
    assert!(chain.hierarchy.live_segment_count() >= 2);
}

#[test]
fn shared_prefix_transactions_survive_a_reorg() {
    let mut chain = TestChain::new();
    let hashes = chain.mine_chain(11);

    // The spend lands in block 12, which both branches will share.
    let spend = chain.spend_minted(&hashes[0]);
    let spend_hash = spend.hash();
    let shared = chain.mine_with_txs(chain.tip_hash(), 0x5a, vec![spend]);

    let a13 = chain.mine_on(shared, 0xa13);
    let (b13_block, b13_txs, b13_raw) = chain.build_block(shared, 0xb13, Vec::new());
    let b13 = b13_block.hash();
    chain
        .hierarchy
        .submit_block(b13_block, b13_txs, b13_raw, chain.now)
        .expect("alt");
    chain.resolve_minted(&b13);
    let (b14_block, b14_txs, b14_raw) = chain.build_block(b13, 0xb14, Vec::new());
    let added = chain
        .hierarchy
        .submit_block(b14_block, b14_txs, b14_raw, chain.now)
        .expect("winner");

    let reorg = added.reorg.expect("reorg");
    assert_eq!(reorg.split_height, 12);
    // Nothing from the shared prefix is detached.
    assert!(reorg.detached_transactions.is_empty());
    assert!(chain.hierarchy.canonical_transaction(&spend_hash).is_some());
    assert!(chain.hierarchy.has_block(&a13));
}

#[test]
fn double_spend_across_branches() {
    let mut chain = TestChain::new();
    let hashes = chain.mine_chain(11);
    let ancestor = chain.tip_hash();

    // Two competing spends of the same output, one per branch.
    let spend_a = chain.spend_minted(&hashes[0]);
    let spend_b = chain.spend_minted(&hashes[0]);
    assert_ne!(spend_a.hash(), spend_b.hash());
    let image = match &spend_a.prefix.inputs[0] {
        TransactionInput::Key(input) => input.key_image,
        _ => unreachable!(),
    };

    let _a12 = chain.mine_with_txs(ancestor, 0xa12, vec![spend_a.clone()]);
    assert!(chain.hierarchy.canonical_view().key_image_spent(&image));

    let (b12_block, b12_txs, b12_raw) =
        chain.build_block(ancestor, 0xb12, vec![spend_b.clone()]);
    let b12 = b12_block.hash();
    chain
        .hierarchy
        .submit_block(b12_block, b12_txs, b12_raw, chain.now)
        .expect("alt block with conflicting spend");
    chain.resolve_minted(&b12);
    let (b13_block, b13_txs, b13_raw) = chain.build_block(b12, 0xb13, Vec::new());
    let added = chain
        .hierarchy
        .submit_block(b13_block, b13_txs, b13_raw, chain.now)
        .expect("winner");

    // B's spend owns the key image on the canonical chain now.
    let reorg = added.reorg.expect("reorg");
    assert!(chain
        .hierarchy
        .canonical_transaction(&spend_b.hash())
        .is_some());
    assert!(chain.hierarchy.canonical_view().key_image_spent(&image));
    assert_eq!(reorg.detached_transactions[0].hash(), spend_a.hash());

    // Re-mining A's spend on the new chain is a double spend.
    let tip = chain.tip_hash();
    let (bad_block, bad_txs, bad_raw) = chain.build_block(tip, 0xdead, vec![spend_a]);
    let result = chain
        .hierarchy
        .submit_block(bad_block, bad_txs, bad_raw, chain.now);
    assert!(matches!(
        result,
        Err(BlockError::Transaction(TxError::DoubleSpend))
    ));
}

#[test]
fn canonical_difficulty_never_decreases() {
    let mut chain = TestChain::new();
    let mut best = 0u64;
    for i in 0..8u32 {
        let tip = chain.tip_hash();
        chain.mine_on(tip, i);
        let work = chain.hierarchy.tip().unwrap().cumulative_difficulty;
        assert!(work > best);
        best = work;
    }

    // A losing alternative leaves the canonical work untouched.
    let fork_parent = chain.hierarchy.block_at(4).unwrap().hash;
    let (alt_block, alt_txs, alt_raw) = chain.build_block(fork_parent, 0xffff, Vec::new());
    chain
        .hierarchy
        .submit_block(alt_block, alt_txs, alt_raw, chain.now)
        .expect("alt accepted");
    assert_eq!(
        chain.hierarchy.tip().unwrap().cumulative_difficulty,
        best
    );
}

#[test]
fn spending_an_alt_branch_output_requires_that_branch() {
    let mut chain = TestChain::new();
    chain.mine_chain(11);

    // An output minted on an alternative branch is not visible canonically.
    let fork_parent = chain.hierarchy.block_at(5).unwrap().hash;
    let (alt_block, alt_txs, alt_raw) = chain.build_block(fork_parent, 0x9999, Vec::new());
    let alt_hash = alt_block.hash();
    chain
        .hierarchy
        .submit_block(alt_block, alt_txs, alt_raw, chain.now)
        .expect("alt accepted");

    let minted = chain.minted.get(&alt_hash).unwrap();
    // The alt coinbase occupies no canonical global index for its amount.
    assert!(chain
        .hierarchy
        .output_record(minted.amount, chain.hierarchy.output_count(minted.amount))
        .is_none());
}
