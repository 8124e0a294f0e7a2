mod common;

use common::TestChain;

use ssix_chainstate::error::BlockError;
use ssix_primitives::block::RawBlock;
use ssix_primitives::encoding::encode;

#[test]
fn malformed_varint_leaves_chain_unchanged() {
    let mut chain = TestChain::new();
    chain.mine_chain(3);
    let before_size = chain.hierarchy.chain_size();
    let before_tip = chain.tip_hash();

    // Overlong varint right at the front of the record.
    let result = chain
        .hierarchy
        .submit_raw_block(&[0x81, 0x00, 0x01, 0x02], chain.now);
    assert!(matches!(result, Err(BlockError::Malformed(_))));
    assert_eq!(result.unwrap_err().kind(), "MalformedBytes");

    assert_eq!(chain.hierarchy.chain_size(), before_size);
    assert_eq!(chain.tip_hash(), before_tip);
}

#[test]
fn truncated_tx_blob_is_malformed() {
    let mut chain = TestChain::new();
    chain.mine_chain(11);

    let source = chain.hierarchy.block_at(1).unwrap().hash;
    let spend = chain.spend_minted(&source);
    let parent = chain.tip_hash();
    let (block, _txs, raw) = chain.build_block(parent, 0x33, vec![spend]);

    let mut tx_blob = raw.transactions[0].clone();
    tx_blob.truncate(tx_blob.len() / 2);
    let corrupted = RawBlock {
        block: raw.block,
        transactions: vec![tx_blob],
    };

    let before = chain.hierarchy.chain_size();
    let result = chain
        .hierarchy
        .submit_raw_block(&encode(&corrupted), chain.now);
    assert!(matches!(result, Err(BlockError::Malformed(_))));
    assert_eq!(chain.hierarchy.chain_size(), before);
    let _ = block;
}

#[test]
fn tx_hash_mismatch_is_rejected() {
    let mut chain = TestChain::new();
    chain.mine_chain(11);

    let source_one = chain.hierarchy.block_at(1).unwrap().hash;
    let source_two = chain.hierarchy.block_at(2).unwrap().hash;
    let spend = chain.spend_minted(&source_one);
    let other = chain.spend_minted(&source_two);
    let parent = chain.tip_hash();
    let (block, _txs, raw) = chain.build_block(parent, 0x44, vec![spend]);

    // Swap in a different transaction body than the header references.
    let forged = RawBlock {
        block: raw.block,
        transactions: vec![encode(&other)],
    };
    let result = chain
        .hierarchy
        .submit_raw_block(&encode(&forged), chain.now);
    assert!(matches!(result, Err(BlockError::TxHashMismatch)));
    let _ = block;
}
