//! Shared scaffolding for chainstate integration tests: a testnet currency
//! with a tiny fee floor, and helpers that mine spendable blocks.

use std::collections::HashMap;
use std::sync::Arc;

use ssix_chainstate::hierarchy::CacheHierarchy;
use ssix_chainstate::store::ChainStore;
use ssix_consensus::Currency;
use ssix_crypto::{CryptoOracle, DalekOracle};
use ssix_primitives::block::{Block, BlockHeader, RawBlock};
use ssix_primitives::encoding::encode;
use ssix_primitives::transaction::{
    absolute_offsets_to_relative, KeyInput, OutputTarget, Transaction, TransactionInput,
    TransactionOutput, TransactionPrefix,
};
use ssix_primitives::types::{Hash, PublicKey, SecretKey};
use ssix_storage::memory::MemoryStore;

pub const TEST_FEE: u64 = 1_000;

pub fn test_currency() -> Arc<Currency> {
    Arc::new(
        Currency::builder()
            .testnet(true)
            .minimum_fee(TEST_FEE)
            .upgrade_heights(vec![(2, 1_000_000)])
            .build()
            .expect("test currency"),
    )
}

/// A mined output we know the one-time secret for.
#[derive(Clone)]
pub struct OwnedOutput {
    pub tx_hash: Hash,
    pub amount: u64,
    pub global_index: u64,
    pub public: PublicKey,
    pub secret: SecretKey,
}

pub struct TestChain {
    pub currency: Arc<Currency>,
    pub oracle: Arc<DalekOracle>,
    pub hierarchy: CacheHierarchy<Arc<MemoryStore>>,
    pub store: Arc<MemoryStore>,
    pub now: u64,
    /// Coinbase outputs by the block hash that minted them.
    pub minted: HashMap<Hash, OwnedOutput>,
}

impl TestChain {
    pub fn new() -> Self {
        Self::with_checkpoints(ssix_consensus::Checkpoints::new())
    }

    pub fn with_checkpoints(checkpoints: ssix_consensus::Checkpoints) -> Self {
        let currency = test_currency();
        let oracle = Arc::new(DalekOracle::new());
        let store = Arc::new(MemoryStore::new());
        let mut hierarchy = CacheHierarchy::new(
            Arc::clone(&currency),
            oracle.clone(),
            checkpoints,
            ChainStore::new(Arc::clone(&store)),
        );
        let now = currency.genesis_block().header.timestamp + 100_000_000;
        hierarchy.init(now).expect("genesis init");
        Self {
            currency,
            oracle,
            hierarchy,
            store,
            now,
            minted: HashMap::new(),
        }
    }

    pub fn tip_hash(&self) -> Hash {
        self.hierarchy.tip().expect("tip").hash
    }

    pub fn tip_height(&self) -> u32 {
        self.hierarchy.chain_size() - 1
    }

    /// Build a valid block on the given parent; `nonce_tag` desynchronizes
    /// competing branches so their hashes differ.
    pub fn build_block(
        &mut self,
        parent_hash: Hash,
        nonce_tag: u32,
        transactions: Vec<Transaction>,
    ) -> (Block, Vec<Transaction>, RawBlock) {
        let parent = self
            .hierarchy
            .block_by_hash(&parent_hash)
            .expect("parent block");
        let height = parent.height + 1;
        let generated = parent.generated_coins;
        let timestamp = self.currency.genesis_block().header.timestamp
            + height as u64 * self.currency.difficulty_target();

        let fees: u64 = transactions
            .iter()
            .map(|tx| tx.fee().expect("test tx fee"))
            .sum();
        let reward = self.currency.base_reward(generated) + fees;

        let (public, secret) = self.oracle.generate_keys();
        let coinbase = Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: height as u64 + self.currency.coinbase_unlock_window(),
                inputs: vec![TransactionInput::Coinbase {
                    height: height as u64,
                }],
                outputs: vec![TransactionOutput {
                    amount: reward,
                    target: OutputTarget::Key(public),
                }],
                extra: Vec::new(),
            },
            signatures: Vec::new(),
        };

        let block = Block {
            header: BlockHeader {
                major_version: 1,
                minor_version: 0,
                prev_hash: parent_hash,
                timestamp,
                nonce: nonce_tag,
            },
            coinbase: coinbase.clone(),
            tx_hashes: transactions.iter().map(|tx| tx.hash()).collect(),
        };
        let raw = RawBlock {
            block: encode(&block),
            transactions: transactions.iter().map(encode).collect(),
        };

        self.minted.insert(
            block.hash(),
            OwnedOutput {
                tx_hash: coinbase.hash(),
                amount: reward,
                global_index: 0, // filled in by the caller after acceptance
                public,
                secret,
            },
        );
        (block, transactions, raw)
    }

    /// Mine and submit one block on `parent_hash`; panics on rejection.
    pub fn mine_on(&mut self, parent_hash: Hash, nonce_tag: u32) -> Hash {
        self.mine_with_txs(parent_hash, nonce_tag, Vec::new())
    }

    pub fn mine_with_txs(
        &mut self,
        parent_hash: Hash,
        nonce_tag: u32,
        transactions: Vec<Transaction>,
    ) -> Hash {
        let (block, transactions, raw) = self.build_block(parent_hash, nonce_tag, transactions);
        let hash = block.hash();
        self.hierarchy
            .submit_block(block, transactions, raw, self.now)
            .expect("block accepted");
        self.resolve_minted(&hash);
        hash
    }

    /// Fill in the global index of the coinbase output once it is indexed.
    pub fn resolve_minted(&mut self, block_hash: &Hash) {
        if let Some(owned) = self.minted.get_mut(block_hash) {
            if let Some(indexes) = self.hierarchy.transaction_global_indexes(&owned.tx_hash) {
                owned.global_index = indexes[0];
            }
        }
    }

    /// Extend the canonical chain by `count` empty blocks.
    pub fn mine_chain(&mut self, count: u32) -> Vec<Hash> {
        let mut hashes = Vec::with_capacity(count as usize);
        for i in 0..count {
            let tip = self.tip_hash();
            hashes.push(self.mine_on(tip, 0xa000 + i));
        }
        hashes
    }

    /// Spend a minted coinbase output in a ring of one, paying everything
    /// minus the fee to a fresh key.
    pub fn spend_minted(&self, block_hash: &Hash) -> Transaction {
        let owned = self.minted.get(block_hash).expect("owned output").clone();
        let key_image = self
            .oracle
            .generate_key_image(&owned.public, &owned.secret)
            .expect("key image");

        let offsets =
            absolute_offsets_to_relative(&[owned.global_index]).expect("relative offsets");
        let (dest, _) = self.oracle.generate_keys();
        let prefix = TransactionPrefix {
            version: 1,
            unlock_time: 0,
            inputs: vec![TransactionInput::Key(KeyInput {
                amount: owned.amount,
                key_image,
                output_offsets: offsets,
            })],
            outputs: vec![TransactionOutput {
                amount: owned.amount - TEST_FEE,
                target: OutputTarget::Key(dest),
            }],
            extra: Vec::new(),
        };
        let prefix_hash =
            ssix_primitives::cn_fast_hash(&encode(&prefix));
        let signatures = self
            .oracle
            .generate_ring_signature(&prefix_hash, &key_image, &[owned.public], &owned.secret, 0)
            .expect("ring signature");
        Transaction {
            prefix,
            signatures: vec![signatures],
        }
    }
}
