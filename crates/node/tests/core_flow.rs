//! End-to-end flows through the core façade: mining, pool admission,
//! reorganizations, and the proof surface.

use std::collections::HashMap;
use std::sync::Arc;

use ssix_consensus::{Checkpoints, Currency};
use ssix_crypto::{CryptoOracle, DalekOracle};
use ssix_node::proofs::{generate_reserve_proof, AccountKeys, ReserveSource};
use ssix_node::{AccountAddress, Core};
use ssix_primitives::block::{Block, BlockHeader, RawBlock};
use ssix_primitives::encoding::encode;
use ssix_primitives::transaction::{
    absolute_offsets_to_relative, KeyInput, OutputTarget, Transaction, TransactionInput,
    TransactionOutput, TransactionPrefix,
};
use ssix_primitives::types::{Hash, PublicKey, SecretKey};
use ssix_storage::memory::MemoryStore;

const FEE: u64 = 1_000;

#[derive(Clone)]
struct Owned {
    tx_hash: Hash,
    amount: u64,
    global_index: u64,
    public: PublicKey,
    secret: SecretKey,
}

struct Harness {
    currency: Arc<Currency>,
    oracle: DalekOracle,
    core: Core<Arc<MemoryStore>>,
    /// Parent-chain bookkeeping for manual block building.
    info: HashMap<Hash, (u32, u64)>, // hash -> (height, generated coins)
    minted: HashMap<Hash, Owned>,
    /// Outputs per amount already emitted, per branch-tip hash.
    output_counts: HashMap<Hash, HashMap<u64, u64>>,
}

impl Harness {
    fn new() -> Self {
        let currency = Arc::new(
            Currency::builder()
                .testnet(true)
                .minimum_fee(FEE)
                .coinbase_unlock_window(1)
                .upgrade_heights(vec![(2, 1_000_000)])
                .build()
                .expect("currency"),
        );
        let oracle = DalekOracle::new();
        let core = Core::new(
            Arc::clone(&currency),
            Arc::new(DalekOracle::new()),
            Checkpoints::new(),
            Arc::new(MemoryStore::new()),
        )
        .expect("core init");

        let genesis = currency.genesis_block();
        let genesis_hash = genesis.hash();
        let mut info = HashMap::new();
        info.insert(genesis_hash, (0u32, currency.base_reward(0)));
        let mut counts = HashMap::new();
        let mut genesis_counts = HashMap::new();
        genesis_counts.insert(currency.base_reward(0), 1u64);
        counts.insert(genesis_hash, genesis_counts);

        Self {
            currency,
            oracle,
            core,
            info,
            minted: HashMap::new(),
            output_counts: counts,
        }
    }

    fn genesis_hash(&self) -> Hash {
        self.currency.genesis_block().hash()
    }

    /// Build, submit, and account for one block on `parent`.
    fn mine_on(&mut self, parent: Hash, nonce: u32, transactions: Vec<Transaction>) -> Hash {
        let raw = self.build_raw(parent, nonce, &transactions);
        let block: Block = ssix_primitives::encoding::decode(&raw.block).unwrap();
        let hash = block.hash();
        self.core
            .submit_block(&encode(&raw))
            .expect("block accepted");
        // Resolve the minted coinbase's global index from the bookkeeping.
        if let Some(owned) = self.minted.get_mut(&hash) {
            let parent_counts = self.output_counts[&parent].clone();
            owned.global_index = parent_counts.get(&owned.amount).copied().unwrap_or(0);
        }
        hash
    }

    fn build_raw(&mut self, parent: Hash, nonce: u32, transactions: &[Transaction]) -> RawBlock {
        let (parent_height, parent_generated) = self.info[&parent];
        let height = parent_height + 1;
        let fees: u64 = transactions.iter().map(|tx| tx.fee().unwrap()).sum();
        let reward = self.currency.base_reward(parent_generated) + fees;

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
                prev_hash: parent,
                timestamp: self.currency.genesis_block().header.timestamp
                    + height as u64 * self.currency.difficulty_target(),
                nonce,
            },
            coinbase: coinbase.clone(),
            tx_hashes: transactions.iter().map(|tx| tx.hash()).collect(),
        };
        let hash = block.hash();

        self.info.insert(hash, (height, parent_generated + reward));
        let mut counts = self.output_counts[&parent].clone();
        for tx in std::iter::once(&coinbase).chain(transactions.iter()) {
            for output in &tx.prefix.outputs {
                *counts.entry(output.amount).or_insert(0) += 1;
            }
        }
        self.output_counts.insert(hash, counts);
        self.minted.insert(
            hash,
            Owned {
                tx_hash: coinbase.hash(),
                amount: reward,
                global_index: 0,
                public,
                secret,
            },
        );

        RawBlock {
            block: encode(&block),
            transactions: transactions.iter().map(encode).collect(),
        }
    }

    /// Ring-of-one spend of the coinbase minted by `block_hash`.
    fn spend_minted(&self, block_hash: &Hash, fee: u64) -> Transaction {
        let owned = self.minted[block_hash].clone();
        let key_image = self
            .oracle
            .generate_key_image(&owned.public, &owned.secret)
            .unwrap();
        let offsets = absolute_offsets_to_relative(&[owned.global_index]).unwrap();
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
                amount: owned.amount - fee,
                target: OutputTarget::Key(dest),
            }],
            extra: Vec::new(),
        };
        let prefix_hash = ssix_primitives::cn_fast_hash(&encode(&prefix));
        let signatures = self
            .oracle
            .generate_ring_signature(&prefix_hash, &key_image, &[owned.public], &owned.secret, 0)
            .unwrap();
        Transaction {
            prefix,
            signatures: vec![signatures],
        }
    }

    fn address(&self) -> (String, PublicKey, SecretKey) {
        let (spend, spend_secret) = self.oracle.generate_keys();
        let (view, _) = self.oracle.generate_keys();
        let address = AccountAddress { spend, view };
        (address.encode(&self.currency), spend, spend_secret)
    }
}

#[test]
fn template_round_trip_extends_the_chain() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    harness.mine_on(genesis, 1, Vec::new());

    let (address, _, _) = harness.address();
    let template = harness
        .core
        .get_block_template(&address, b"nonce")
        .expect("template");
    assert_eq!(template.height, 2);
    assert_eq!(template.difficulty, 1);

    let raw = RawBlock {
        block: encode(&template.block),
        transactions: Vec::new(),
    };
    let added = harness.core.submit_block(&encode(&raw)).expect("mined");
    assert!(added.on_canonical);
    assert_eq!(harness.core.tip().0, 2);
}

#[test]
fn pool_rejects_conflicting_spends() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    harness.mine_on(b1, 2, Vec::new());

    let spend_a = harness.spend_minted(&b1, FEE);
    let spend_b = harness.spend_minted(&b1, FEE * 2);

    let hash_a = harness.core.add_transaction(spend_a).expect("first spend");
    let err = harness
        .core
        .add_transaction(spend_b)
        .expect_err("conflicting spend");
    assert_eq!(err.kind(), "DoubleSpend");

    let (added, removed) = harness.core.get_pool_changes(&[]);
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].hash(), hash_a);
    assert!(removed.is_empty());
}

#[test]
fn mined_transactions_leave_the_pool() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    let b2 = harness.mine_on(b1, 2, Vec::new());

    let spend = harness.spend_minted(&b1, FEE);
    harness.core.add_transaction(spend.clone()).expect("queued");
    assert_eq!(harness.core.pool_size(), 1);

    harness.mine_on(b2, 3, vec![spend]);
    assert_eq!(harness.core.pool_size(), 0);
}

#[test]
fn reorg_returns_unique_txs_to_the_pool() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    let b2 = harness.mine_on(b1, 2, Vec::new());

    // A branch carries the spend; B branch is empty but longer.
    let spend = harness.spend_minted(&b1, FEE);
    let spend_hash = spend.hash();
    harness.mine_on(b2, 0xa3, vec![spend]);
    assert_eq!(harness.core.pool_size(), 0);

    let b3 = harness.mine_on(b2, 0xb3, Vec::new());
    let b4 = harness.mine_on(b3, 0xb4, Vec::new());
    assert_eq!(harness.core.tip().1, b4);

    // The spend still resolves against the shared prefix, so it is back.
    assert_eq!(harness.core.pool_size(), 1);
    let (added, _) = harness.core.get_pool_changes(&[]);
    assert_eq!(added[0].hash(), spend_hash);
}

#[test]
fn double_spent_detached_txs_are_dropped_silently() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    let b2 = harness.mine_on(b1, 2, Vec::new());

    let spend_a = harness.spend_minted(&b1, FEE);
    let spend_b = harness.spend_minted(&b1, FEE * 2);
    assert_ne!(spend_a.hash(), spend_b.hash());

    harness.mine_on(b2, 0xa3, vec![spend_a]);
    let b3 = harness.mine_on(b2, 0xb3, vec![spend_b.clone()]);
    harness.mine_on(b3, 0xb4, Vec::new());

    // B won; its spend holds the key image, so A's detached spend is gone.
    assert_eq!(harness.core.pool_size(), 0);
    let (_, blob) = {
        let blocks = harness.core.get_blocks(3, 1);
        let raw = &blocks[0].1;
        (blocks[0].0, raw.transactions[0].clone())
    };
    let tx: Transaction = ssix_primitives::encoding::decode(&blob).unwrap();
    assert_eq!(tx.hash(), spend_b.hash());
}

#[test]
fn template_orders_pool_by_fee_rate() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    let b2 = harness.mine_on(b1, 2, Vec::new());
    harness.mine_on(b2, 3, Vec::new());

    let cheap = harness.spend_minted(&b1, FEE);
    let rich = harness.spend_minted(&b2, FEE * 50);
    let cheap_hash = harness.core.add_transaction(cheap).unwrap();
    let rich_hash = harness.core.add_transaction(rich).unwrap();

    let (address, _, _) = harness.address();
    let template = harness.core.get_block_template(&address, &[]).unwrap();
    assert_eq!(template.block.tx_hashes, vec![rich_hash, cheap_hash]);
    assert_eq!(
        template.expected_reward,
        harness
            .currency
            .base_reward(harness.info[&harness.core.tip().1].1)
            + FEE * 51
    );
}

#[test]
fn find_common_ancestor_walks_known_hashes() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    let b2 = harness.mine_on(b1, 2, Vec::new());

    let unknown = Hash([0xab; 32]);
    assert_eq!(
        harness.core.find_common_ancestor(&[unknown, b2, b1]),
        Some(2)
    );
    assert_eq!(harness.core.find_common_ancestor(&[unknown]), None);
}

#[test]
fn message_signatures_verify_through_the_core() {
    let harness = Harness::new();
    let (_, public, secret) = harness.address();
    let signed = harness
        .core
        .sign_message(b"I control this key", &public, &secret)
        .expect("signature");
    assert!(harness
        .core
        .verify_message(b"I control this key", &public, &signed));
    assert!(!harness.core.verify_message(b"I do not", &public, &signed));
}

#[test]
fn reserve_proof_counts_only_unspent_outputs() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let b1 = harness.mine_on(genesis, 1, Vec::new());
    harness.mine_on(b1, 2, Vec::new());

    let owned = harness.minted[&b1].clone();
    let oracle = harness.oracle;
    let currency = Arc::clone(&harness.currency);
    let (spend, spend_secret) = oracle.generate_keys();
    let (view, view_secret) = oracle.generate_keys();
    let keys = AccountKeys {
        address: AccountAddress { spend, view },
        view_secret,
        spend_secret,
    };
    let (tx_public_key, _) = oracle.generate_keys();

    let sources = [ReserveSource {
        tx_hash: owned.tx_hash,
        index_in_tx: 0,
        tx_public_key,
        one_time_public: owned.public,
        one_time_secret: owned.secret,
    }];
    let encoded = generate_reserve_proof(&sources, &keys, "reserve audit", &oracle, &currency)
        .expect("proof generated");
    let address = keys.address.encode(&currency);

    let proven = harness
        .core
        .verify_reserve_proof(&address, "reserve audit", &encoded)
        .expect("proof verifies");
    assert_eq!(proven, owned.amount);

    // A different message breaks every signature in the proof.
    assert!(harness
        .core
        .verify_reserve_proof(&address, "other message", &encoded)
        .is_err());

    // Spending the proven output leaves the proof valid but worthless.
    let spend_tx = harness.spend_minted(&b1, FEE);
    let tip = harness.core.tip().1;
    harness.mine_on(tip, 3, vec![spend_tx]);
    let proven = harness
        .core
        .verify_reserve_proof(&address, "reserve audit", &encoded)
        .expect("proof still verifies");
    assert_eq!(proven, 0);
}

#[test]
fn shutdown_fails_new_work() {
    let mut harness = Harness::new();
    let genesis = harness.genesis_hash();
    let raw = harness.build_raw(genesis, 9, &[]);

    harness.core.shutdown();
    let err = harness.core.submit_block(&encode(&raw)).unwrap_err();
    assert_eq!(err.kind(), "Shutdown");
}
