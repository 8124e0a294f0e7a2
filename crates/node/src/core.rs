//! The node core: one façade over the cache hierarchy and the transaction
//! pool, consumed by the protocol and RPC layers.
//!
//! State-mutating operations serialize behind the write half of one lock;
//! queries share the read half and observe the last committed state. After
//! shutdown every entry point fails fast and the store is flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::seq::SliceRandom;

use ssix_chainstate::error::{BlockError, TxError};
use ssix_chainstate::hierarchy::{BlockAdded, CacheHierarchy};
use ssix_chainstate::store::ChainStore;
use ssix_chainstate::validation::ChainView;
use ssix_consensus::constants::COINBASE_BLOB_RESERVED_SIZE;
use ssix_consensus::{Checkpoints, Currency};
use ssix_crypto::CryptoOracle;
use ssix_log::{log_error, log_info};
use ssix_primitives::block::{Block, BlockHeader, RawBlock};
use ssix_primitives::encoding::decode;
use ssix_primitives::transaction::{
    OutputTarget, Transaction, TransactionInput, TransactionOutput, TransactionPrefix,
};
use ssix_primitives::types::{Hash, KeyImage, PublicKey};
use ssix_storage::KeyValueStore;

use crate::events::{Broadcaster, Notification};
use crate::pool::{PoolError, TransactionPool};
use crate::proofs::{
    reserve_proof_digest, AccountAddress, ReserveProof,
};

const TEMPLATE_TX_LIMIT: usize = 1_000;
const TX_EXTRA_PUBKEY_TAG: u8 = 0x01;
const TX_EXTRA_NONCE_TAG: u8 = 0x02;

#[derive(Debug)]
pub enum CoreError {
    Block(BlockError),
    Pool(PoolError),
    BadAddress,
    BadProof(&'static str),
    Shutdown,
}

impl CoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Block(err) => err.kind(),
            CoreError::Pool(err) => err.kind(),
            CoreError::BadAddress | CoreError::BadProof(_) => "MalformedBytes",
            CoreError::Shutdown => "Shutdown",
        }
    }
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::Block(err) => write!(f, "{err}"),
            CoreError::Pool(err) => write!(f, "{err}"),
            CoreError::BadAddress => write!(f, "malformed address"),
            CoreError::BadProof(message) => write!(f, "{message}"),
            CoreError::Shutdown => write!(f, "shutting down"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<BlockError> for CoreError {
    fn from(err: BlockError) -> Self {
        CoreError::Block(err)
    }
}

impl From<PoolError> for CoreError {
    fn from(err: PoolError) -> Self {
        CoreError::Pool(err)
    }
}

pub struct BlockTemplate {
    pub block: Block,
    pub height: u32,
    pub difficulty: u64,
    pub expected_reward: u64,
}

struct CoreState<S: KeyValueStore> {
    hierarchy: CacheHierarchy<S>,
    pool: TransactionPool,
}

pub struct Core<S: KeyValueStore> {
    currency: Arc<Currency>,
    oracle: Arc<dyn CryptoOracle>,
    state: RwLock<CoreState<S>>,
    broadcaster: Broadcaster,
    shutting_down: AtomicBool,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl<S: KeyValueStore> Core<S> {
    pub fn new(
        currency: Arc<Currency>,
        oracle: Arc<dyn CryptoOracle>,
        checkpoints: Checkpoints,
        store: S,
    ) -> Result<Self, BlockError> {
        let mut hierarchy = CacheHierarchy::new(
            Arc::clone(&currency),
            Arc::clone(&oracle),
            checkpoints,
            ChainStore::new(store),
        );
        hierarchy.init(unix_now())?;
        Ok(Self {
            currency,
            oracle,
            state: RwLock::new(CoreState {
                hierarchy,
                pool: TransactionPool::new(),
            }),
            broadcaster: Broadcaster::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn subscribe(&self, capacity: usize) -> crossbeam_channel::Receiver<Notification> {
        self.broadcaster.subscribe(capacity)
    }

    fn guard(&self) -> Result<(), CoreError> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(CoreError::Shutdown);
        }
        Ok(())
    }

    /// Stop accepting work and flush the store. Idempotent.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let state = self.state.read().expect("core lock");
        if let Err(err) = state.hierarchy.flush() {
            log_error!("flush on shutdown failed: {err}");
        }
        log_info!("core shut down at height {}", state.hierarchy.chain_size());
    }

    pub fn tip(&self) -> (u32, Hash, u64) {
        let state = self.state.read().expect("core lock");
        let tip = state.hierarchy.tip().expect("initialized chain");
        (tip.height, tip.hash, tip.cumulative_difficulty)
    }

    pub fn chain_size(&self) -> u32 {
        self.state.read().expect("core lock").hierarchy.chain_size()
    }

    pub fn pool_size(&self) -> usize {
        self.state.read().expect("core lock").pool.len()
    }

    /// Submit a serialized raw block from the network or a miner.
    pub fn submit_block(&self, bytes: &[u8]) -> Result<BlockAdded, CoreError> {
        self.guard()?;
        let raw: RawBlock = decode(bytes).map_err(BlockError::from)?;
        let block: Block = decode(&raw.block).map_err(BlockError::from)?;
        let mut transactions = Vec::with_capacity(raw.transactions.len());
        for blob in &raw.transactions {
            transactions.push(decode::<Transaction>(blob).map_err(BlockError::from)?);
        }

        let now = unix_now();
        let mut state = self.state.write().expect("core lock");
        let added = state
            .hierarchy
            .submit_block(block.clone(), transactions.clone(), raw, now)?;

        if added.on_canonical {
            let tx_hashes: Vec<Hash> = transactions.iter().map(|tx| tx.hash()).collect();
            let key_images: Vec<KeyImage> = transactions
                .iter()
                .flat_map(|tx| tx.key_images().copied())
                .collect();
            state
                .pool
                .prune_committed(tx_hashes.iter(), key_images.iter());

            if let Some(reorg) = &added.reorg {
                self.prune_new_branch(&mut state, reorg.split_height);
                let detached = reorg.detached_transactions.clone();
                let currency = Arc::clone(&self.currency);
                let oracle = Arc::clone(&self.oracle);
                let CoreState { hierarchy, pool } = &mut *state;
                let accepted = pool.reoffer(
                    detached,
                    &hierarchy.canonical_view(),
                    &currency,
                    oracle.as_ref(),
                    now,
                );
                log_info!(
                    "reorg at height {} returned {accepted} transactions to the pool",
                    reorg.split_height
                );
                self.broadcaster.publish(Notification::ChainSwitched {
                    split_height: reorg.split_height,
                    new_tip: reorg.new_tip,
                });
            }
            self.broadcaster.publish(Notification::BlockAdded {
                height: added.height,
                hash: added.hash,
            });
        }
        Ok(added)
    }

    /// After a reorg, drop pool entries that the newly canonical blocks
    /// already contain or conflict with.
    fn prune_new_branch(&self, state: &mut CoreState<S>, split_height: u32) {
        let mut tx_hashes = Vec::new();
        let mut key_images = Vec::new();
        for height in split_height + 1..state.hierarchy.chain_size() {
            let Some(block) = state.hierarchy.block_at(height) else {
                continue;
            };
            for hash in &block.tx_hashes {
                tx_hashes.push(*hash);
                if let Some((_, blob)) = state.hierarchy.canonical_transaction(hash) {
                    if let Ok(tx) = decode::<Transaction>(&blob) {
                        key_images.extend(tx.key_images().copied());
                    }
                }
            }
        }
        state
            .pool
            .prune_committed(tx_hashes.iter(), key_images.iter());
    }

    pub fn add_transaction(&self, tx: Transaction) -> Result<Hash, CoreError> {
        self.guard()?;
        let now = unix_now();
        let mut state = self.state.write().expect("core lock");
        let currency = Arc::clone(&self.currency);
        let oracle = Arc::clone(&self.oracle);
        let CoreState { hierarchy, pool } = &mut *state;
        let hash = pool.add(tx, &hierarchy.canonical_view(), &currency, oracle.as_ref(), now)?;
        self.broadcaster
            .publish(Notification::TransactionAdded { hash });
        Ok(hash)
    }

    pub fn add_raw_transaction(&self, bytes: &[u8]) -> Result<Hash, CoreError> {
        let tx: Transaction =
            decode(bytes).map_err(|err| CoreError::Pool(PoolError::Tx(TxError::Malformed(err))))?;
        self.add_transaction(tx)
    }

    /// Periodic housekeeping: evict expired pool entries.
    pub fn on_idle(&self) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.write().expect("core lock");
        let evicted = state.pool.sweep_expired(unix_now());
        if !evicted.is_empty() {
            log_info!("evicted {} expired pool transactions", evicted.len());
            self.broadcaster
                .publish(Notification::TransactionsRemoved { hashes: evicted });
        }
    }

    /// Assemble a mining template paying `address`.
    pub fn get_block_template(
        &self,
        address: &str,
        extra_nonce: &[u8],
    ) -> Result<BlockTemplate, CoreError> {
        self.guard()?;
        let address = AccountAddress::decode(address, &self.currency)
            .map_err(|_| CoreError::BadAddress)?;

        let state = self.state.read().expect("core lock");
        let tip = state.hierarchy.tip().expect("initialized chain");
        let height = tip.height + 1;
        let prev_hash = tip.hash;
        let tip_timestamp = tip.timestamp;
        let difficulty = state.hierarchy.next_canonical_difficulty();

        let size_budget = self
            .currency
            .max_block_size(height)
            .saturating_sub(COINBASE_BLOB_RESERVED_SIZE);
        let selected = state.pool.take_for_block(size_budget, TEMPLATE_TX_LIMIT);
        let total_fees: u64 = selected.iter().map(|entry| entry.fee).sum();
        let tx_hashes: Vec<Hash> = selected.iter().map(|entry| entry.hash).collect();
        let reward = self
            .currency
            .base_reward(tip.generated_coins)
            .checked_add(total_fees)
            .ok_or(CoreError::Block(BlockError::Transaction(
                TxError::AmountOverflow,
            )))?;
        drop(state);

        // Fresh transaction key; the miner output is a one-time key for the
        // template address.
        let (tx_public, tx_secret) = self.generate_template_keys()?;
        let output_key = self
            .oracle
            .derive_one_time_key(&tx_secret, &address.view, &address.spend, 0)
            .ok_or(CoreError::BadAddress)?;

        let mut extra = Vec::with_capacity(34 + extra_nonce.len() + 2);
        extra.push(TX_EXTRA_PUBKEY_TAG);
        extra.extend_from_slice(tx_public.as_bytes());
        if !extra_nonce.is_empty() {
            extra.push(TX_EXTRA_NONCE_TAG);
            extra.push(extra_nonce.len() as u8);
            extra.extend_from_slice(extra_nonce);
        }

        let coinbase = Transaction {
            prefix: TransactionPrefix {
                version: 1,
                unlock_time: height as u64 + self.currency.coinbase_unlock_window(),
                inputs: vec![TransactionInput::Coinbase {
                    height: height as u64,
                }],
                outputs: vec![TransactionOutput {
                    amount: reward,
                    target: OutputTarget::Key(output_key),
                }],
                extra,
            },
            signatures: Vec::new(),
        };

        let schedule = self.currency.upgrade_schedule();
        let block = Block {
            header: BlockHeader {
                major_version: schedule.expected_major_version(height),
                minor_version: 0,
                prev_hash,
                timestamp: unix_now().max(tip_timestamp + 1),
                nonce: 0,
            },
            coinbase,
            tx_hashes,
        };

        Ok(BlockTemplate {
            block,
            height,
            difficulty,
            expected_reward: reward,
        })
    }

    fn generate_template_keys(
        &self,
    ) -> Result<(PublicKey, ssix_primitives::types::SecretKey), CoreError> {
        // Template keys are node-local secrets, not consensus state.
        let oracle = ssix_crypto::DalekOracle::new();
        Ok(oracle.generate_keys())
    }

    /// Serialized canonical blocks `[start, start + count)`.
    pub fn get_blocks(&self, start: u32, count: u32) -> Vec<(Hash, RawBlock)> {
        let state = self.state.read().expect("core lock");
        let end = start
            .saturating_add(count)
            .min(state.hierarchy.chain_size());
        (start..end)
            .filter_map(|height| {
                state
                    .hierarchy
                    .block_at(height)
                    .map(|block| (block.hash, block.raw.clone()))
            })
            .collect()
    }

    /// The first `count` canonical key outputs for `amount`.
    pub fn get_transaction_outputs(&self, amount: u64, count: u64) -> Vec<(u64, PublicKey)> {
        let state = self.state.read().expect("core lock");
        let total = state.hierarchy.output_count(amount);
        (0..total.min(count))
            .filter_map(|index| {
                state
                    .hierarchy
                    .output_record(amount, index)
                    .and_then(|record| record.key().copied().map(|key| (index, key)))
            })
            .collect()
    }

    /// Random unlocked key outputs for decoy selection.
    pub fn get_random_outputs(&self, amount: u64, count: u64) -> Vec<(u64, PublicKey)> {
        let state = self.state.read().expect("core lock");
        let height = state.hierarchy.chain_size();
        let now = unix_now();
        let total = state.hierarchy.output_count(amount);

        let mut candidates: Vec<(u64, PublicKey)> = (0..total)
            .filter_map(|index| {
                let record = state.hierarchy.output_record(amount, index)?;
                let key = *record.key()?;
                let matured = !record.is_coinbase
                    || record.block_index as u64 + self.currency.coinbase_unlock_window()
                        <= height as u64;
                let unlocked = if record.unlock_time
                    < ssix_consensus::constants::UNLOCK_TIME_IS_TIMESTAMP_THRESHOLD
                {
                    record.unlock_time <= height as u64
                } else {
                    record.unlock_time <= now
                };
                (matured && unlocked).then_some((index, key))
            })
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(count as usize);
        candidates.sort_unstable_by_key(|(index, _)| *index);
        candidates
    }

    /// Height of the first hash the caller and we agree on.
    pub fn find_common_ancestor(&self, known: &[Hash]) -> Option<u32> {
        self.state
            .read()
            .expect("core lock")
            .hierarchy
            .find_common_ancestor(known)
    }

    pub fn get_pool_changes(&self, known: &[Hash]) -> (Vec<Transaction>, Vec<Hash>) {
        self.state.read().expect("core lock").pool.changes(known)
    }

    /// Operator repair: drop canonical blocks above `height` and return
    /// their transactions to the pool.
    pub fn rewind(&self, height: u32) -> Result<(), CoreError> {
        self.guard()?;
        let now = unix_now();
        let mut state = self.state.write().expect("core lock");
        let detached = state.hierarchy.rewind(height)?;
        let currency = Arc::clone(&self.currency);
        let oracle = Arc::clone(&self.oracle);
        let CoreState { hierarchy, pool } = &mut *state;
        pool.reoffer(
            detached,
            &hierarchy.canonical_view(),
            &currency,
            oracle.as_ref(),
            now,
        );
        Ok(())
    }

    pub fn sign_message(
        &self,
        data: &[u8],
        public: &PublicKey,
        secret: &ssix_primitives::types::SecretKey,
    ) -> Option<String> {
        crate::proofs::sign_message(data, public, secret, self.oracle.as_ref(), &self.currency)
    }

    pub fn verify_message(&self, data: &[u8], public: &PublicKey, encoded: &str) -> bool {
        crate::proofs::verify_message(data, public, encoded, self.oracle.as_ref(), &self.currency)
    }

    /// Verify a reserve proof and return the proven unspent amount.
    pub fn verify_reserve_proof(
        &self,
        address: &str,
        message: &str,
        encoded: &str,
    ) -> Result<u64, CoreError> {
        self.guard()?;
        let address =
            AccountAddress::decode(address, &self.currency).map_err(|_| CoreError::BadAddress)?;
        let proof: ReserveProof = crate::proofs::decode_reserve_proof(encoded, &self.currency)
            .ok_or(CoreError::BadProof("undecodable reserve proof"))?;

        let digest =
            reserve_proof_digest(message, &address, &proof.entries, self.oracle.as_ref());
        if !self
            .oracle
            .check_signature(&digest, &address.spend, &proof.spend_signature)
        {
            return Err(CoreError::BadProof("spend key signature check failed"));
        }

        let state = self.state.read().expect("core lock");
        let view = state.hierarchy.canonical_view();
        let mut total = 0u64;
        for entry in &proof.entries {
            // The view key must vouch for the claimed shared secret.
            if !self
                .oracle
                .check_signature(&digest, &address.view, &entry.shared_secret_sig)
            {
                return Err(CoreError::BadProof("shared secret signature check failed"));
            }
            let Some((_, blob)) = state.hierarchy.canonical_transaction(&entry.tx_hash) else {
                return Err(CoreError::BadProof("proof references an unknown transaction"));
            };
            let tx: Transaction = decode(&blob)
                .map_err(|_| CoreError::BadProof("stored transaction is undecodable"))?;
            let output = tx
                .prefix
                .outputs
                .get(entry.index_in_tx as usize)
                .ok_or(CoreError::BadProof("proof references a missing output"))?;
            let OutputTarget::Key(output_key) = &output.target else {
                return Err(CoreError::BadProof("proof references a non-key output"));
            };
            if !self.oracle.check_ring_signature(
                &digest,
                &entry.key_image,
                std::slice::from_ref(output_key),
                std::slice::from_ref(&entry.key_image_sig),
            ) {
                return Err(CoreError::BadProof("key image signature check failed"));
            }
            // Spent outputs prove ownership but not reserves.
            if !view.key_image_spent(&entry.key_image) {
                total = total.saturating_add(output.amount);
            }
        }
        Ok(total)
    }
}
