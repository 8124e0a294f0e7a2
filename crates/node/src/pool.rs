//! Unconfirmed transaction pool.
//!
//! Entries are validated against the canonical tip on admission, guarded by
//! a key-image index against double spends inside the pool, and drained by
//! fee rate when a block template is assembled.

use std::collections::{BTreeSet, HashMap, HashSet};

use ssix_chainstate::error::TxError;
use ssix_chainstate::validation::{
    check_transaction_fee, check_transaction_inputs, check_transaction_semantic,
    verify_signature_checks, ChainView,
};
use ssix_consensus::constants::POOL_TX_LIVE_TIME;
use ssix_consensus::Currency;
use ssix_crypto::CryptoOracle;
use ssix_log::{log_debug, log_info};
use ssix_primitives::encoding::encode;
use ssix_primitives::transaction::Transaction;
use ssix_primitives::types::{Hash, KeyImage};

#[derive(Debug)]
pub enum PoolError {
    AlreadyInPool,
    PoolDoubleSpend,
    Tx(TxError),
    Shutdown,
}

impl PoolError {
    pub fn kind(&self) -> &'static str {
        match self {
            PoolError::AlreadyInPool => "AlreadyHave",
            PoolError::PoolDoubleSpend => "DoubleSpend",
            PoolError::Tx(err) => err.kind(),
            PoolError::Shutdown => "Shutdown",
        }
    }
}

impl std::fmt::Display for PoolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolError::AlreadyInPool => write!(f, "transaction already in pool"),
            PoolError::PoolDoubleSpend => {
                write!(f, "key image conflicts with another pool transaction")
            }
            PoolError::Tx(err) => write!(f, "{err}"),
            PoolError::Shutdown => write!(f, "shutting down"),
        }
    }
}

impl std::error::Error for PoolError {}

impl From<TxError> for PoolError {
    fn from(err: TxError) -> Self {
        PoolError::Tx(err)
    }
}

#[derive(Clone, Debug)]
pub struct PoolEntry {
    pub hash: Hash,
    pub tx: Transaction,
    pub blob: Vec<u8>,
    pub fee: u64,
    pub size: u64,
    pub received_at: u64,
    pub key_images: Vec<KeyImage>,
}

impl PoolEntry {
    /// Scaled fee-per-byte used for take ordering.
    fn fee_rate(&self) -> u64 {
        self.fee.saturating_mul(1_000) / self.size.max(1)
    }
}

#[derive(Default)]
pub struct TransactionPool {
    entries: HashMap<Hash, PoolEntry>,
    by_key_image: HashMap<KeyImage, Hash>,
    /// `(fee rate, hash)`, iterated in reverse for best-first takes.
    by_fee_rate: BTreeSet<(u64, Hash)>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&PoolEntry> {
        self.entries.get(hash)
    }

    pub fn transactions(&self) -> impl Iterator<Item = &PoolEntry> {
        self.entries.values()
    }

    pub fn key_image_in_pool(&self, image: &KeyImage) -> bool {
        self.by_key_image.contains_key(image)
    }

    /// Admit `tx` after contextual validation against the canonical tip.
    pub fn add<V: ChainView>(
        &mut self,
        tx: Transaction,
        view: &V,
        currency: &Currency,
        oracle: &dyn CryptoOracle,
        now: u64,
    ) -> Result<Hash, PoolError> {
        let hash = tx.hash();
        if self.entries.contains_key(&hash) {
            return Err(PoolError::AlreadyInPool);
        }

        let height = view.chain_size();
        check_transaction_semantic(&tx, currency, height, oracle)?;
        let fee = check_transaction_fee(&tx, currency, height)?;

        let key_images: Vec<KeyImage> = tx.key_images().copied().collect();
        for image in &key_images {
            if self.by_key_image.contains_key(image) {
                return Err(PoolError::PoolDoubleSpend);
            }
        }

        let mut spent = HashSet::new();
        let checks = check_transaction_inputs(&tx, view, currency, height, now, &mut spent)
            .map_err(PoolError::Tx)?;
        verify_signature_checks(oracle, &checks).map_err(PoolError::Tx)?;

        let blob = encode(&tx);
        let entry = PoolEntry {
            hash,
            size: blob.len() as u64,
            blob,
            fee,
            received_at: now,
            key_images: key_images.clone(),
            tx,
        };
        self.by_fee_rate.insert((entry.fee_rate(), hash));
        for image in key_images {
            self.by_key_image.insert(image, hash);
        }
        self.entries.insert(hash, entry);
        log_debug!("pool accepted {} ({} total)", hash.short(), self.len());
        Ok(hash)
    }

    fn unlink(&mut self, entry: &PoolEntry) {
        self.by_fee_rate.remove(&(entry.fee_rate(), entry.hash));
        for image in &entry.key_images {
            self.by_key_image.remove(image);
        }
    }

    pub fn remove(&mut self, hash: &Hash) -> Option<PoolEntry> {
        let entry = self.entries.remove(hash)?;
        self.unlink(&entry);
        Some(entry)
    }

    /// Drop everything a freshly connected block made stale: its own
    /// transactions and any pool entry reusing one of its key images.
    pub fn prune_committed<'a>(
        &mut self,
        tx_hashes: impl IntoIterator<Item = &'a Hash>,
        key_images: impl IntoIterator<Item = &'a KeyImage>,
    ) {
        for hash in tx_hashes {
            self.remove(hash);
        }
        let conflicting: Vec<Hash> = key_images
            .into_iter()
            .filter_map(|image| self.by_key_image.get(image).copied())
            .collect();
        for hash in conflicting {
            if self.remove(&hash).is_some() {
                log_info!("evicted pool tx {} double-spent by a block", hash.short());
            }
        }
    }

    /// Greedy best-fee-rate selection under the size and count caps, never
    /// taking two entries that contend for a key image.
    pub fn take_for_block(&self, max_total_size: u64, max_count: usize) -> Vec<&PoolEntry> {
        let mut taken = Vec::new();
        let mut total_size = 0u64;
        let mut images: HashSet<&KeyImage> = HashSet::new();
        for (_, hash) in self.by_fee_rate.iter().rev() {
            if taken.len() >= max_count {
                break;
            }
            let entry = &self.entries[hash];
            if total_size + entry.size > max_total_size {
                continue;
            }
            if entry.key_images.iter().any(|image| images.contains(image)) {
                continue;
            }
            images.extend(entry.key_images.iter());
            total_size += entry.size;
            taken.push(entry);
        }
        taken
    }

    /// Re-offer transactions detached by a reorg; anything that no longer
    /// validates is silently dropped.
    pub fn reoffer<V: ChainView>(
        &mut self,
        transactions: Vec<Transaction>,
        view: &V,
        currency: &Currency,
        oracle: &dyn CryptoOracle,
        now: u64,
    ) -> usize {
        let mut accepted = 0usize;
        for tx in transactions {
            let hash = tx.hash();
            match self.add(tx, view, currency, oracle, now) {
                Ok(_) => accepted += 1,
                Err(err) => {
                    log_debug!("dropped detached tx {}: {err}", hash.short());
                }
            }
        }
        accepted
    }

    /// Evict entries older than the pool lifetime. Returns evicted hashes.
    pub fn sweep_expired(&mut self, now: u64) -> Vec<Hash> {
        let expired: Vec<Hash> = self
            .entries
            .values()
            .filter(|entry| now.saturating_sub(entry.received_at) > POOL_TX_LIVE_TIME)
            .map(|entry| entry.hash)
            .collect();
        for hash in &expired {
            self.remove(hash);
        }
        expired
    }

    /// Diff against a caller's known set: `(new transactions, gone hashes)`.
    pub fn changes(&self, known: &[Hash]) -> (Vec<Transaction>, Vec<Hash>) {
        let known_set: HashSet<&Hash> = known.iter().collect();
        let added = self
            .entries
            .values()
            .filter(|entry| !known_set.contains(&entry.hash))
            .map(|entry| entry.tx.clone())
            .collect();
        let removed = known
            .iter()
            .filter(|hash| !self.entries.contains_key(*hash))
            .copied()
            .collect();
        (added, removed)
    }
}
