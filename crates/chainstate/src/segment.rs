//! One contiguous run of blocks with its derived indices.
//!
//! A segment only stores blocks at or above its `start_index`; everything
//! below is the parent's business. That makes an alternative branch a diff
//! against the chain it forked from, and the hierarchy's walk-the-parents
//! queries stitch the full view back together.

use std::collections::{BTreeMap, HashMap};

use ssix_primitives::block::{Block, RawBlock};
use ssix_primitives::transaction::Transaction;
use ssix_primitives::types::{Hash, KeyImage, PublicKey};

pub type SegmentId = usize;

/// The spend condition an output was created under, as validation needs it
/// later: the one-time key for ring members, or the full key set and
/// threshold for multisignature outputs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedTarget {
    Key(PublicKey),
    Multisignature {
        keys: Vec<PublicKey>,
        required_signatures: u8,
    },
}

/// Where an output landed and what spending it requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputRecord {
    pub tx_hash: Hash,
    pub output_index: u32,
    pub target: RecordedTarget,
    pub unlock_time: u64,
    pub block_index: u32,
    pub is_coinbase: bool,
}

impl OutputRecord {
    /// The one-time key, when the output can serve as a ring member.
    pub fn key(&self) -> Option<&PublicKey> {
        match &self.target {
            RecordedTarget::Key(key) => Some(key),
            RecordedTarget::Multisignature { .. } => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CachedTransaction {
    pub hash: Hash,
    pub blob: Vec<u8>,
    pub block_index: u32,
    pub fee: u64,
    /// Global output index assigned to each of the transaction's outputs.
    pub global_indexes: Vec<u64>,
}

#[derive(Clone, Debug)]
pub struct CachedBlock {
    pub hash: Hash,
    pub height: u32,
    pub difficulty: u64,
    pub cumulative_difficulty: u64,
    pub cumulative_size: u64,
    pub timestamp: u64,
    /// Coins in circulation after this block's coinbase.
    pub generated_coins: u64,
    pub tx_hashes: Vec<Hash>,
    pub raw: RawBlock,
}

/// A block popped off a segment tip, complete enough to be re-pushed onto
/// another branch or drained into the pool.
#[derive(Clone, Debug)]
pub struct DetachedBlock {
    pub block: Block,
    pub transactions: Vec<Transaction>,
    pub raw: RawBlock,
    pub timestamp: u64,
}

#[derive(Debug)]
pub struct Segment {
    pub parent: Option<SegmentId>,
    /// Height of the first block this segment stores.
    pub start_index: u32,
    /// Monotone creation stamp; the fork-choice tiebreak.
    pub added_at: u64,
    blocks: Vec<CachedBlock>,
    block_index: HashMap<Hash, u32>,
    transactions: HashMap<Hash, CachedTransaction>,
    key_images: HashMap<KeyImage, u32>,
    /// Outputs appended by this segment, per amount, in assignment order.
    outputs: BTreeMap<u64, Vec<OutputRecord>>,
    /// Global index of the first record in `outputs[amount]`.
    output_start: HashMap<u64, u64>,
}

impl Segment {
    pub fn new(parent: Option<SegmentId>, start_index: u32, added_at: u64) -> Self {
        Self {
            parent,
            start_index,
            added_at,
            blocks: Vec::new(),
            block_index: HashMap::new(),
            transactions: HashMap::new(),
            key_images: HashMap::new(),
            outputs: BTreeMap::new(),
            output_start: HashMap::new(),
        }
    }

    pub fn len(&self) -> u32 {
        self.blocks.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Height one past this segment's tip, i.e. the chain size as seen from
    /// this segment.
    pub fn end_index(&self) -> u32 {
        self.start_index + self.len()
    }

    pub fn tip(&self) -> Option<&CachedBlock> {
        self.blocks.last()
    }

    pub fn block_at(&self, height: u32) -> Option<&CachedBlock> {
        if height < self.start_index {
            return None;
        }
        self.blocks.get((height - self.start_index) as usize)
    }

    /// Local block lookup; heights at or above `bound` are invisible.
    pub fn block_by_hash(&self, hash: &Hash, bound: u32) -> Option<&CachedBlock> {
        let height = *self.block_index.get(hash)?;
        if height >= bound {
            return None;
        }
        self.block_at(height)
    }

    pub fn transaction(&self, hash: &Hash, bound: u32) -> Option<&CachedTransaction> {
        self.transactions
            .get(hash)
            .filter(|tx| tx.block_index < bound)
    }

    pub fn key_image_height(&self, image: &KeyImage, bound: u32) -> Option<u32> {
        self.key_images
            .get(image)
            .copied()
            .filter(|height| *height < bound)
    }

    /// Number of outputs of `amount` this segment appended below `bound`.
    pub fn output_count(&self, amount: u64, bound: u32) -> u64 {
        let Some(records) = self.outputs.get(&amount) else {
            return 0;
        };
        records.partition_point(|record| record.block_index < bound) as u64
    }

    /// Output of `amount` at `global_index`, if this segment assigned it
    /// below `bound`.
    pub fn output_by_global_index(
        &self,
        amount: u64,
        global_index: u64,
        bound: u32,
    ) -> Option<&OutputRecord> {
        let start = *self.output_start.get(&amount)?;
        if global_index < start {
            return None;
        }
        let record = self
            .outputs
            .get(&amount)?
            .get((global_index - start) as usize)?;
        (record.block_index < bound).then_some(record)
    }

    /// First global index this segment assigned for `amount`, if any.
    pub fn output_start(&self, amount: u64) -> Option<u64> {
        self.output_start.get(&amount).copied()
    }

    pub fn amounts(&self) -> impl Iterator<Item = u64> + '_ {
        self.outputs.keys().copied()
    }

    /// Append a fully validated block.
    ///
    /// `output_base` maps each output amount in the block to the global
    /// index count of the chain below this block, computed by the caller
    /// against the parent chain.
    #[allow(clippy::too_many_arguments)]
    pub fn push_block(
        &mut self,
        block: &Block,
        transactions: &[Transaction],
        raw: RawBlock,
        difficulty: u64,
        parent_cumulative_difficulty: u64,
        parent_cumulative_size: u64,
        parent_generated_coins: u64,
        reward: u64,
        output_base: &HashMap<u64, u64>,
    ) -> CachedBlock {
        let height = self.end_index();
        let hash = block.hash();
        let block_size = raw.block.len() as u64
            + raw
                .transactions
                .iter()
                .map(|blob| blob.len() as u64)
                .sum::<u64>();

        let mut appended: HashMap<u64, u64> = HashMap::new();
        let mut index_tx = |tx: &Transaction, blob: Vec<u8>, segment: &mut Self| {
            let tx_hash = tx.hash();
            let mut global_indexes = Vec::with_capacity(tx.prefix.outputs.len());
            for (output_index, output) in tx.prefix.outputs.iter().enumerate() {
                let amount = output.amount;
                let base = output_base.get(&amount).copied().unwrap_or(0);
                let offset = appended.entry(amount).or_insert(0);
                let global_index = base + *offset;
                *offset += 1;
                global_indexes.push(global_index);

                let target = match &output.target {
                    ssix_primitives::transaction::OutputTarget::Key(key) => {
                        RecordedTarget::Key(*key)
                    }
                    ssix_primitives::transaction::OutputTarget::Multisignature(ms) => {
                        RecordedTarget::Multisignature {
                            keys: ms.keys.clone(),
                            required_signatures: ms.required_signatures,
                        }
                    }
                };
                segment
                    .output_start
                    .entry(amount)
                    .or_insert(global_index);
                segment.outputs.entry(amount).or_default().push(OutputRecord {
                    tx_hash,
                    output_index: output_index as u32,
                    target,
                    unlock_time: tx.prefix.unlock_time,
                    block_index: height,
                    is_coinbase: tx.is_coinbase(),
                });
            }
            for image in tx.key_images() {
                segment.key_images.insert(*image, height);
            }
            segment.transactions.insert(
                tx_hash,
                CachedTransaction {
                    hash: tx_hash,
                    blob,
                    block_index: height,
                    fee: tx.fee().unwrap_or(0),
                    global_indexes,
                },
            );
            tx_hash
        };

        index_tx(
            &block.coinbase,
            ssix_primitives::encoding::encode(&block.coinbase),
            self,
        );
        let mut tx_hashes = Vec::with_capacity(transactions.len());
        for (tx, blob) in transactions.iter().zip(raw.transactions.iter()) {
            tx_hashes.push(index_tx(tx, blob.clone(), self));
        }

        let cached = CachedBlock {
            hash,
            height,
            difficulty,
            cumulative_difficulty: parent_cumulative_difficulty + difficulty,
            cumulative_size: parent_cumulative_size + block_size,
            timestamp: block.header.timestamp,
            generated_coins: parent_generated_coins + reward,
            tx_hashes,
            raw,
        };
        self.block_index.insert(hash, height);
        self.blocks.push(cached.clone());
        cached
    }

    /// Remove the tip block and every index entry it contributed.
    ///
    /// Returns `None` on an empty segment or if the cached blobs no longer
    /// decode; the latter means the cache is corrupt and nothing is popped.
    pub fn pop_block(&mut self) -> Option<DetachedBlock> {
        let tip = self.blocks.last()?;
        let block: Block = ssix_primitives::encoding::decode(&tip.raw.block).ok()?;
        let mut transactions = Vec::with_capacity(tip.raw.transactions.len());
        for blob in &tip.raw.transactions {
            transactions.push(ssix_primitives::encoding::decode::<Transaction>(blob).ok()?);
        }

        let cached = self.blocks.pop()?;
        self.block_index.remove(&cached.hash);

        let coinbase_hash = block.coinbase.hash();
        self.transactions.remove(&coinbase_hash);
        for tx in &transactions {
            let hash = tx.hash();
            self.transactions.remove(&hash);
            for image in tx.key_images() {
                self.key_images.remove(image);
            }
        }
        for tx in std::iter::once(&block.coinbase).chain(transactions.iter()) {
            for output in &tx.prefix.outputs {
                if let Some(records) = self.outputs.get_mut(&output.amount) {
                    while records
                        .last()
                        .map(|record| record.block_index == cached.height)
                        .unwrap_or(false)
                    {
                        records.pop();
                    }
                    if records.is_empty() {
                        self.outputs.remove(&output.amount);
                        self.output_start.remove(&output.amount);
                    }
                }
            }
        }

        Some(DetachedBlock {
            block,
            transactions,
            raw: cached.raw,
            timestamp: cached.timestamp,
        })
    }

    pub fn blocks(&self) -> &[CachedBlock] {
        &self.blocks
    }
}
