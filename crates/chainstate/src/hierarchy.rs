//! The cache tree and fork arbitration.
//!
//! The canonical chain always lives in the root segment, which is the only
//! DB-backed one. Alternative branches are memory segments holding their
//! diff against the canonical chain; winning a fork moves their blocks into
//! the root inside a single staged batch, and the losing blocks become a
//! fresh alternative segment.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ssix_consensus::constants::{DB_SCHEMA_VERSION, DIFFICULTY_CUT, DIFFICULTY_WINDOW};
use ssix_consensus::{Checkpoints, Currency, UpgradeSchedule};
use ssix_crypto::CryptoOracle;
use ssix_log::{log_debug, log_info, log_warn};
use ssix_pow::difficulty::DifficultyConfig;
use ssix_pow::{check_hash, next_difficulty};
use ssix_primitives::block::{Block, RawBlock};
use ssix_primitives::encoding::{decode, encode};
use ssix_primitives::transaction::Transaction;
use ssix_primitives::types::{Hash, KeyImage};
use ssix_storage::{KeyValueStore, WriteBatch};

use crate::error::{BlockError, TxError};
use crate::segment::{CachedBlock, DetachedBlock, OutputRecord, Segment, SegmentId};
use crate::store::ChainStore;
use crate::validation::{
    check_block_timestamp, check_block_version, check_coinbase, check_outputs,
    check_transaction_fee, check_transaction_inputs, check_transaction_semantic,
    verify_signature_checks, ChainView, SignatureCheck,
};

const ROOT: SegmentId = 0;

/// Result of an accepted block.
#[derive(Debug)]
pub struct BlockAdded {
    pub hash: Hash,
    pub height: u32,
    pub cumulative_difficulty: u64,
    pub on_canonical: bool,
    pub reorg: Option<ReorgSummary>,
}

#[derive(Debug)]
pub struct ReorgSummary {
    /// Height of the last block both branches share.
    pub split_height: u32,
    pub old_tip: Hash,
    pub new_tip: Hash,
    /// Transactions of the losing branch, for pool re-offer.
    pub detached_transactions: Vec<Transaction>,
}

pub struct CacheHierarchy<S: KeyValueStore> {
    currency: Arc<Currency>,
    oracle: Arc<dyn CryptoOracle>,
    checkpoints: Checkpoints,
    schedule: UpgradeSchedule,
    store: ChainStore<S>,
    segments: Vec<Option<Segment>>,
    sequence: u64,
}

/// Read view of one branch as of a fixed height.
pub struct BranchView<'a, S: KeyValueStore> {
    hierarchy: &'a CacheHierarchy<S>,
    segment: SegmentId,
    bound: u32,
}

impl<'a, S: KeyValueStore> ChainView for BranchView<'a, S> {
    fn chain_size(&self) -> u32 {
        self.bound
            .min(self.hierarchy.segment(self.segment).end_index())
    }

    fn key_image_spent(&self, image: &KeyImage) -> bool {
        let mut current = Some(self.segment);
        let mut bound = self.bound;
        while let Some(id) = current {
            let segment = self.hierarchy.segment(id);
            if segment.key_image_height(image, bound).is_some() {
                return true;
            }
            bound = bound.min(segment.start_index);
            current = segment.parent;
        }
        false
    }

    fn output(&self, amount: u64, global_index: u64) -> Option<OutputRecord> {
        let mut current = Some(self.segment);
        let mut bound = self.bound;
        while let Some(id) = current {
            let segment = self.hierarchy.segment(id);
            if let Some(record) = segment.output_by_global_index(amount, global_index, bound) {
                return Some(record.clone());
            }
            // Indices at or above this segment's first assignment belong to
            // it; the parent chain cannot hold them.
            if let Some(start) = segment.output_start(amount) {
                if global_index >= start {
                    return None;
                }
            }
            bound = bound.min(segment.start_index);
            current = segment.parent;
        }
        None
    }

    fn last_timestamps(&self, count: usize) -> Vec<u64> {
        let size = self.chain_size();
        let from = size.saturating_sub(count as u32);
        let mut timestamps = Vec::with_capacity((size - from) as usize);
        for height in from..size {
            if let Some(block) = self.hierarchy.block_on_branch(self.segment, self.bound, height) {
                timestamps.push(block.timestamp);
            }
        }
        timestamps
    }
}

impl<S: KeyValueStore> CacheHierarchy<S> {
    pub fn new(
        currency: Arc<Currency>,
        oracle: Arc<dyn CryptoOracle>,
        checkpoints: Checkpoints,
        store: ChainStore<S>,
    ) -> Self {
        let schedule = currency.upgrade_schedule();
        Self {
            currency,
            oracle,
            checkpoints,
            schedule,
            store,
            segments: vec![Some(Segment::new(None, 0, 0))],
            sequence: 1,
        }
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn oracle(&self) -> &dyn CryptoOracle {
        self.oracle.as_ref()
    }

    pub fn checkpoints(&self) -> &Checkpoints {
        &self.checkpoints
    }

    fn segment(&self, id: SegmentId) -> &Segment {
        self.segments[id].as_ref().expect("live segment")
    }

    fn segment_mut(&mut self, id: SegmentId) -> &mut Segment {
        self.segments[id].as_mut().expect("live segment")
    }

    fn root(&self) -> &Segment {
        self.segment(ROOT)
    }

    pub fn live_segment_count(&self) -> usize {
        self.segments.iter().flatten().count()
    }

    /// Size of the canonical chain.
    pub fn chain_size(&self) -> u32 {
        self.root().end_index()
    }

    pub fn tip(&self) -> Option<&CachedBlock> {
        self.root().tip()
    }

    pub fn block_at(&self, height: u32) -> Option<&CachedBlock> {
        self.root().block_at(height)
    }

    pub fn canonical_view(&self) -> BranchView<'_, S> {
        BranchView {
            hierarchy: self,
            segment: ROOT,
            bound: u32::MAX,
        }
    }

    fn branch_view(&self, segment: SegmentId, bound: u32) -> BranchView<'_, S> {
        BranchView {
            hierarchy: self,
            segment,
            bound,
        }
    }

    fn block_on_branch(
        &self,
        segment: SegmentId,
        mut bound: u32,
        height: u32,
    ) -> Option<&CachedBlock> {
        let mut current = Some(segment);
        while let Some(id) = current {
            let segment = self.segment(id);
            if height < bound {
                if let Some(block) = segment.block_at(height) {
                    return Some(block);
                }
            }
            bound = bound.min(segment.start_index);
            current = segment.parent;
        }
        None
    }

    /// Whether any live segment holds this block.
    pub fn has_block(&self, hash: &Hash) -> bool {
        self.block_by_hash(hash).is_some()
    }

    /// The block on any live branch, canonical or alternative.
    pub fn block_by_hash(&self, hash: &Hash) -> Option<&CachedBlock> {
        self.segments
            .iter()
            .flatten()
            .find_map(|segment| segment.block_by_hash(hash, u32::MAX))
    }

    pub fn canonical_block_height(&self, hash: &Hash) -> Option<u32> {
        self.root()
            .block_by_hash(hash, u32::MAX)
            .map(|block| block.height)
    }

    pub fn canonical_transaction(&self, hash: &Hash) -> Option<(u32, Vec<u8>)> {
        self.root()
            .transaction(hash, u32::MAX)
            .map(|tx| (tx.block_index, tx.blob.clone()))
    }

    pub fn transaction_global_indexes(&self, hash: &Hash) -> Option<Vec<u64>> {
        self.root()
            .transaction(hash, u32::MAX)
            .map(|tx| tx.global_indexes.clone())
    }

    /// Total canonical outputs for `amount`.
    pub fn output_count(&self, amount: u64) -> u64 {
        self.root().output_count(amount, u32::MAX)
    }

    pub fn output_record(&self, amount: u64, global_index: u64) -> Option<OutputRecord> {
        self.root()
            .output_by_global_index(amount, global_index, u32::MAX)
            .cloned()
    }

    /// One-time keys for the requested ring members, canonical chain.
    pub fn extract_key_output_keys(
        &self,
        amount: u64,
        global_indexes: &[u64],
    ) -> Result<Vec<ssix_primitives::types::PublicKey>, TxError> {
        let mut keys = Vec::with_capacity(global_indexes.len());
        for index in global_indexes {
            let record = self
                .output_record(amount, *index)
                .ok_or(TxError::InputInvalid("ring member does not exist"))?;
            match record.key() {
                Some(key) => keys.push(*key),
                None => {
                    return Err(TxError::InputInvalid("ring member is not a key output"));
                }
            }
        }
        Ok(keys)
    }

    /// First hash in `known` that lies on the canonical chain.
    pub fn find_common_ancestor(&self, known: &[Hash]) -> Option<u32> {
        known
            .iter()
            .find_map(|hash| self.canonical_block_height(hash))
    }

    /// Difficulty the next canonical block must meet.
    pub fn next_canonical_difficulty(&self) -> u64 {
        self.branch_difficulty(ROOT, u32::MAX)
    }

    fn difficulty_config(&self) -> DifficultyConfig {
        DifficultyConfig::new(
            self.currency.difficulty_target(),
            DIFFICULTY_WINDOW,
            DIFFICULTY_CUT,
        )
    }

    fn branch_difficulty(&self, segment: SegmentId, bound: u32) -> u64 {
        let view = self.branch_view(segment, bound);
        let size = view.chain_size();
        let from = size.saturating_sub(DIFFICULTY_WINDOW as u32);
        let mut timestamps = Vec::with_capacity((size - from) as usize);
        let mut cumulative = Vec::with_capacity((size - from) as usize);
        for height in from..size {
            if let Some(block) = self.block_on_branch(segment, bound, height) {
                timestamps.push(block.timestamp);
                cumulative.push(block.cumulative_difficulty);
            }
        }
        next_difficulty(&timestamps, &cumulative, &self.difficulty_config())
    }

    /// Open the database: verify the schema, replay stored blocks, or start
    /// from genesis. A schema mismatch wipes the store first.
    pub fn init(&mut self, now: u64) -> Result<(), BlockError> {
        match self.store.schema_version()? {
            Some(version) if version == DB_SCHEMA_VERSION => {}
            Some(version) => {
                log_warn!(
                    "database schema {version} does not match {DB_SCHEMA_VERSION}, rebuilding"
                );
                self.store.rebuild(DB_SCHEMA_VERSION)?;
            }
            None => {
                self.store.rebuild(DB_SCHEMA_VERSION)?;
            }
        }

        let stored = self.store.load_raw_blocks()?;
        if stored.is_empty() {
            let genesis = self.currency.genesis_block().clone();
            let raw = RawBlock {
                block: encode(&genesis),
                transactions: Vec::new(),
            };
            self.push_validated(ROOT, &genesis, &[], raw, now, true, true)?;
            log_info!(
                "initialized new chain at genesis {}",
                self.currency.genesis_block_hash().short()
            );
            return Ok(());
        }

        for (height, raw) in stored {
            let (block, transactions) = decode_raw_parts(&raw)?;
            if height != self.chain_size() {
                return Err(BlockError::Store(ssix_storage::StoreError::Backend(
                    format!("stored chain has a gap at height {height}"),
                )));
            }
            self.push_validated(ROOT, &block, &transactions, raw, now, true, false)?;
        }
        log_info!(
            "loaded {} blocks, tip {}",
            self.chain_size(),
            self.tip().map(|b| b.hash.short()).unwrap_or_default()
        );
        Ok(())
    }

    pub fn submit_raw_block(&mut self, bytes: &[u8], now: u64) -> Result<BlockAdded, BlockError> {
        let raw: RawBlock = decode(bytes)?;
        let (block, transactions) = decode_raw_parts(&raw)?;
        self.submit_block(block, transactions, raw, now)
    }

    /// The §4.7 submit pipeline.
    pub fn submit_block(
        &mut self,
        block: Block,
        transactions: Vec<Transaction>,
        raw: RawBlock,
        now: u64,
    ) -> Result<BlockAdded, BlockError> {
        let hash = block.hash();
        if self.has_block(&hash) {
            return Err(BlockError::AlreadyHave);
        }

        if block.tx_hashes.len() != transactions.len() {
            return Err(BlockError::TxHashMismatch);
        }
        for (expected, tx) in block.tx_hashes.iter().zip(transactions.iter()) {
            if *expected != tx.hash() {
                return Err(BlockError::TxHashMismatch);
            }
        }

        // Locate the parent across every live segment.
        let mut parent: Option<(SegmentId, u32)> = None;
        for (id, segment) in self.segments.iter().enumerate() {
            let Some(segment) = segment else { continue };
            if let Some(found) = segment.block_by_hash(&block.header.prev_hash, u32::MAX) {
                parent = Some((id, found.height));
                break;
            }
        }
        let Some((parent_segment, parent_height)) = parent else {
            return Err(BlockError::Orphan);
        };
        let height = parent_height + 1;

        let extends_canonical =
            parent_segment == ROOT && parent_height + 1 == self.root().end_index();

        if !extends_canonical {
            // History behind the checkpoint horizon is frozen.
            if !self
                .checkpoints
                .is_alternative_block_allowed(self.chain_size(), height)
            {
                return Err(BlockError::AltBlockBehindCheckpoint);
            }
        }

        let (target, added) = if extends_canonical {
            let added = self.push_validated(ROOT, &block, &transactions, raw, now, false, true)?;
            (ROOT, added)
        } else {
            // Reuse an alternative segment whose tip is the parent, else
            // split a new child one past the parent block.
            let reusable = parent_segment != ROOT
                && self.segment(parent_segment).end_index() == height
                && !self.segment(parent_segment).is_empty();
            let target = if reusable {
                parent_segment
            } else {
                let id = self.allocate_segment(parent_segment, height);
                log_debug!(
                    "opened alternative segment {id} at height {height} off segment {parent_segment}"
                );
                id
            };
            let added = match self.push_validated(target, &block, &transactions, raw, now, false, false) {
                Ok(added) => added,
                Err(err) => {
                    if !reusable {
                        self.segments[target] = None;
                    }
                    return Err(err);
                }
            };
            (target, added)
        };

        let mut reorg = None;
        let mut on_canonical = target == ROOT;
        if target != ROOT {
            let canonical_work = self
                .root()
                .tip()
                .map(|tip| tip.cumulative_difficulty)
                .unwrap_or(0);
            if added.cumulative_difficulty > canonical_work {
                let summary = self.reorganize(target, now)?;
                on_canonical = true;
                reorg = Some(summary);
            }
        }

        Ok(BlockAdded {
            hash,
            height,
            cumulative_difficulty: added.cumulative_difficulty,
            on_canonical,
            reorg,
        })
    }

    fn allocate_segment(&mut self, parent: SegmentId, start_index: u32) -> SegmentId {
        let added_at = self.sequence;
        self.sequence += 1;
        let segment = Segment::new(Some(parent), start_index, added_at);
        if let Some(slot) = self.segments.iter().position(|slot| slot.is_none()) {
            self.segments[slot] = Some(segment);
            slot
        } else {
            self.segments.push(Some(segment));
            self.segments.len() - 1
        }
    }

    /// Validate `block` against the branch ending at `target`'s tip and
    /// append it. All checks precede any mutation.
    #[allow(clippy::too_many_arguments)]
    fn push_validated(
        &mut self,
        target: SegmentId,
        block: &Block,
        transactions: &[Transaction],
        raw: RawBlock,
        now: u64,
        trusted: bool,
        persist: bool,
    ) -> Result<CachedBlock, BlockError> {
        let height = self.segment(target).end_index();
        let view = self.branch_view(target, height);
        let hash = block.hash();

        let block_size = raw.block.len() as u64
            + raw
                .transactions
                .iter()
                .map(|blob| blob.len() as u64)
                .sum::<u64>();
        let size_limit = self.currency.max_block_size(height);
        if block_size > size_limit {
            return Err(BlockError::TooBig {
                size: block_size,
                limit: size_limit,
            });
        }

        check_block_version(block, &self.schedule, height)?;
        if !trusted {
            check_block_timestamp(block, &view, now)?;
        }

        // Canonical-path blocks at pinned heights must match the pin.
        if target == ROOT {
            let (ok, is_checkpoint) = self.checkpoints.check_block(height, &hash);
            if !ok {
                return Err(BlockError::CheckpointMismatch { height });
            }
            if is_checkpoint {
                log_info!("checkpoint satisfied at height {height}");
            }
        }

        let difficulty = self.branch_difficulty(target, height);
        if difficulty == 0 {
            return Err(BlockError::BadDifficulty);
        }
        if !trusted {
            let pow = self.oracle.pow_hash(&block.hashing_blob());
            if !check_hash(&pow, difficulty) {
                return Err(BlockError::BadProofOfWork);
            }
        }

        let parent_block = height
            .checked_sub(1)
            .and_then(|h| self.block_on_branch(target, height, h));
        let (parent_cd, parent_size, parent_coins) = match parent_block {
            Some(parent) => (
                parent.cumulative_difficulty,
                parent.cumulative_size,
                parent.generated_coins,
            ),
            None => (0, 0, 0),
        };

        // Transaction validation, all-or-nothing.
        let mut spent_in_block: HashSet<KeyImage> = HashSet::new();
        let mut signature_checks: Vec<SignatureCheck> = Vec::new();
        let mut total_fees: u64 = 0;
        for tx in transactions {
            check_transaction_semantic(tx, &self.currency, height, self.oracle.as_ref())?;
            let fee = check_transaction_fee(tx, &self.currency, height)?;
            total_fees = total_fees
                .checked_add(fee)
                .ok_or(BlockError::Transaction(TxError::AmountOverflow))?;
            let checks = check_transaction_inputs(
                tx,
                &view,
                &self.currency,
                height,
                now,
                &mut spent_in_block,
            )?;
            signature_checks.extend(checks);
        }
        if !trusted {
            verify_signature_checks(self.oracle.as_ref(), &signature_checks)?;
        }

        check_outputs(&block.coinbase, &self.currency, height, self.oracle.as_ref(), true)
            .map_err(BlockError::Transaction)?;
        let base_reward = self.currency.base_reward(parent_coins);
        check_coinbase(block, &self.currency, height, base_reward, total_fees)?;
        let reward = base_reward + total_fees;

        // Global index bases for every amount this block emits.
        let mut output_base: HashMap<u64, u64> = HashMap::new();
        for tx in std::iter::once(&block.coinbase).chain(transactions.iter()) {
            for output in &tx.prefix.outputs {
                output_base.entry(output.amount).or_insert_with(|| {
                    let mut count = 0u64;
                    let mut current = Some(target);
                    let mut bound = height;
                    while let Some(id) = current {
                        let segment = self.segment(id);
                        count += segment.output_count(output.amount, bound);
                        bound = bound.min(segment.start_index);
                        current = segment.parent;
                    }
                    count
                });
            }
        }

        // Persistence is staged before memory so a store failure leaves no
        // partial state anywhere. Startup replay skips it: the rows are
        // already on disk.
        if target == ROOT && persist {
            let mut batch = WriteBatch::new();
            let indexed: HashMap<Hash, Vec<u64>> = assign_global_indexes(
                block,
                transactions,
                &output_base,
            );
            self.store.stage_block(
                &mut batch,
                height,
                &hash,
                &raw,
                block,
                transactions,
                |tx_hash| indexed.get(tx_hash).cloned().unwrap_or_default(),
            );
            self.store.commit(batch)?;
        }

        let cached = self.segment_mut(target).push_block(
            block,
            transactions,
            raw,
            difficulty,
            parent_cd,
            parent_size,
            parent_coins,
            reward,
            &output_base,
        );
        Ok(cached)
    }

    /// Pop the canonical tip, staging the deletion.
    fn pop_canonical(&mut self) -> Result<DetachedBlock, BlockError> {
        let tip = self.root().tip().cloned().ok_or(BlockError::Orphan)?;
        let detached = self
            .segment_mut(ROOT)
            .pop_block()
            .ok_or(BlockError::Orphan)?;

        // After the in-memory pop the chain is exactly the context the block
        // was pushed against, so the global index assignment is recomputable.
        let mut output_base: HashMap<u64, u64> = HashMap::new();
        for tx in std::iter::once(&detached.block.coinbase).chain(detached.transactions.iter()) {
            for output in &tx.prefix.outputs {
                output_base
                    .entry(output.amount)
                    .or_insert_with(|| self.output_count(output.amount));
            }
        }
        let assigned = assign_global_indexes(
            &detached.block,
            &detached.transactions,
            &output_base,
        );

        let mut batch = WriteBatch::new();
        self.store.stage_pop(
            &mut batch,
            tip.height,
            &tip.hash,
            &detached.block,
            &detached.transactions,
            |tx_hash| assigned.get(tx_hash).cloned().unwrap_or_default(),
        );
        self.store.commit(batch)?;
        Ok(detached)
    }

    /// Switch the canonical chain to the branch ending in `winner`.
    fn reorganize(&mut self, winner: SegmentId, now: u64) -> Result<ReorgSummary, BlockError> {
        let old_tip = self.root().tip().map(|b| b.hash).unwrap_or_default();
        let winner_end = self.segment(winner).end_index();

        // The branch diverges where its outermost ancestor segment starts.
        let mut split_start = self.segment(winner).start_index;
        let mut cursor = self.segment(winner).parent;
        let mut path = vec![winner];
        while let Some(id) = cursor {
            if id == ROOT {
                break;
            }
            split_start = self.segment(id).start_index;
            path.push(id);
            cursor = self.segment(id).parent;
        }
        let split_height = split_start.saturating_sub(1);

        // A reorg may not rewrite pinned history.
        if !self
            .checkpoints
            .is_alternative_block_allowed(self.chain_size(), split_start)
        {
            return Err(BlockError::AltBlockBehindCheckpoint);
        }

        // Collect the winning blocks before any mutation.
        let mut incoming: Vec<(Block, Vec<Transaction>, RawBlock)> = Vec::new();
        for height in split_start..winner_end {
            let cached = self
                .block_on_branch(winner, winner_end, height)
                .ok_or(BlockError::Orphan)?;
            let raw = cached.raw.clone();
            let (block, transactions) = decode_raw_parts(&raw)?;
            incoming.push((block, transactions, raw));
        }

        // Detach the losing canonical suffix, newest first, then re-apply
        // the winners with full validation against the shared prefix.
        let mut detached: Vec<DetachedBlock> = Vec::new();
        while self.root().end_index() > split_start {
            detached.push(self.pop_canonical()?);
        }
        detached.reverse();

        let mut applied = 0usize;
        let mut failure: Option<BlockError> = None;
        for (block, transactions, raw) in &incoming {
            match self.push_validated(ROOT, block, transactions, raw.clone(), now, false, true) {
                Ok(_) => applied += 1,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        if let Some(err) = failure {
            // Roll back: drop the partially applied winners, restore the
            // original branch, and discard the poisoned segment.
            for _ in 0..applied {
                self.pop_canonical()?;
            }
            for original in &detached {
                self.push_validated(
                    ROOT,
                    &original.block,
                    &original.transactions,
                    original.raw.clone(),
                    now,
                    true,
                    true,
                )?;
            }
            for id in &path {
                self.segments[*id] = None;
            }
            log_warn!(
                "reorganization aborted at height {}: {err}",
                split_start + applied as u32
            );
            return Err(err);
        }

        // The winners are canonical now; their segments are redundant.
        let path_set: HashSet<SegmentId> = path.iter().copied().collect();
        for id in &path {
            self.segments[*id] = None;
        }

        // Keep the losing suffix as an alternative branch unless it is
        // frozen behind a checkpoint.
        let keep_detached = self
            .checkpoints
            .is_alternative_block_allowed(self.chain_size(), split_start);
        let detached_segment = if keep_detached && !detached.is_empty() {
            let id = self.allocate_segment(ROOT, split_start);
            let mut kept = Some(id);
            for original in &detached {
                if let Err(err) = self.push_validated(
                    id,
                    &original.block,
                    &original.transactions,
                    original.raw.clone(),
                    now,
                    true,
                    false,
                ) {
                    log_warn!("could not retain detached branch: {err}");
                    self.segments[id] = None;
                    kept = None;
                    break;
                }
            }
            kept
        } else {
            None
        };

        // Re-point surviving children of replaced segments.
        for slot in 0..self.segments.len() {
            let info = match self.segments[slot].as_ref() {
                Some(segment) => segment.parent.map(|parent| (parent, segment.start_index)),
                None => None,
            };
            let Some((parent, start_index)) = info else {
                continue;
            };
            if path_set.contains(&parent) {
                self.segment_mut(slot).parent = Some(ROOT);
            } else if parent == ROOT && start_index > split_start && Some(slot) != detached_segment
            {
                // Their canonical prefix moved into the detached branch.
                match detached_segment {
                    Some(new_parent) => {
                        self.segment_mut(slot).parent = Some(new_parent);
                    }
                    None => {
                        self.segments[slot] = None;
                    }
                }
            }
        }

        let new_tip = self.root().tip().map(|b| b.hash).unwrap_or_default();
        let detached_transactions = detached
            .iter()
            .flat_map(|block| block.transactions.iter().cloned())
            .collect();
        log_info!(
            "reorganized at height {split_height}: {} -> {}",
            old_tip.short(),
            new_tip.short()
        );
        Ok(ReorgSummary {
            split_height,
            old_tip,
            new_tip,
            detached_transactions,
        })
    }

    /// Operator repair: pop canonical blocks down to `height`, returning the
    /// detached transactions for the pool. Alternative branches above the
    /// new tip are discarded.
    pub fn rewind(&mut self, height: u32) -> Result<Vec<Transaction>, BlockError> {
        let mut detached_txs = Vec::new();
        while self.root().end_index() > height + 1 {
            let detached = self.pop_canonical()?;
            detached_txs.extend(detached.transactions);
        }
        let size = self.chain_size();
        for slot in 1..self.segments.len() {
            if let Some(segment) = self.segments[slot].as_ref() {
                if segment.start_index > size {
                    self.segments[slot] = None;
                }
            }
        }
        log_info!("rewound chain to height {height}");
        Ok(detached_txs)
    }

    pub fn flush(&self) -> Result<(), BlockError> {
        self.store.flush()?;
        Ok(())
    }
}

/// Decode the block and transaction blobs of a raw record.
fn decode_raw_parts(raw: &RawBlock) -> Result<(Block, Vec<Transaction>), BlockError> {
    let block: Block = decode(&raw.block)?;
    let mut transactions = Vec::with_capacity(raw.transactions.len());
    for blob in &raw.transactions {
        transactions.push(decode::<Transaction>(blob)?);
    }
    Ok((block, transactions))
}

/// Global indexes each transaction's outputs receive, given the per-amount
/// bases of the chain below the block.
fn assign_global_indexes(
    block: &Block,
    transactions: &[Transaction],
    output_base: &HashMap<u64, u64>,
) -> HashMap<Hash, Vec<u64>> {
    let mut offsets: HashMap<u64, u64> = HashMap::new();
    let mut assigned = HashMap::new();
    for tx in std::iter::once(&block.coinbase).chain(transactions.iter()) {
        let mut indexes = Vec::with_capacity(tx.prefix.outputs.len());
        for output in &tx.prefix.outputs {
            let base = output_base.get(&output.amount).copied().unwrap_or(0);
            let offset = offsets.entry(output.amount).or_insert(0);
            indexes.push(base + *offset);
            *offset += 1;
        }
        assigned.insert(tx.hash(), indexes);
    }
    assigned
}

