//! On-disk persistence for the root segment.
//!
//! Every push and pop stages one batch; nothing is visible on disk until
//! the hierarchy commits it, so a crash can only lose whole blocks.

use ssix_primitives::block::{Block, RawBlock};
use ssix_primitives::encoding::{decode, encode, Decoder, Encoder};
use ssix_primitives::transaction::Transaction;
use ssix_primitives::types::Hash;
use ssix_storage::{Column, KeyValueStore, StoreError, WriteBatch};

pub const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";

pub struct ChainStore<S> {
    store: S,
}

fn height_key(height: u32) -> [u8; 4] {
    height.to_be_bytes()
}

fn output_key(amount: u64, global_index: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&amount.to_be_bytes());
    key[8..].copy_from_slice(&global_index.to_be_bytes());
    key
}

impl<S: KeyValueStore> ChainStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn schema_version(&self) -> Result<Option<u32>, StoreError> {
        let Some(bytes) = self.store.get(Column::Meta, SCHEMA_VERSION_KEY)? else {
            return Ok(None);
        };
        if bytes.len() != 4 {
            return Ok(None);
        }
        Ok(Some(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }

    pub fn stage_schema_version(&self, batch: &mut WriteBatch, version: u32) {
        batch.put(Column::Meta, SCHEMA_VERSION_KEY, &version.to_le_bytes());
    }

    /// Wipe everything and stamp the current schema.
    pub fn rebuild(&self, version: u32) -> Result<(), StoreError> {
        self.store.clear()?;
        let mut batch = WriteBatch::new();
        self.stage_schema_version(&mut batch, version);
        self.store.write_batch(&batch)
    }

    /// Stage all writes for one appended block.
    #[allow(clippy::too_many_arguments)]
    pub fn stage_block(
        &self,
        batch: &mut WriteBatch,
        height: u32,
        block_hash: &Hash,
        raw: &RawBlock,
        block: &Block,
        transactions: &[Transaction],
        global_indexes: impl Fn(&Hash) -> Vec<u64>,
    ) {
        batch.put(Column::RawBlock, &height_key(height), &encode(raw));
        batch.put(
            Column::BlockIndex,
            block_hash.as_bytes(),
            &height.to_le_bytes(),
        );

        for (tx, blob) in std::iter::once((&block.coinbase, encode(&block.coinbase)))
            .chain(transactions.iter().zip(raw.transactions.iter().cloned()))
        {
            let tx_hash = tx.hash();
            let mut encoder = Encoder::new();
            encoder.write_varint(height as u64);
            encoder.write_var_bytes(&blob);
            batch.put(Column::Tx, tx_hash.as_bytes(), &encoder.into_inner());

            for image in tx.key_images() {
                batch.put(Column::KeyImage, image.as_bytes(), &height.to_le_bytes());
            }
            for (index, (output, global_index)) in tx
                .prefix
                .outputs
                .iter()
                .zip(global_indexes(&tx_hash))
                .enumerate()
            {
                let mut value = Vec::with_capacity(36);
                value.extend_from_slice(tx_hash.as_bytes());
                value.extend_from_slice(&(index as u32).to_le_bytes());
                batch.put(
                    Column::Output,
                    &output_key(output.amount, global_index),
                    &value,
                );
            }
        }
    }

    /// Stage the deletion of a popped tip block.
    pub fn stage_pop(
        &self,
        batch: &mut WriteBatch,
        height: u32,
        block_hash: &Hash,
        block: &Block,
        transactions: &[Transaction],
        global_indexes: impl Fn(&Hash) -> Vec<u64>,
    ) {
        batch.delete(Column::RawBlock, &height_key(height));
        batch.delete(Column::BlockIndex, block_hash.as_bytes());
        for tx in std::iter::once(&block.coinbase).chain(transactions.iter()) {
            let tx_hash = tx.hash();
            batch.delete(Column::Tx, tx_hash.as_bytes());
            for image in tx.key_images() {
                batch.delete(Column::KeyImage, image.as_bytes());
            }
            for (output, global_index) in
                tx.prefix.outputs.iter().zip(global_indexes(&tx_hash))
            {
                batch.delete(Column::Output, &output_key(output.amount, global_index));
            }
        }
    }

    pub fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.store.write_batch(&batch)
    }

    /// Raw blocks in height order, for startup replay.
    pub fn load_raw_blocks(&self) -> Result<Vec<(u32, RawBlock)>, StoreError> {
        let entries = self.store.scan_prefix(Column::RawBlock, &[])?;
        let mut blocks = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            if key.len() != 4 {
                return Err(StoreError::Backend(format!(
                    "raw block key of length {}",
                    key.len()
                )));
            }
            let height = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
            let raw: RawBlock = decode(&value)
                .map_err(|err| StoreError::Backend(format!("raw block {height}: {err}")))?;
            blocks.push((height, raw));
        }
        Ok(blocks)
    }

    pub fn block_height(&self, hash: &Hash) -> Result<Option<u32>, StoreError> {
        let Some(bytes) = self.store.get(Column::BlockIndex, hash.as_bytes())? else {
            return Ok(None);
        };
        if bytes.len() != 4 {
            return Ok(None);
        }
        Ok(Some(u32::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3],
        ])))
    }

    /// Stored transaction: `(block height, blob)`.
    pub fn transaction(&self, hash: &Hash) -> Result<Option<(u32, Vec<u8>)>, StoreError> {
        let Some(bytes) = self.store.get(Column::Tx, hash.as_bytes())? else {
            return Ok(None);
        };
        let mut decoder = Decoder::new(&bytes);
        let height = decoder
            .read_varint()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        let blob = decoder
            .read_var_bytes()
            .map_err(|err| StoreError::Backend(err.to_string()))?;
        Ok(Some((height as u32, blob)))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.store.flush()
    }
}
