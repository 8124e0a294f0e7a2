//! Ordered byte-map abstraction over the chain database.
//!
//! The chain store sees column families, point lookups, prefix scans, and
//! atomic multi-key batches; which engine provides them is a backend
//! detail.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

pub mod memory;

#[cfg(feature = "fjall")]
pub mod fjall;

#[derive(Debug)]
pub enum StoreError {
    Backend(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Column families of the chain database.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Column {
    /// height → raw block record (block blob + tx blobs).
    RawBlock,
    /// block hash → height.
    BlockIndex,
    /// tx hash → { block index, blob }.
    Tx,
    /// key image → height it was accepted at.
    KeyImage,
    /// amount ‖ global index → { tx hash, output index }.
    Output,
    /// schema version and other node-local metadata.
    Meta,
}

impl Column {
    pub const ALL: [Column; 6] = [
        Column::RawBlock,
        Column::BlockIndex,
        Column::Tx,
        Column::KeyImage,
        Column::Output,
        Column::Meta,
    ];

    pub const fn index(self) -> usize {
        match self {
            Column::RawBlock => 0,
            Column::BlockIndex => 1,
            Column::Tx => 2,
            Column::KeyImage => 3,
            Column::Output => 4,
            Column::Meta => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Column::RawBlock => "raw_block",
            Column::BlockIndex => "block_idx",
            Column::Tx => "tx",
            Column::KeyImage => "key_image",
            Column::Output => "output",
            Column::Meta => "meta",
        }
    }
}

type KeyBuf = SmallVec<[u8; 64]>;
type ValueBuf = SmallVec<[u8; 64]>;

#[derive(Clone, Debug)]
pub enum WriteOp {
    Put {
        column: Column,
        key: KeyBuf,
        value: ValueBuf,
    },
    Delete {
        column: Column,
        key: KeyBuf,
    },
}

/// Ordered set of writes applied atomically by `write_batch`.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, column: Column, key: &[u8], value: &[u8]) {
        self.ops.push(WriteOp::Put {
            column,
            key: KeyBuf::from_slice(key),
            value: ValueBuf::from_slice(value),
        });
    }

    pub fn delete(&mut self, column: Column, key: &[u8]) {
        self.ops.push(WriteOp::Delete {
            column,
            key: KeyBuf::from_slice(key),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriteOp> {
        self.ops.iter()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.get(column, key)?.is_some())
    }
    /// Entries whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError>;
    /// Apply every op or none.
    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError>;
    /// Drop all data in every column.
    fn clear(&self) -> Result<(), StoreError>;
    /// Flush buffered writes to durable storage.
    fn flush(&self) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Arc<T> {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.as_ref().get(column, key)
    }

    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        self.as_ref().contains(column, key)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        self.as_ref().scan_prefix(column, prefix)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        self.as_ref().write_batch(batch)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.as_ref().clear()
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.as_ref().flush()
    }
}
