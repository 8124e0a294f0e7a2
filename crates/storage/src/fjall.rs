use std::path::Path;
use std::sync::RwLock;

use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

/// LSM-backed persistent store; one partition per column.
pub struct FjallStore {
    keyspace: Keyspace,
    partitions: RwLock<Vec<PartitionHandle>>,
}

fn backend_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl FjallStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let keyspace = Config::new(path).open().map_err(backend_err)?;
        let partitions = Self::open_partitions(&keyspace)?;
        Ok(Self {
            keyspace,
            partitions: RwLock::new(partitions),
        })
    }

    fn open_partitions(keyspace: &Keyspace) -> Result<Vec<PartitionHandle>, StoreError> {
        let mut partitions = Vec::with_capacity(Column::ALL.len());
        for column in Column::ALL {
            let handle = keyspace
                .open_partition(column.as_str(), PartitionCreateOptions::default())
                .map_err(backend_err)?;
            partitions.push(handle);
        }
        Ok(partitions)
    }

    fn partition(&self, column: Column) -> PartitionHandle {
        self.partitions.read().expect("partition lock")[column.index()].clone()
    }
}

impl KeyValueStore for FjallStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let value = self.partition(column).get(key).map_err(backend_err)?;
        Ok(value.map(|slice| slice.to_vec()))
    }

    fn contains(&self, column: Column, key: &[u8]) -> Result<bool, StoreError> {
        self.partition(column)
            .contains_key(key)
            .map_err(backend_err)
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let partition = self.partition(column);
        let mut results = Vec::new();
        for entry in partition.prefix(prefix) {
            let (key, value) = entry.map_err(backend_err)?;
            results.push((key.to_vec(), value.to_vec()));
        }
        Ok(results)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let partitions = self.partitions.read().expect("partition lock");
        let mut inner = self.keyspace.batch();
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    inner.insert(&partitions[column.index()], key.as_slice(), value.as_slice());
                }
                WriteOp::Delete { column, key } => {
                    inner.remove(&partitions[column.index()], key.as_slice());
                }
            }
        }
        inner.commit().map_err(backend_err)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut partitions = self.partitions.write().expect("partition lock");
        for handle in partitions.drain(..) {
            self.keyspace.delete_partition(handle).map_err(backend_err)?;
        }
        *partitions = Self::open_partitions(&self.keyspace)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(backend_err)
    }
}
