use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::RwLock;

use crate::{Column, KeyValueStore, ScanResult, StoreError, WriteBatch, WriteOp};

type ColumnMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory backend; the reference semantics for tests.
#[derive(Default)]
pub struct MemoryStore {
    columns: [RwLock<ColumnMap>; Column::ALL.len()],
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn column(&self, column: Column) -> &RwLock<ColumnMap> {
        &self.columns[column.index()]
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let guard = self.column(column).read().expect("memory store lock");
        Ok(guard.get(key).cloned())
    }

    fn scan_prefix(&self, column: Column, prefix: &[u8]) -> Result<ScanResult, StoreError> {
        let guard = self.column(column).read().expect("memory store lock");
        let mut results = Vec::new();
        let range = guard.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded));
        for (key, value) in range {
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.clone(), value.clone()));
        }
        Ok(results)
    }

    fn write_batch(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        // Writers are serialized by the caller; per-column locks are only
        // needed to keep readers consistent within a single key.
        for op in batch.iter() {
            match op {
                WriteOp::Put { column, key, value } => {
                    let mut guard = self.column(*column).write().expect("memory store lock");
                    guard.insert(key.to_vec(), value.to_vec());
                }
                WriteOp::Delete { column, key } => {
                    let mut guard = self.column(*column).write().expect("memory store lock");
                    guard.remove(key.as_slice());
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        for column in Column::ALL {
            self.column(column)
                .write()
                .expect("memory store lock")
                .clear();
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
