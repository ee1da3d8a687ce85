use crate::{Batch, KeyValueDB, Operation, Result};
use ember_util::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

type MemoryTable = BTreeMap<Vec<u8>, Vec<u8>>;

/// Ordered in-memory backend, primarily for tests and ephemeral nodes.
#[derive(Default, Debug)]
pub struct MemoryKeyValueDB {
    db: Arc<RwLock<MemoryTable>>,
}

impl MemoryKeyValueDB {
    pub fn open() -> MemoryKeyValueDB {
        MemoryKeyValueDB::default()
    }

    pub fn len(&self) -> usize {
        self.db.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.read().is_empty()
    }
}

impl KeyValueDB for MemoryKeyValueDB {
    fn write(&self, batch: Batch) -> Result<()> {
        let mut db = self.db.write();
        for op in batch.operations {
            match op {
                Operation::Insert { key, value } => {
                    db.insert(key, value);
                }
                Operation::Delete { key } => {
                    db.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn read(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.read().get(key).cloned())
    }

    fn traverse(
        &self,
        prefix: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]) -> Result<()>,
    ) -> Result<()> {
        let db = self.db.read();
        for (key, value) in db.range(prefix.to_vec()..) {
            if !key.starts_with(prefix) {
                break;
            }
            callback(key, value)?;
        }
        Ok(())
    }

    fn delete_prefix(&self, prefix: &[u8]) -> Result<()> {
        let mut db = self.db.write();
        let keys: Vec<Vec<u8>> = db
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            db.remove(&key);
        }
        Ok(())
    }
}

// Clones share the underlying table.
impl Clone for MemoryKeyValueDB {
    fn clone(&self) -> Self {
        MemoryKeyValueDB {
            db: Arc::clone(&self.db),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_and_read() {
        let db = MemoryKeyValueDB::open();
        let mut batch = Batch::new();
        batch.insert(vec![0, 0], vec![0, 0, 0]);
        batch.insert(vec![1, 1], vec![1, 1, 1]);
        db.write(batch).unwrap();

        assert_eq!(Some(vec![0, 0, 0]), db.read(&[0, 0]).unwrap());
        assert_eq!(None, db.read(&[2, 2]).unwrap());
    }

    #[test]
    fn delete_in_batch() {
        let db = MemoryKeyValueDB::open();
        let mut batch = Batch::new();
        batch.insert(vec![5], vec![9]);
        batch.delete(vec![5]);
        db.write(batch).unwrap();
        assert_eq!(None, db.read(&[5]).unwrap());
    }

    #[test]
    fn traverse_respects_prefix_and_order() {
        let db = MemoryKeyValueDB::open();
        let mut batch = Batch::new();
        batch.insert(vec![b'e', 2], vec![2]);
        batch.insert(vec![b'e', 1], vec![1]);
        batch.insert(vec![b'f', 0], vec![9]);
        db.write(batch).unwrap();

        let mut seen = Vec::new();
        db.traverse(b"e", &mut |key, value| {
            seen.push((key.to_vec(), value.to_vec()));
            Ok(())
        })
        .unwrap();
        assert_eq!(seen, vec![(vec![b'e', 1], vec![1]), (vec![b'e', 2], vec![2])]);
    }

    #[test]
    fn delete_prefix_leaves_others() {
        let db = MemoryKeyValueDB::open();
        let mut batch = Batch::new();
        batch.insert(vec![b'e', 1], vec![1]);
        batch.insert(vec![b'e', 2], vec![2]);
        batch.insert(vec![b'V'], vec![3]);
        db.write(batch).unwrap();

        db.delete_prefix(b"e").unwrap();
        assert_eq!(db.len(), 1);
        assert_eq!(Some(vec![3]), db.read(b"V").unwrap());
    }
}
