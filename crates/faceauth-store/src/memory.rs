//! In-process record store. Nothing survives the process.

use crate::{validate, RecordStore, SaveOutcome, StoreError};
use faceauth_core::UserRecord;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<BTreeMap<String, UserRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, UserRecord>>, StoreError> {
        self.records
            .read()
            .map_err(|_| StoreError::Unavailable("record lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, UserRecord>>, StoreError> {
        self.records
            .write()
            .map_err(|_| StoreError::Unavailable("record lock poisoned".into()))
    }
}

impl RecordStore for MemoryRecordStore {
    fn get_by_name(&self, name: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.read()?.get(name).cloned())
    }

    fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        validate(record)?;
        let mut records = self.write()?;
        if records.contains_key(&record.user_name) {
            return Err(StoreError::AlreadyExists(record.user_name.clone()));
        }
        records.insert(record.user_name.clone(), record.clone());
        Ok(())
    }

    fn update(&self, record: &UserRecord) -> Result<(), StoreError> {
        validate(record)?;
        let mut records = self.write()?;
        match records.get_mut(&record.user_name) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.user_name.clone())),
        }
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut records = self.write()?;
        let removed = records.len();
        records.clear();
        Ok(removed)
    }

    fn count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.len())
    }

    fn names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn save(&self, record: &UserRecord) -> Result<SaveOutcome, StoreError> {
        validate(record)?;
        let mut records = self.write()?;
        match records.get_mut(&record.user_name) {
            Some(existing) => {
                *existing = record.clone();
                Ok(SaveOutcome::Updated)
            }
            None => {
                records.insert(record.user_name.clone(), record.clone());
                Ok(SaveOutcome::Inserted)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faceauth_core::Embedding;
    use std::sync::Arc;
    use std::thread;

    fn record(name: &str, v: f32) -> UserRecord {
        let e = Embedding::new(vec![v; 4], None);
        UserRecord::new(name, e.clone(), e.clone(), e)
    }

    #[test]
    fn test_save_and_replace() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.save(&record("alice", 1.0)).unwrap(), SaveOutcome::Inserted);
        assert_eq!(store.save(&record("alice", 2.0)).unwrap(), SaveOutcome::Updated);
        assert_eq!(store.get_by_name("alice").unwrap().unwrap().front.values, vec![2.0; 4]);
    }

    #[test]
    fn test_insert_update_errors() {
        let store = MemoryRecordStore::new();
        assert!(matches!(store.update(&record("alice", 1.0)), Err(StoreError::NotFound(_))));
        store.insert(&record("alice", 1.0)).unwrap();
        assert!(matches!(store.insert(&record("alice", 1.0)), Err(StoreError::AlreadyExists(_))));
    }

    #[test]
    fn test_delete_all_counts() {
        let store = MemoryRecordStore::new();
        store.save(&record("a", 1.0)).unwrap();
        store.save(&record("b", 1.0)).unwrap();
        assert_eq!(store.delete_all().unwrap(), 2);
        assert!(store.get_by_name("a").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_saves_keep_one_record_per_name() {
        let store = Arc::new(MemoryRecordStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.save(&record("shared", i as f32)).unwrap())
            })
            .collect();

        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == SaveOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.count().unwrap(), 1);
    }
}
