//! In-memory record store
//!
//! Backs dry runs (seeded from the real snapshot, writes go nowhere) and
//! tests. Every write attempt is logged, and keys can be set up to fail.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::domain::errors::{StoreError, WriteError, WriteOperation};
use crate::domain::item::ItemKey;
use crate::domain::record::CanonicalRecord;
use crate::domain::repositories::RecordStore;

/// One write attempt as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub operation: WriteOperation,
    pub table: String,
    pub key: ItemKey,
}

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<String, Vec<CanonicalRecord>>,
    writes: Vec<WriteCall>,
    failing: HashSet<ItemKey>,
    snapshot_error: Option<StoreError>,
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    inner: Mutex<Inner>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-filled with `records` in `table`
    pub fn seeded(table: &str, records: Vec<CanonicalRecord>) -> Self {
        let store = Self::new();
        store.lock().tables.insert(table.to_string(), records);
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the data is still usable
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Make every write for `key` fail until [`Self::heal`] is called
    pub fn fail_writes_for(&self, key: impl Into<ItemKey>) {
        self.lock().failing.insert(key.into());
    }

    pub fn heal(&self, key: &ItemKey) {
        self.lock().failing.remove(key);
    }

    pub fn fail_snapshot(&self, error: StoreError) {
        self.lock().snapshot_error = Some(error);
    }

    pub fn writes(&self) -> Vec<WriteCall> {
        self.lock().writes.clone()
    }

    pub fn records(&self, table: &str) -> Vec<CanonicalRecord> {
        self.lock().tables.get(table).cloned().unwrap_or_default()
    }

    fn write(
        &self,
        operation: WriteOperation,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError> {
        let mut inner = self.lock();
        inner.writes.push(WriteCall {
            operation,
            table: table.to_string(),
            key: key.clone(),
        });

        if inner.failing.contains(key) {
            return Err(WriteError::Unreachable {
                operation,
                key: key.clone(),
                reason: "injected failure".to_string(),
            });
        }

        let rows = inner.tables.entry(table.to_string()).or_default();
        match operation {
            WriteOperation::Create => rows.push(record.clone()),
            WriteOperation::Update => {
                let mut matched = false;
                for row in rows.iter_mut().filter(|row| &row.key == key) {
                    *row = record.clone();
                    matched = true;
                }
                if !matched {
                    return Err(WriteError::Backend {
                        operation,
                        key: key.clone(),
                        reason: format!("no row in {table} has this key"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn load_snapshot(&self, table: &str) -> Result<Vec<CanonicalRecord>, StoreError> {
        let inner = self.lock();
        if let Some(error) = &inner.snapshot_error {
            return Err(error.clone());
        }
        Ok(inner.tables.get(table).cloned().unwrap_or_default())
    }

    async fn create(&self, table: &str, record: &CanonicalRecord) -> Result<(), WriteError> {
        self.write(WriteOperation::Create, table, &record.key, record)
    }

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError> {
        self.write(WriteOperation::Update, table, key, record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str) -> CanonicalRecord {
        serde_json::from_value(serde_json::json!({ "Caspio_App_Key": key })).unwrap()
    }

    #[tokio::test]
    async fn records_writes_and_applies_them() {
        let store = MemoryRecordStore::seeded("T", vec![record("k1")]);
        store.create("T", &record("k2")).await.unwrap();
        let mut changed = record("k1");
        changed.style = "Dark".into();
        store.update("T", &ItemKey::new("k1"), &changed).await.unwrap();

        let rows = store.load_snapshot("T").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].style, "Dark");
        assert_eq!(store.writes().len(), 2);
        assert_eq!(store.writes()[0].operation, WriteOperation::Create);
    }

    #[tokio::test]
    async fn injected_failures_until_healed() {
        let store = MemoryRecordStore::new();
        store.fail_writes_for("k1");
        assert!(store.create("T", &record("k1")).await.is_err());

        store.heal(&ItemKey::new("k1"));
        store.create("T", &record("k1")).await.unwrap();
        assert_eq!(store.records("T").len(), 1);
        assert_eq!(store.writes().len(), 2);
    }
}
