//! Field-level reconciliation against the remote snapshot
//!
//! The snapshot is loaded once per run and only read afterwards. The set of
//! compared columns is fixed by [`COMPARED_FIELDS`]; columns outside it never
//! cause an update.

use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

use crate::domain::errors::StoreError;
use crate::domain::item::ItemKey;
use crate::domain::record::{CanonicalRecord, RecordField};
use crate::domain::repositories::RecordStore;

/// Columns compared to decide between update and skip.
///
/// `Caspio_Bridge_Deployed_YN` is deliberately absent: a change in the
/// normalized deploy flag alone does not rewrite the row.
pub const COMPARED_FIELDS: [RecordField; 16] = [
    RecordField::Channel,
    RecordField::Active,
    RecordField::Key,
    RecordField::AppName,
    RecordField::Path,
    RecordField::Name,
    RecordField::DeployedStatus,
    RecordField::DataSource,
    RecordField::Authentication,
    RecordField::Style,
    RecordField::Localization,
    RecordField::LastUsedDate,
    RecordField::CreatedDate,
    RecordField::CreatedBy,
    RecordField::LastModifiedDate,
    RecordField::LastModifiedBy,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Create,
    /// Row exists; `changed` lists the compared columns that differ
    Update { changed: Vec<RecordField> },
    Skip,
}

impl SyncAction {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update { .. } => "update",
            Self::Skip => "skip",
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Update { changed } => {
                let columns: Vec<&str> = changed.iter().map(|field| field.column()).collect();
                write!(f, "update [{}]", columns.join(", "))
            }
            other => f.write_str(other.label()),
        }
    }
}

/// Read-only index of stored records by key
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    table: String,
    records: HashMap<ItemKey, CanonicalRecord>,
}

impl RemoteSnapshot {
    /// Index rows by key. Rows without a key cannot be matched and are dropped;
    /// for duplicate keys the first row wins, as the store's key filter would.
    pub fn from_records(table: impl Into<String>, rows: Vec<CanonicalRecord>) -> Self {
        let table = table.into();
        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            if row.key.is_blank() {
                warn!("⚠️ Snapshot row without key ignored in table {}", table);
                continue;
            }
            if records.contains_key(&row.key) {
                warn!("⚠️ Duplicate key {} in table {}, keeping first row", row.key, table);
                continue;
            }
            records.insert(row.key.clone(), row);
        }
        Self { table, records }
    }

    pub async fn load(store: &dyn RecordStore, table: &str) -> Result<Self, StoreError> {
        let rows = store.load_snapshot(table).await?;
        debug!("Loaded {} snapshot rows from {}", rows.len(), table);
        Ok(Self::from_records(table, rows))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn get(&self, key: &ItemKey) -> Option<&CanonicalRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &ItemKey) -> bool {
        self.records.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ItemKey> {
        self.records.keys()
    }

    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.records.values()
    }
}

/// Compared columns whose values differ, in column order.
///
/// Values match exactly, except that a null cell and an empty one are the
/// same value: the store returns either for a blank cell, so a stored `""`
/// against a missing candidate value is not a change and does not trigger
/// an update.
pub fn changed_fields(stored: &CanonicalRecord, candidate: &CanonicalRecord) -> Vec<RecordField> {
    COMPARED_FIELDS
        .iter()
        .copied()
        .filter(|field| cell(stored, *field) != cell(candidate, *field))
        .collect()
}

fn cell(record: &CanonicalRecord, field: RecordField) -> &str {
    record.field(field).unwrap_or_default()
}

pub fn reconcile(candidate: &CanonicalRecord, snapshot: &RemoteSnapshot) -> SyncAction {
    match snapshot.get(&candidate.key) {
        None => SyncAction::Create,
        Some(stored) => {
            let changed = changed_fields(stored, candidate);
            if changed.is_empty() {
                SyncAction::Skip
            } else {
                SyncAction::Update { changed }
            }
        }
    }
}
