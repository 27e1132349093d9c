// Local SQLite mirror of the definitions table
// Same create/update/snapshot contract as the REST store, one column per record field

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

use crate::domain::errors::{StoreError, WriteError, WriteOperation};
use crate::domain::item::ItemKey;
use crate::domain::record::{CanonicalRecord, RecordField};
use crate::domain::repositories::RecordStore;
use crate::infrastructure::config::is_table_name;

pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create database directory {parent:?}"))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open SQLite store {path:?}"))?;

        info!("🗄️ SQLite store opened at {:?}", path);
        Ok(Self { pool })
    }

    /// Private in-memory database (single connection so all queries share it)
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("Failed to open in-memory SQLite store")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        if !is_table_name(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }
        sqlx::query(&create_table_sql(table))
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn write(
        &self,
        operation: WriteOperation,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<u64, WriteError> {
        let backend = |reason: String| WriteError::Backend {
            operation,
            key: key.clone(),
            reason,
        };
        self.ensure_table(table)
            .await
            .map_err(|e| backend(e.to_string()))?;

        let sql = match operation {
            WriteOperation::Create => insert_sql(table),
            WriteOperation::Update => update_sql(table),
        };
        let mut query = sqlx::query(&sql);
        for field in RecordField::ALL {
            query = query.bind(record.field(field).map(str::to_string));
        }
        if operation == WriteOperation::Update {
            query = query.bind(key.as_str().to_string());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| backend(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

fn quoted(name: &str) -> String {
    format!("\"{name}\"")
}

fn create_table_sql(table: &str) -> String {
    let columns: Vec<String> = RecordField::ALL
        .iter()
        .map(|field| match field {
            RecordField::Key => format!("{} TEXT NOT NULL UNIQUE", quoted(field.column())),
            _ => format!("{} TEXT", quoted(field.column())),
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} (PK_ID INTEGER PRIMARY KEY AUTOINCREMENT, {})",
        quoted(table),
        columns.join(", ")
    )
}

fn insert_sql(table: &str) -> String {
    let columns: Vec<String> = RecordField::ALL.iter().map(|f| quoted(f.column())).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quoted(table),
        columns.join(", "),
        placeholders
    )
}

fn update_sql(table: &str) -> String {
    let assignments: Vec<String> = RecordField::ALL
        .iter()
        .map(|f| format!("{} = ?", quoted(f.column())))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE {} = ?",
        quoted(table),
        assignments.join(", "),
        quoted(RecordField::Key.column())
    )
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn load_snapshot(&self, table: &str) -> Result<Vec<CanonicalRecord>, StoreError> {
        self.ensure_table(table).await?;
        let rows = sqlx::query(&format!("SELECT * FROM {} ORDER BY PK_ID", quoted(table)))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let mut columns = serde_json::Map::new();
            for field in RecordField::ALL {
                let value: Option<String> = row
                    .try_get(field.column())
                    .map_err(|e| StoreError::Database(e.to_string()))?;
                columns.insert(field.column().to_string(), value.into());
            }
            let record = serde_json::from_value(serde_json::Value::Object(columns))
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            records.push(record);
        }
        debug!("Loaded {} rows from SQLite table {}", records.len(), table);
        Ok(records)
    }

    async fn create(&self, table: &str, record: &CanonicalRecord) -> Result<(), WriteError> {
        self.write(WriteOperation::Create, table, &record.key, record)
            .await?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &ItemKey,
        record: &CanonicalRecord,
    ) -> Result<(), WriteError> {
        let affected = self.write(WriteOperation::Update, table, key, record).await?;
        if affected == 0 {
            return Err(WriteError::Backend {
                operation: WriteOperation::Update,
                key: key.clone(),
                reason: format!("no row in {table} has this key"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::DeployFlag;
    use tempfile::tempdir;

    fn record(key: &str, style: &str) -> CanonicalRecord {
        CanonicalRecord {
            channel: "UNIVERSAL".into(),
            active: "1".into(),
            key: ItemKey::new(key),
            app_name: Some("WorkMovr 4".into()),
            path: None,
            name: Some("Orders".into()),
            deployed_status: "Partial".into(),
            bridge_deployed: DeployFlag::from_display("Partial"),
            data_source: "Tbl_Orders".into(),
            authentication: String::new(),
            style: style.into(),
            localization: "English".into(),
            last_used_date: None,
            created_date: Some("01/05/2023".into()),
            created_by: None,
            last_modified_date: None,
            last_modified_by: None,
        }
    }

    #[tokio::test]
    async fn create_then_snapshot_round_trips() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.create("Pages", &record("k1", "Default")).await.unwrap();
        store.create("Pages", &record("k2", "Dark")).await.unwrap();

        let snapshot = store.load_snapshot("Pages").await.unwrap();
        assert_eq!(snapshot, vec![record("k1", "Default"), record("k2", "Dark")]);
    }

    #[tokio::test]
    async fn update_targets_one_key() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.create("Pages", &record("k1", "Default")).await.unwrap();
        store.create("Pages", &record("k2", "Default")).await.unwrap();

        store
            .update("Pages", &ItemKey::new("k2"), &record("k2", "Dark"))
            .await
            .unwrap();

        let snapshot = store.load_snapshot("Pages").await.unwrap();
        assert_eq!(snapshot[0].style, "Default");
        assert_eq!(snapshot[1].style, "Dark");
    }

    #[tokio::test]
    async fn duplicate_create_and_missing_update_fail() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.create("Pages", &record("k1", "Default")).await.unwrap();

        let duplicate = store.create("Pages", &record("k1", "Default")).await;
        assert!(matches!(duplicate, Err(WriteError::Backend { .. })));

        let missing = store
            .update("Pages", &ItemKey::new("nope"), &record("nope", "Dark"))
            .await;
        assert!(matches!(missing, Err(WriteError::Backend { .. })));
    }

    #[tokio::test]
    async fn rejects_unsafe_table_names() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let result = store.load_snapshot("Pages\"; DROP TABLE x; --").await;
        assert!(matches!(result, Err(StoreError::InvalidTable(_))));
    }

    #[tokio::test]
    async fn file_store_persists_between_opens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("pages.db");
        {
            let store = SqliteRecordStore::open(&path).await.unwrap();
            store.create("Pages", &record("k1", "Default")).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteRecordStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_snapshot("Pages").await.unwrap().len(), 1);
    }
}
