//! Local SQLite store, the durable source of truth on the device
//!
//! Provides:
//! - A namespaced key-value surface (`kv_store` table)
//! - The record collection under `assessments`
//! - Folder metadata, device identity and the wizard draft (see
//!   [`crate::folders`] and [`crate::identity`])
//!
//! Each key holds one JSON document. A document that fails to parse is reset
//! to its empty form and logged; the rest of the store keeps working.

use crate::error::{SyncError, SyncResult};
use crate::model::Record;
use async_trait::async_trait;
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tokio::sync::Mutex;

/// Keys of the local key-value surface
pub mod keys {
    pub const ASSESSMENTS: &str = "assessments";
    pub const FOLDERS: &str = "folders";
    pub const DEVICE_ID: &str = "deviceId";
    pub const DRAFT: &str = "draft";
}

const IN_MEMORY_PATH: &str = ":memory:";

/// Configuration for local database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalDbConfig {
    /// Path to the database file, or `:memory:`
    pub db_path: String,
    /// Namespace prefix for every key, so several installations can share a file
    pub namespace: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Whether to enable WAL mode
    pub enable_wal: bool,
    /// Overwrite freed pages so deleted assessments do not linger on disk
    pub enable_secure_delete: bool,
}

impl Default for LocalDbConfig {
    fn default() -> Self {
        Self {
            db_path: "fieldrisk_local.db".to_string(),
            namespace: "fieldrisk".to_string(),
            max_connections: 5,
            enable_wal: true,
            enable_secure_delete: true,
        }
    }
}

impl LocalDbConfig {
    /// Private in-memory database; lives as long as the pool.
    pub fn in_memory() -> Self {
        Self {
            db_path: IN_MEMORY_PATH.to_string(),
            max_connections: 1,
            enable_wal: false,
            ..Self::default()
        }
    }

    pub fn at_path(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY_PATH
    }
}

/// Record persistence contract used by the coordinator and share manager.
///
/// Calls finish their local I/O before returning and never touch the
/// network. `put` replaces by id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, record: &Record) -> SyncResult<()>;

    /// Upsert a batch in a single write.
    async fn put_many(&self, records: &[Record]) -> SyncResult<()>;

    async fn get_all(&self) -> SyncResult<Vec<Record>>;

    async fn get(&self, id: &str) -> SyncResult<Option<Record>>;

    /// Returns whether a record was removed.
    async fn delete(&self, id: &str) -> SyncResult<bool>;
}

/// Local database handle
pub struct LocalDatabase {
    pool: SqlitePool,
    namespace: String,
    /// Serializes read-modify-write cycles on collections
    write_lock: Mutex<()>,
}

impl LocalDatabase {
    /// Open (creating if needed) the local database
    pub async fn new(config: LocalDbConfig) -> SyncResult<Self> {
        let options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.db_path)
                .create_if_missing(true)
        };

        let journal_mode = if config.enable_wal && !config.is_in_memory() {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = options
            .journal_mode(journal_mode)
            .pragma(
                "secure_delete",
                if config.enable_secure_delete { "ON" } else { "OFF" },
            );

        let mut pool_options =
            SqlitePoolOptions::new().max_connections(config.max_connections.max(1));
        if config.is_in_memory() {
            // Dropping the only connection would drop the database with it
            pool_options = pool_options
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>);
        }

        let pool = pool_options.connect_with(options).await?;

        let db = Self {
            pool,
            namespace: config.namespace,
            write_lock: Mutex::new(()),
        };

        db.initialize_schema().await?;

        tracing::debug!(
            db_path = %config.db_path,
            namespace = %db.namespace,
            "Opened local database"
        );

        Ok(db)
    }

    /// Initialize database schema
    async fn initialize_schema(&self) -> SyncResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                namespace TEXT NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (namespace, key)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Raw value under `key`, if any
    pub(crate) async fn read_value(&self, key: &str) -> SyncResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_value(&self, key: &str, value: &str) -> SyncResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (namespace, key, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(namespace, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&self.namespace)
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub(crate) async fn remove_value(&self, key: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE namespace = ? AND key = ?")
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Decode the JSON document under `key`.
    ///
    /// `Ok(None)` when absent; `CorruptLocalData` when present but unreadable.
    pub(crate) async fn read_json<T: DeserializeOwned>(&self, key: &str) -> SyncResult<Option<T>> {
        match self.read_value(key).await? {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| SyncError::CorruptLocalData {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
        }
    }

    pub(crate) async fn write_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
    ) -> SyncResult<()> {
        let raw = serde_json::to_string(value)?;
        self.write_value(key, &raw).await
    }

    /// Load a collection, resetting it to empty if it does not parse.
    ///
    /// Caller holds the write lock.
    pub(crate) async fn load_collection<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> SyncResult<Vec<T>> {
        match self.read_json::<Vec<T>>(key).await {
            Ok(items) => Ok(items.unwrap_or_default()),
            Err(SyncError::CorruptLocalData { key, reason }) => {
                tracing::warn!(
                    key = %key,
                    reason = %reason,
                    "Persisted collection is corrupt; resetting it to empty"
                );
                self.write_value(&key, "[]").await?;
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Load a collection without the write lock. A corrupt value is reset
    /// only after taking the lock and reading it again.
    pub(crate) async fn read_collection<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> SyncResult<Vec<T>> {
        match self.read_json::<Vec<T>>(key).await {
            Ok(items) => Ok(items.unwrap_or_default()),
            Err(SyncError::CorruptLocalData { .. }) => {
                let _guard = self.lock_writes().await;
                self.load_collection(key).await
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn store_collection<T: Serialize>(
        &self,
        key: &str,
        items: &[T],
    ) -> SyncResult<()> {
        self.write_json(key, items).await
    }

    /// Hold while doing a read-modify-write on any collection
    pub(crate) async fn lock_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    /// Records filed under `folder_id`
    pub async fn records_in_folder(&self, folder_id: &str) -> SyncResult<Vec<Record>> {
        let records = self.get_all().await?;
        Ok(records.into_iter().filter(|r| r.folder_id == folder_id).collect())
    }

    /// Keep the in-progress wizard state
    pub async fn save_draft(&self, draft: &serde_json::Value) -> SyncResult<()> {
        let _guard = self.lock_writes().await;
        self.write_json(keys::DRAFT, draft).await
    }

    pub async fn load_draft(&self) -> SyncResult<Option<serde_json::Value>> {
        match self.read_json(keys::DRAFT).await {
            Err(SyncError::CorruptLocalData { .. }) => {
                let _guard = self.lock_writes().await;
                match self.read_json(keys::DRAFT).await {
                    Err(SyncError::CorruptLocalData { reason, .. }) => {
                        tracing::warn!(reason = %reason, "Draft is corrupt; discarding it");
                        self.remove_value(keys::DRAFT).await?;
                        Ok(None)
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    pub async fn clear_draft(&self) -> SyncResult<()> {
        let _guard = self.lock_writes().await;
        self.remove_value(keys::DRAFT).await
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Get database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Vacuum the database so freed pages of deleted records are reclaimed
    pub async fn vacuum(&self) -> SyncResult<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    /// Close database connection
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for LocalDatabase {
    async fn put(&self, record: &Record) -> SyncResult<()> {
        self.put_many(std::slice::from_ref(record)).await
    }

    async fn put_many(&self, records: &[Record]) -> SyncResult<()> {
        if records.is_empty() {
            return Ok(());
        }

        let _guard = self.lock_writes().await;
        let mut stored: Vec<Record> = self.load_collection(keys::ASSESSMENTS).await?;

        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => stored.push(record.clone()),
            }
        }

        self.store_collection(keys::ASSESSMENTS, &stored).await?;

        tracing::debug!(count = records.len(), "Stored records locally");
        Ok(())
    }

    async fn get_all(&self) -> SyncResult<Vec<Record>> {
        self.read_collection(keys::ASSESSMENTS).await
    }

    async fn get(&self, id: &str) -> SyncResult<Option<Record>> {
        let records = self.get_all().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }

    async fn delete(&self, id: &str) -> SyncResult<bool> {
        let _guard = self.lock_writes().await;
        let mut stored: Vec<Record> = self.load_collection(keys::ASSESSMENTS).await?;

        let before = stored.len();
        stored.retain(|r| r.id != id);
        let removed = stored.len() != before;

        if removed {
            self.store_collection(keys::ASSESSMENTS, &stored).await?;
            tracing::debug!(record_id = %id, "Deleted local record");
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn create_test_db() -> LocalDatabase {
        LocalDatabase::new(LocalDbConfig::in_memory()).await.unwrap()
    }

    fn record(id: &str, folder: &str) -> Record {
        let at = Utc.with_ymd_and_hms(2026, 10, 1, 9, 0, 0).unwrap();
        let mut record = Record::new(
            "Warehouse",
            "Racking inspection",
            folder,
            serde_json::json!({"hazards": ["falling stock"]}),
            at,
        );
        record.id = id.to_string();
        record
    }

    #[tokio::test]
    async fn test_empty_database() {
        let db = create_test_db().await;
        assert!(db.get_all().await.unwrap().is_empty());
        assert_eq!(db.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_put_is_idempotent_by_id() {
        let db = create_test_db().await;
        let mut r = record("a1", "f1");

        db.put(&r).await.unwrap();
        db.put(&r).await.unwrap();
        r.name = "Warehouse B".to_string();
        db.put(&r).await.unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], r);
    }

    #[tokio::test]
    async fn test_delete() {
        let db = create_test_db().await;
        db.put(&record("a1", "f1")).await.unwrap();
        db.put(&record("a2", "f1")).await.unwrap();

        assert!(db.delete("a1").await.unwrap());
        assert!(!db.delete("a1").await.unwrap());

        let ids: Vec<_> = db.get_all().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["a2".to_string()]);
    }

    #[tokio::test]
    async fn test_put_many_upserts() {
        let db = create_test_db().await;
        db.put(&record("a1", "f1")).await.unwrap();

        let mut changed = record("a1", "f2");
        changed.name = "Moved".to_string();
        db.put_many(&[changed.clone(), record("a2", "f1")]).await.unwrap();

        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(db.get("a1").await.unwrap(), Some(changed));
    }

    #[tokio::test]
    async fn test_records_in_folder() {
        let db = create_test_db().await;
        db.put(&record("a1", "f1")).await.unwrap();
        db.put(&record("a2", "f2")).await.unwrap();
        db.put(&record("a3", "f1")).await.unwrap();

        let in_f1: Vec<_> = db
            .records_in_folder("f1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(in_f1, vec!["a1".to_string(), "a3".to_string()]);
    }

    #[tokio::test]
    async fn test_corrupt_collection_resets_to_empty() {
        let db = create_test_db().await;
        db.put(&record("a1", "f1")).await.unwrap();

        db.write_value(keys::ASSESSMENTS, "{not json").await.unwrap();

        assert!(db.get_all().await.unwrap().is_empty());
        assert_eq!(db.read_value(keys::ASSESSMENTS).await.unwrap().as_deref(), Some("[]"));

        db.put(&record("a2", "f1")).await.unwrap();
        assert_eq!(db.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_reads_never_undo_repairing_put() {
        for round in 0..20 {
            let db = create_test_db().await;
            db.write_value(keys::ASSESSMENTS, "{not json").await.unwrap();

            let r = record(&format!("r{round}"), "f1");
            let (a, put, b, c) = tokio::join!(db.get_all(), db.put(&r), db.get_all(), db.get_all());
            put.unwrap();
            for read in [a, b, c] {
                let read = read.unwrap();
                assert!(read.is_empty() || read == vec![r.clone()]);
            }

            assert_eq!(db.get_all().await.unwrap(), vec![r], "round {round}");
        }
    }

    #[tokio::test]
    async fn test_read_repair_rechecks_under_lock() {
        let db = std::sync::Arc::new(create_test_db().await);
        db.write_value(keys::ASSESSMENTS, "{not json").await.unwrap();

        // The reader sees the corrupt value, then waits on the held lock
        let guard = db.lock_writes().await;
        let reader = tokio::spawn({
            let db = db.clone();
            async move { db.get_all().await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let r = record("kept", "f1");
        db.store_collection(keys::ASSESSMENTS, std::slice::from_ref(&r)).await.unwrap();
        drop(guard);

        assert_eq!(reader.await.unwrap().unwrap(), vec![r.clone()]);
        assert_eq!(db.get_all().await.unwrap(), vec![r]);
    }

    #[tokio::test]
    async fn test_wrong_shape_counts_as_corrupt() {
        let db = create_test_db().await;
        db.write_value(keys::ASSESSMENTS, r#"{"id":"a1"}"#).await.unwrap();

        assert!(db.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shared.db").to_string_lossy().into_owned();

        let a = LocalDatabase::new(LocalDbConfig {
            namespace: "a".into(),
            ..LocalDbConfig::at_path(&path)
        })
        .await
        .unwrap();
        let b = LocalDatabase::new(LocalDbConfig {
            namespace: "b".into(),
            ..LocalDbConfig::at_path(&path)
        })
        .await
        .unwrap();

        a.put(&record("a1", "f1")).await.unwrap();
        assert_eq!(a.get_all().await.unwrap().len(), 1);
        assert!(b.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("local.db").to_string_lossy().into_owned();

        let db = LocalDatabase::new(LocalDbConfig::at_path(&path)).await.unwrap();
        db.put(&record("a1", "f1")).await.unwrap();
        db.close().await;

        let reopened = LocalDatabase::new(LocalDbConfig::at_path(&path)).await.unwrap();
        assert_eq!(reopened.get("a1").await.unwrap(), Some(record("a1", "f1")));
    }

    #[tokio::test]
    async fn test_draft_slot() {
        let db = create_test_db().await;
        assert_eq!(db.load_draft().await.unwrap(), None);

        let draft = serde_json::json!({"activity": "Welding", "hazards": []});
        db.save_draft(&draft).await.unwrap();
        assert_eq!(db.load_draft().await.unwrap(), Some(draft));

        db.clear_draft().await.unwrap();
        assert_eq!(db.load_draft().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_draft_is_discarded() {
        let db = create_test_db().await;
        db.write_value(keys::DRAFT, "{{").await.unwrap();

        assert_eq!(db.load_draft().await.unwrap(), None);
        assert_eq!(db.read_value(keys::DRAFT).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_secure_delete_enabled() {
        let db = create_test_db().await;

        let row = sqlx::query("PRAGMA secure_delete")
            .fetch_one(db.pool())
            .await
            .unwrap();

        let secure_delete: i64 = row.try_get(0).unwrap();
        assert_eq!(secure_delete, 1, "secure_delete should be enabled");
    }

    #[tokio::test]
    async fn test_vacuum_operation() {
        let db = create_test_db().await;
        for i in 0..10 {
            db.put(&record(&format!("a{i}"), "f1")).await.unwrap();
        }
        for i in 0..10 {
            db.delete(&format!("a{i}")).await.unwrap();
        }

        db.vacuum().await.unwrap();
    }
}
