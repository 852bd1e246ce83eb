//! Folder metadata kept under the `folders` key
//!
//! Folders and records have independent lifecycles: deleting a folder leaves
//! its records in place with a dangling `folder_id`.

use crate::error::{SyncError, SyncResult};
use crate::local_db::{keys, LocalDatabase};
use crate::model::Folder;
use uuid::Uuid;

/// Upper bound on stored folders. A persisted list at or above it is
/// treated as corrupt.
pub const MAX_FOLDERS: usize = 1000;

impl LocalDatabase {
    pub async fn list_folders(&self) -> SyncResult<Vec<Folder>> {
        let _guard = self.lock_writes().await;
        self.load_folders().await
    }

    // Caller holds the write lock.
    async fn load_folders(&self) -> SyncResult<Vec<Folder>> {
        let folders: Vec<Folder> = self.load_collection(keys::FOLDERS).await?;

        if folders.len() >= MAX_FOLDERS {
            tracing::warn!(
                count = folders.len(),
                max = MAX_FOLDERS,
                "Folder list exceeds limit; resetting it to empty"
            );
            self.store_collection::<Folder>(keys::FOLDERS, &[]).await?;
            return Ok(Vec::new());
        }

        Ok(folders)
    }

    pub async fn get_folder(&self, id: &str) -> SyncResult<Option<Folder>> {
        Ok(self.list_folders().await?.into_iter().find(|f| f.id == id))
    }

    /// Create a folder with a fresh id
    pub async fn add_folder(&self, name: &str) -> SyncResult<Folder> {
        let name = validate_name(name)?;
        let _guard = self.lock_writes().await;
        let mut folders = self.load_folders().await?;

        if folders.len() + 1 >= MAX_FOLDERS {
            return Err(SyncError::InvalidInput(format!(
                "cannot hold more than {} folders",
                MAX_FOLDERS - 1
            )));
        }

        let folder = Folder {
            id: Uuid::new_v4().to_string(),
            name,
        };
        folders.push(folder.clone());
        self.store_collection(keys::FOLDERS, &folders).await?;

        tracing::debug!(folder_id = %folder.id, "Added folder");
        Ok(folder)
    }

    pub async fn rename_folder(&self, id: &str, name: &str) -> SyncResult<Folder> {
        let name = validate_name(name)?;
        let _guard = self.lock_writes().await;
        let mut folders = self.load_folders().await?;

        let folder = folders
            .iter_mut()
            .find(|f| f.id == id)
            .ok_or_else(|| SyncError::NotFound(format!("folder {id}")))?;
        folder.name = name;
        let renamed = folder.clone();

        self.store_collection(keys::FOLDERS, &folders).await?;
        Ok(renamed)
    }

    /// Remove a folder. Its records are left untouched.
    pub async fn delete_folder(&self, id: &str) -> SyncResult<bool> {
        let _guard = self.lock_writes().await;
        let mut folders = self.load_folders().await?;

        let before = folders.len();
        folders.retain(|f| f.id != id);
        if folders.len() == before {
            return Ok(false);
        }

        self.store_collection(keys::FOLDERS, &folders).await?;
        tracing::debug!(folder_id = %id, "Deleted folder");
        Ok(true)
    }
}

fn validate_name(name: &str) -> SyncResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SyncError::InvalidInput("folder name cannot be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_db::{LocalDbConfig, RecordStore};
    use crate::model::Record;
    use chrono::Utc;

    async fn create_test_db() -> LocalDatabase {
        LocalDatabase::new(LocalDbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_add_rename_delete() {
        let db = create_test_db().await;

        let site = db.add_folder("  Site A ").await.unwrap();
        assert_eq!(site.name, "Site A");
        let depot = db.add_folder("Depot").await.unwrap();

        let renamed = db.rename_folder(&site.id, "Site A (north)").await.unwrap();
        assert_eq!(renamed.name, "Site A (north)");

        assert!(db.delete_folder(&depot.id).await.unwrap());
        assert!(!db.delete_folder(&depot.id).await.unwrap());

        assert_eq!(db.list_folders().await.unwrap(), vec![renamed]);
    }

    #[tokio::test]
    async fn test_rejects_blank_names() {
        let db = create_test_db().await;
        assert!(matches!(db.add_folder("   ").await, Err(SyncError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_rename_missing_folder() {
        let db = create_test_db().await;
        assert!(matches!(db.rename_folder("nope", "x").await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_does_not_cascade() {
        let db = create_test_db().await;
        let folder = db.add_folder("Temporary").await.unwrap();
        let record = Record::new(
            "Kitchen",
            "Knife handling",
            &folder.id,
            serde_json::json!({}),
            Utc::now(),
        );
        db.put(&record).await.unwrap();

        db.delete_folder(&folder.id).await.unwrap();

        let kept = db.get(&record.id).await.unwrap().unwrap();
        assert_eq!(kept.folder_id, folder.id);
    }

    #[tokio::test]
    async fn test_oversized_folder_list_resets() {
        let db = create_test_db().await;
        let folders: Vec<Folder> = (0..MAX_FOLDERS)
            .map(|i| Folder { id: i.to_string(), name: format!("F{i}") })
            .collect();
        db.store_collection(keys::FOLDERS, &folders).await.unwrap();

        assert!(db.list_folders().await.unwrap().is_empty());
        db.add_folder("Fresh").await.unwrap();
        assert_eq!(db.list_folders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_folder_list_resets() {
        let db = create_test_db().await;
        db.write_value(keys::FOLDERS, "not-json").await.unwrap();

        assert!(db.list_folders().await.unwrap().is_empty());
    }
}
