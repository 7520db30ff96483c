//! Local file-based change store.
//!
//! Each change request is one JSON file named after its token, so a
//! proposal made by one CLI invocation can be executed by a later one.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::config_dir;
use crate::error::{ApprovalError, Result, StepwiseError};

use super::change::{ApprovalToken, PendingChange};
use super::store::ChangeStore;

/// Change directory name.
const CHANGES_DIR: &str = "changes";

/// Local file-based change store.
#[derive(Debug)]
pub struct LocalChangeStore {
    /// Directory holding one file per change.
    base_dir: PathBuf,
}

impl LocalChangeStore {
    /// Creates a store in the default location under the user config dir.
    ///
    /// # Errors
    ///
    /// Returns an error if the config directory cannot be determined.
    pub fn new() -> Result<Self> {
        Ok(Self::with_base_dir(config_dir()?.join(CHANGES_DIR)))
    }

    /// Creates a store with a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Returns the store directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the file path for a token.
    fn change_path(&self, token: &ApprovalToken) -> PathBuf {
        self.base_dir.join(format!("{token}.json"))
    }

    /// Ensures the store directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating change directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                ApprovalError::storage(format!("Failed to create change directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reads and parses one change file.
    async fn read_change(path: &Path) -> Result<PendingChange> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            ApprovalError::storage(format!("Failed to read {}: {e}", path.display()))
        })?;

        serde_json::from_str(&content).map_err(|e| {
            StepwiseError::Approval(ApprovalError::storage(format!(
                "Failed to parse {}: {e}",
                path.display()
            )))
        })
    }

    /// Writes a change via a temp file and atomic rename.
    async fn write_change(&self, change: &PendingChange) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(change).map_err(|e| {
            ApprovalError::storage(format!("Failed to serialize change: {e}"))
        })?;

        let path = self.change_path(&change.token);
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            ApprovalError::storage(format!("Failed to create temp change file: {e}"))
        })?;

        file.write_all(content.as_bytes()).await.map_err(|e| {
            ApprovalError::storage(format!("Failed to write change file: {e}"))
        })?;

        file.sync_all().await.map_err(|e| {
            ApprovalError::storage(format!("Failed to sync change file: {e}"))
        })?;

        fs::rename(&temp_path, &path).await.map_err(|e| {
            ApprovalError::storage(format!("Failed to rename change file: {e}"))
        })?;

        debug!("Stored change {} at {}", change.token, path.display());
        Ok(())
    }
}

#[async_trait]
impl ChangeStore for LocalChangeStore {
    async fn insert(&self, change: &PendingChange) -> Result<()> {
        if self.change_path(&change.token).exists() {
            return Err(ApprovalError::storage(format!(
                "Change {} is already recorded",
                change.token
            ))
            .into());
        }
        self.write_change(change).await
    }

    async fn get(&self, token: &ApprovalToken) -> Result<Option<PendingChange>> {
        // Tokens become file names; anything else never matches.
        if !token.is_well_formed() {
            return Ok(None);
        }

        let path = self.change_path(token);
        if !path.exists() {
            return Ok(None);
        }

        Self::read_change(&path).await.map(Some)
    }

    async fn update(&self, change: &PendingChange) -> Result<()> {
        if !change.token.is_well_formed() || !self.change_path(&change.token).exists() {
            return Err(ApprovalError::UnknownToken {
                token: change.token.to_string(),
            }
            .into());
        }
        self.write_change(change).await
    }

    async fn remove(&self, token: &ApprovalToken) -> Result<bool> {
        if !token.is_well_formed() {
            return Ok(false);
        }

        let path = self.change_path(token);
        if !path.exists() {
            return Ok(false);
        }

        fs::remove_file(&path).await.map_err(|e| {
            ApprovalError::storage(format!("Failed to remove {}: {e}", path.display()))
        })?;

        debug!("Removed change {token}");
        Ok(true)
    }

    async fn list(&self) -> Result<Vec<PendingChange>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.base_dir).await.map_err(|e| {
            ApprovalError::storage(format!("Failed to list change directory: {e}"))
        })?;

        let mut changes = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            ApprovalError::storage(format!("Failed to list change directory: {e}"))
        })? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read_change(&path).await {
                Ok(change) => changes.push(change),
                Err(e) => warn!("Skipping unreadable change file: {e}"),
            }
        }

        changes.sort_by_key(|c| c.created_at);
        Ok(changes)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::Change;
    use crate::registry::DeploymentKey;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalChangeStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalChangeStore::with_base_dir(temp_dir.path().join("changes"));
        (store, temp_dir)
    }

    fn pending(replicas: u32) -> PendingChange {
        PendingChange::new(
            Change::SetReplicas {
                key: DeploymentKey::new("shop", "v1", "1").unwrap(),
                replicas,
            },
            "jdoe",
            Duration::seconds(60),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let (store, _temp) = create_test_store();
        let change = pending(3);

        store.insert(&change).await.expect("Failed to insert change");
        let loaded = store
            .get(&change.token)
            .await
            .expect("Failed to load change")
            .expect("Change should exist");

        assert_eq!(loaded, change);
    }

    #[tokio::test]
    async fn test_get_unknown_and_malformed() {
        let (store, _temp) = create_test_store();

        assert!(store.get(&ApprovalToken::generate()).await.unwrap().is_none());
        assert!(store.get(&ApprovalToken::from("../config")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_double_insert_fails() {
        let (store, _temp) = create_test_store();
        let change = pending(1);

        store.insert(&change).await.unwrap();
        assert!(store.insert(&change).await.is_err());
    }

    #[tokio::test]
    async fn test_update_persists() {
        let (store, _temp) = create_test_store();
        let mut change = pending(1);
        store.insert(&change).await.unwrap();

        change.approve("alice");
        store.update(&change).await.unwrap();

        let loaded = store.get(&change.token).await.unwrap().unwrap();
        assert_eq!(loaded.approvals.len(), 1);
    }

    #[tokio::test]
    async fn test_update_unknown_fails() {
        let (store, _temp) = create_test_store();
        let err = store.update(&pending(1)).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Approval(ApprovalError::UnknownToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_remove_deletes_file() {
        let (store, _temp) = create_test_store();
        let change = pending(1);
        store.insert(&change).await.unwrap();

        assert!(store.remove(&change.token).await.unwrap());
        assert!(store.get(&change.token).await.unwrap().is_none());
        assert!(!store.remove(&change.token).await.unwrap());
        assert!(!store.remove(&ApprovalToken::from("../config")).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_sorted_and_skips_garbage() {
        let (store, _temp) = create_test_store();
        let first = pending(1);
        let mut second = pending(2);
        second.created_at = first.created_at + Duration::seconds(1);
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();
        std::fs::write(store.base_dir().join("notes.txt"), "hello").unwrap();
        std::fs::write(store.base_dir().join("broken.json"), "{").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].token, first.token);
        assert_eq!(listed[1].token, second.token);
    }
}
