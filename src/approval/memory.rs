//! In-memory change store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{ApprovalError, Result, StepwiseError};

use super::change::{ApprovalToken, PendingChange};
use super::store::ChangeStore;

/// Change store that lives for one process.
#[derive(Debug, Default)]
pub struct MemoryChangeStore {
    changes: Mutex<BTreeMap<ApprovalToken, PendingChange>>,
}

impl MemoryChangeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<ApprovalToken, PendingChange>>> {
        self.changes
            .lock()
            .map_err(|_| StepwiseError::internal("change store lock poisoned"))
    }
}

#[async_trait]
impl ChangeStore for MemoryChangeStore {
    async fn insert(&self, change: &PendingChange) -> Result<()> {
        let mut changes = self.lock()?;
        if changes.contains_key(&change.token) {
            return Err(ApprovalError::storage(format!(
                "Change {} is already recorded",
                change.token
            ))
            .into());
        }
        changes.insert(change.token.clone(), change.clone());
        Ok(())
    }

    async fn get(&self, token: &ApprovalToken) -> Result<Option<PendingChange>> {
        Ok(self.lock()?.get(token).cloned())
    }

    async fn update(&self, change: &PendingChange) -> Result<()> {
        let mut changes = self.lock()?;
        let slot = changes
            .get_mut(&change.token)
            .ok_or_else(|| ApprovalError::UnknownToken {
                token: change.token.to_string(),
            })?;
        *slot = change.clone();
        Ok(())
    }

    async fn remove(&self, token: &ApprovalToken) -> Result<bool> {
        Ok(self.lock()?.remove(token).is_some())
    }

    async fn list(&self) -> Result<Vec<PendingChange>> {
        let mut changes: Vec<_> = self.lock()?.values().cloned().collect();
        changes.sort_by_key(|c| c.created_at);
        Ok(changes)
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
