//! Change store trait definition.
//!
//! This module defines the common interface for change request storage.

use async_trait::async_trait;

use crate::error::Result;
use super::change::{ApprovalToken, PendingChange};

/// Trait for change request storage backends.
#[async_trait]
pub trait ChangeStore: Send + Sync {
    /// Records a newly proposed change.
    ///
    /// Fails if a change with the same token already exists.
    async fn insert(&self, change: &PendingChange) -> Result<()>;

    /// Loads a change by token.
    ///
    /// Returns `None` if no change is recorded under the token.
    async fn get(&self, token: &ApprovalToken) -> Result<Option<PendingChange>>;

    /// Overwrites an existing change record.
    async fn update(&self, change: &PendingChange) -> Result<()>;

    /// Removes a change record.
    ///
    /// Returns false if nothing was recorded under the token.
    async fn remove(&self, token: &ApprovalToken) -> Result<bool>;

    /// Lists all recorded changes, oldest first.
    async fn list(&self) -> Result<Vec<PendingChange>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
