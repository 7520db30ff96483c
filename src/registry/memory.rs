//! In-memory deployment registry.
//!
//! Keeps deployments in a map instead of talking to a cluster. Readiness
//! does not progress on its own; callers drive it with [`MemoryRegistry::set_ready`]
//! and [`MemoryRegistry::mark_failed`]. Used for dry runs and tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::{RegistryError, Result, StepwiseError};

use super::store::DeploymentRegistry;
use super::types::{Deployment, DeploymentKey, DeploymentManifest, DeploymentStatus};

/// In-memory deployment registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    /// Deployments by key.
    deployments: Mutex<BTreeMap<DeploymentKey, Deployment>>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<DeploymentKey, Deployment>>> {
        self.deployments
            .lock()
            .map_err(|_| StepwiseError::internal("memory registry lock poisoned"))
    }

    fn not_found(key: &DeploymentKey) -> StepwiseError {
        StepwiseError::Registry(RegistryError::NotFound {
            deployment: key.name(),
        })
    }

    /// Inserts a deployment as-is, replacing any existing record.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry lock is poisoned.
    pub fn insert(&self, deployment: Deployment) -> Result<()> {
        self.lock()?.insert(deployment.key.clone(), deployment);
        Ok(())
    }

    /// Reports `ready` replicas as ready; the rest of the desired count is
    /// reported unavailable.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment does not exist.
    pub fn set_ready(&self, key: &DeploymentKey, ready: u32) -> Result<()> {
        let mut deployments = self.lock()?;
        let deployment = deployments.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        deployment.ready_replicas = ready;
        deployment.unavailable_replicas = deployment.desired_replicas.saturating_sub(ready);
        deployment.status = DeploymentStatus::from_counts(
            deployment.desired_replicas,
            deployment.ready_replicas,
            deployment.unavailable_replicas,
        );
        Ok(())
    }

    /// Flags the deployment as unable to make progress.
    ///
    /// # Errors
    ///
    /// Returns an error if the deployment does not exist.
    pub fn mark_failed(&self, key: &DeploymentKey) -> Result<()> {
        let mut deployments = self.lock()?;
        let deployment = deployments.get_mut(key).ok_or_else(|| Self::not_found(key))?;
        deployment.progress_failed = true;
        Ok(())
    }

    /// Returns the desired replica count of a deployment, if present.
    #[must_use]
    pub fn replicas(&self, key: &DeploymentKey) -> Option<u32> {
        self.lock()
            .ok()
            .and_then(|d| d.get(key).map(|d| d.desired_replicas))
    }

    /// Returns true if the deployment is registered.
    #[must_use]
    pub fn contains(&self, key: &DeploymentKey) -> bool {
        self.lock().is_ok_and(|d| d.contains_key(key))
    }
}

#[async_trait]
impl DeploymentRegistry for MemoryRegistry {
    async fn create_deployment(&self, manifest: &DeploymentManifest) -> Result<Deployment> {
        let mut deployments = self.lock()?;
        if deployments.contains_key(&manifest.key) {
            return Err(StepwiseError::Registry(RegistryError::AlreadyExists {
                deployment: manifest.key.name(),
            }));
        }

        let deployment = Deployment {
            key: manifest.key.clone(),
            desired_replicas: manifest.replicas,
            ready_replicas: 0,
            unavailable_replicas: manifest.replicas,
            created_at: Utc::now(),
            progress_failed: false,
            status: DeploymentStatus::Pending,
            labels: BTreeMap::new(),
        };
        deployments.insert(manifest.key.clone(), deployment.clone());
        debug!("Registered deployment {} in memory", manifest.key);

        Ok(deployment)
    }

    async fn set_replicas(&self, key: &DeploymentKey, replicas: u32) -> Result<Deployment> {
        let mut deployments = self.lock()?;
        let deployment = deployments.get_mut(key).ok_or_else(|| Self::not_found(key))?;

        deployment.desired_replicas = replicas;
        deployment.unavailable_replicas = replicas.saturating_sub(deployment.ready_replicas);
        deployment.status = DeploymentStatus::from_counts(
            deployment.desired_replicas,
            deployment.ready_replicas,
            deployment.unavailable_replicas,
        );

        Ok(deployment.clone())
    }

    async fn set_label(&self, key: &DeploymentKey, name: &str, value: &str) -> Result<Deployment> {
        let mut deployments = self.lock()?;
        let deployment = deployments.get_mut(key).ok_or_else(|| Self::not_found(key))?;

        deployment.labels.insert(name.to_string(), value.to_string());
        Ok(deployment.clone())
    }

    async fn get_status(&self, key: &DeploymentKey) -> Result<Deployment> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| Self::not_found(key))
    }

    async fn delete_deployment(&self, key: &DeploymentKey) -> Result<()> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(key))
    }

    async fn list_deployments(&self, application: &str) -> Result<Vec<Deployment>> {
        Ok(self
            .lock()?
            .values()
            .filter(|d| d.key.application == application)
            .cloned()
            .collect())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(version: &str, replicas: u32) -> DeploymentManifest {
        DeploymentManifest {
            key: DeploymentKey::new("shop", version, "1").unwrap(),
            replicas,
            body: serde_json::json!({ "kind": "Deployment" }),
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = MemoryRegistry::new();
        let created = registry.create_deployment(&manifest("v1", 2)).await.unwrap();

        assert_eq!(created.desired_replicas, 2);
        assert_eq!(created.unavailable_replicas, 2);

        let status = registry.get_status(&created.key).await.unwrap();
        assert_eq!(status, created);
    }

    #[tokio::test]
    async fn test_duplicate_create_fails() {
        let registry = MemoryRegistry::new();
        registry.create_deployment(&manifest("v1", 0)).await.unwrap();

        let err = registry.create_deployment(&manifest("v1", 0)).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Registry(RegistryError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_deployment_is_not_found() {
        let registry = MemoryRegistry::new();
        let key = DeploymentKey::new("shop", "v9", "1").unwrap();

        assert!(registry.get_status(&key).await.unwrap_err().is_not_found());
        assert!(registry.set_replicas(&key, 1).await.unwrap_err().is_not_found());
        assert!(registry.set_label(&key, "stage", "live").await.unwrap_err().is_not_found());
        assert!(registry.delete_deployment(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_by_application() {
        let registry = MemoryRegistry::new();
        registry.create_deployment(&manifest("v1", 1)).await.unwrap();
        registry.create_deployment(&manifest("v2", 1)).await.unwrap();
        registry
            .create_deployment(&DeploymentManifest {
                key: DeploymentKey::new("billing", "v1", "1").unwrap(),
                replicas: 1,
                body: serde_json::Value::Null,
            })
            .await
            .unwrap();

        let listed = registry.list_deployments("shop").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|d| d.key.application == "shop"));
    }

    #[tokio::test]
    async fn test_set_ready_updates_status() {
        let registry = MemoryRegistry::new();
        let created = registry.create_deployment(&manifest("v1", 3)).await.unwrap();

        registry.set_ready(&created.key, 3).unwrap();
        let status = registry.get_status(&created.key).await.unwrap();

        assert!(status.is_ready());
        assert_eq!(status.status, DeploymentStatus::Active);
    }

    #[tokio::test]
    async fn test_set_label_replaces_value() {
        let registry = MemoryRegistry::new();
        let created = registry.create_deployment(&manifest("v1", 1)).await.unwrap();
        assert_eq!(created.stage(), None);

        registry.set_label(&created.key, "stage", "canary").await.unwrap();
        let promoted = registry.set_label(&created.key, "stage", "live").await.unwrap();

        assert_eq!(promoted.stage(), Some("live"));
        assert_eq!(promoted.labels.len(), 1);
        assert_eq!(registry.get_status(&created.key).await.unwrap(), promoted);
    }
}
