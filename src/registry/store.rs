//! Deployment registry trait definition.
//!
//! This module defines the narrow interface the rollout controller uses to
//! read and mutate deployment objects on the orchestration platform.

use async_trait::async_trait;

use crate::error::Result;
use super::types::{Deployment, DeploymentKey, DeploymentManifest};

/// Trait for deployment registry backends.
///
/// Every method is a single remote call. Implementations must not retry;
/// retrying is up to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentRegistry: Send + Sync {
    /// Registers a new deployment.
    ///
    /// Fails with `AlreadyExists` if the key is already registered.
    async fn create_deployment(&self, manifest: &DeploymentManifest) -> Result<Deployment>;

    /// Sets the desired replica count of a deployment.
    ///
    /// Fails with `NotFound` if the deployment does not exist.
    async fn set_replicas(&self, key: &DeploymentKey, replicas: u32) -> Result<Deployment>;

    /// Sets one label on a deployment, replacing any previous value.
    ///
    /// Fails with `NotFound` if the deployment does not exist.
    async fn set_label(&self, key: &DeploymentKey, name: &str, value: &str) -> Result<Deployment>;

    /// Reads the current status of a deployment.
    ///
    /// Fails with `NotFound` if the deployment does not exist.
    async fn get_status(&self, key: &DeploymentKey) -> Result<Deployment>;

    /// Removes a deployment.
    ///
    /// Fails with `NotFound` if the deployment does not exist.
    async fn delete_deployment(&self, key: &DeploymentKey) -> Result<()>;

    /// Lists all deployments of an application.
    async fn list_deployments(&self, application: &str) -> Result<Vec<Deployment>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
