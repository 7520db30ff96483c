//! Client configuration types.
//!
//! This module defines the structs that map to the `config.yaml` file written
//! by `stepwise configure`. The configuration is passed explicitly to the
//! components that need it; nothing reads it from global state.

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result, StepwiseError};

/// Default Kubernetes namespace.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Default readiness wait timeout in seconds.
pub const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 300;

/// Maximum readiness wait timeout in seconds.
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 7200;

/// Default interval between readiness polls in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Minimum interval between readiness polls in seconds.
pub const MIN_POLL_INTERVAL_SECS: u64 = 1;

/// Maximum interval between readiness polls in seconds.
pub const MAX_POLL_INTERVAL_SECS: u64 = 600;

/// Default lifetime of an approval token in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// The root client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the deploy API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_api: Option<String>,
    /// Cluster identifier, e.g. `aws:123456789012:eu-central-1:kube-1`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_cluster: Option<String>,
    /// Namespace deployments live in.
    #[serde(default = "default_namespace")]
    pub kubernetes_namespace: String,
    /// User to act on behalf of and to record approvals as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Rollout defaults.
    #[serde(default)]
    pub rollout: RolloutConfig,
    /// Approval gate settings.
    #[serde(default)]
    pub approval: ApprovalConfig,
}

/// Rollout defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RolloutConfig {
    /// Maximum time to wait for readiness.
    #[serde(default = "default_wait_timeout")]
    pub wait_timeout_secs: u64,
    /// Time between readiness polls.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

/// Approval gate settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApprovalConfig {
    /// How long a proposed change stays executable.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,
    /// Approvals required before a deferred change may execute.
    #[serde(default)]
    pub min_approvals: u32,
    /// Directory for pending change records (defaults to the config dir).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<String>,
}

fn default_namespace() -> String {
    String::from(DEFAULT_NAMESPACE)
}

const fn default_wait_timeout() -> u64 {
    DEFAULT_WAIT_TIMEOUT_SECS
}

const fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_token_ttl() -> u64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            deploy_api: None,
            kubernetes_cluster: None,
            kubernetes_namespace: default_namespace(),
            user: None,
            rollout: RolloutConfig::default(),
            approval: ApprovalConfig::default(),
        }
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            wait_timeout_secs: DEFAULT_WAIT_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            min_approvals: 0,
            store_dir: None,
        }
    }
}

impl ClientConfig {
    /// Returns the deploy API URL.
    ///
    /// # Errors
    ///
    /// Returns an error if it has not been configured.
    pub fn deploy_api(&self) -> Result<&str> {
        self.deploy_api
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Self::missing("deploy_api"))
    }

    /// Returns the cluster identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if it has not been configured.
    pub fn kubernetes_cluster(&self) -> Result<&str> {
        self.kubernetes_cluster
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Self::missing("kubernetes_cluster"))
    }

    fn missing(field: &str) -> StepwiseError {
        StepwiseError::Config(ConfigError::validation(
            format!("{field} is not configured; run `stepwise configure --{}`", field.replace('_', "-")),
            field,
        ))
    }
}

impl RolloutConfig {
    /// Clamps a requested wait timeout to the supported range.
    #[must_use]
    pub fn clamp_timeout(secs: u64) -> u64 {
        secs.min(MAX_WAIT_TIMEOUT_SECS)
    }

    /// Clamps a requested poll interval to the supported range.
    #[must_use]
    pub fn clamp_interval(secs: u64) -> u64 {
        secs.clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS)
    }
}
