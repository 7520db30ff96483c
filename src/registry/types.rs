//! Deployment registry types.
//!
//! These types describe deployment objects as the registry reports them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{
    is_valid_application, is_valid_version, APPLICATION_PATTERN, VERSION_PATTERN,
};
use crate::error::{ConfigError, Result};

/// Label carrying the promotion stage of a deployment.
pub const STAGE_LABEL: &str = "stage";

/// Identity of a deployment: one per (application, version, release).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeploymentKey {
    /// Application name.
    pub application: String,
    /// Application version.
    pub version: String,
    /// Release identifier within the version.
    pub release: String,
}

impl DeploymentKey {
    /// Creates a validated deployment key.
    ///
    /// The key is used as a Kubernetes resource name, so every part must be
    /// DNS-subdomain safe.
    ///
    /// # Errors
    ///
    /// Returns an error if any part does not match its naming pattern.
    pub fn new(
        application: impl Into<String>,
        version: impl Into<String>,
        release: impl Into<String>,
    ) -> Result<Self> {
        let key = Self {
            application: application.into(),
            version: version.into(),
            release: release.into(),
        };

        if !is_valid_application(&key.application) {
            return Err(ConfigError::InvalidName {
                kind: "application",
                value: key.application,
                pattern: APPLICATION_PATTERN,
            }
            .into());
        }
        for (kind, value) in [("version", &key.version), ("release", &key.release)] {
            if !is_valid_version(value) {
                return Err(ConfigError::InvalidName {
                    kind,
                    value: value.clone(),
                    pattern: VERSION_PATTERN,
                }
                .into());
            }
        }

        Ok(key)
    }

    /// Returns the resource name, `<application>-<version>-<release>`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.application, self.version, self.release)
    }
}

impl fmt::Display for DeploymentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.application, self.version, self.release)
    }
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Replicas are still coming up (or none were requested yet).
    Pending,
    /// All desired replicas are ready.
    Active,
    /// Being scaled down; more replicas running than desired.
    Draining,
    /// Removed from the registry.
    Deleted,
}

impl DeploymentStatus {
    /// Derives the status from replica counts.
    #[must_use]
    pub const fn from_counts(desired: u32, ready: u32, unavailable: u32) -> Self {
        if ready > desired {
            Self::Draining
        } else if desired > 0 && ready == desired && unavailable == 0 {
            Self::Active
        } else {
            Self::Pending
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Deleted => "deleted",
        };
        write!(f, "{s}")
    }
}

/// A deployment as observed in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Deployment identity.
    pub key: DeploymentKey,
    /// Desired replica count.
    pub desired_replicas: u32,
    /// Replicas passing readiness checks.
    pub ready_replicas: u32,
    /// Replicas that are not available.
    pub unavailable_replicas: u32,
    /// When the deployment was created.
    pub created_at: DateTime<Utc>,
    /// The platform gave up on making progress (e.g. progress deadline exceeded).
    #[serde(default)]
    pub progress_failed: bool,
    /// Lifecycle status.
    pub status: DeploymentStatus,
    /// Labels set on the deployment object.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Deployment {
    /// Returns true if every desired replica is ready and none are unavailable.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready_replicas == self.desired_replicas && self.unavailable_replicas == 0
    }

    /// Returns the promotion stage, if the deployment has been promoted.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        self.labels.get(STAGE_LABEL).map(String::as_str)
    }
}

/// Everything needed to register a new deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    /// Deployment identity.
    pub key: DeploymentKey,
    /// Initial replica count.
    pub replicas: u32,
    /// Rendered manifest document.
    pub body: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_name() {
        let key = DeploymentKey::new("shop", "1.4.0", "7").unwrap();
        assert_eq!(key.name(), "shop-1.4.0-7");
        assert_eq!(key.to_string(), "shop-1.4.0-7");
    }

    #[test]
    fn test_key_rejects_bad_parts() {
        assert!(DeploymentKey::new("Shop", "1", "1").is_err());
        assert!(DeploymentKey::new("1shop", "1", "1").is_err());
        assert!(DeploymentKey::new("shop", "-1", "1").is_err());
        assert!(DeploymentKey::new("shop", "1", "r_1").is_err());
        assert!(DeploymentKey::new("shop", "v2", "b.3").is_ok());
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(DeploymentStatus::from_counts(0, 0, 0), DeploymentStatus::Pending);
        assert_eq!(DeploymentStatus::from_counts(3, 1, 2), DeploymentStatus::Pending);
        assert_eq!(DeploymentStatus::from_counts(3, 3, 0), DeploymentStatus::Active);
        assert_eq!(DeploymentStatus::from_counts(1, 3, 0), DeploymentStatus::Draining);
    }
}
