//! Change request types.
//!
//! A [`PendingChange`] records a proposed registry mutation until it is
//! executed. Its digest pins the change content at proposal time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::registry::{DeploymentKey, DeploymentManifest};

/// Identifies a proposed change.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalToken(String);

impl ApprovalToken {
    /// Generates a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the token text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the token has the shape of a generated token.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        Uuid::parse_str(&self.0).is_ok()
    }
}

impl From<String> for ApprovalToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ApprovalToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ApprovalToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registry mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Change {
    /// Register a new deployment.
    Create {
        /// What to register.
        manifest: DeploymentManifest,
    },
    /// Set the desired replica count.
    SetReplicas {
        /// Target deployment.
        key: DeploymentKey,
        /// New replica count.
        replicas: u32,
    },
    /// Label a deployment with a promotion stage.
    Promote {
        /// Target deployment.
        key: DeploymentKey,
        /// Stage to record on the deployment.
        stage: String,
    },
    /// Remove a deployment.
    Delete {
        /// Target deployment.
        key: DeploymentKey,
    },
}

impl Change {
    /// Returns the deployment this change targets.
    #[must_use]
    pub const fn target(&self) -> &DeploymentKey {
        match self {
            Self::Create { manifest } => &manifest.key,
            Self::SetReplicas { key, .. } | Self::Promote { key, .. } | Self::Delete { key } => key,
        }
    }

    /// Returns the operation name.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::SetReplicas { .. } => "scale",
            Self::Promote { .. } => "promote",
            Self::Delete { .. } => "delete",
        }
    }

    /// Computes the SHA-256 digest of the change content.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        // Serializing plain data into a Vec cannot fail.
        hasher.update(serde_json::to_vec(self).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create { manifest } => write!(
                f,
                "create {} with {} replicas",
                manifest.key, manifest.replicas
            ),
            Self::SetReplicas { key, replicas } => write!(f, "scale {key} to {replicas} replicas"),
            Self::Promote { key, stage } => write!(f, "promote {key} to stage {stage}"),
            Self::Delete { key } => write!(f, "delete {key}"),
        }
    }
}

/// An approval recorded against a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    /// Who approved.
    pub user: String,
    /// When.
    pub created_at: DateTime<Utc>,
}

/// A proposed change awaiting execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Token identifying the change.
    pub token: ApprovalToken,
    /// The mutation.
    pub change: Change,
    /// Digest of `change` at proposal time.
    pub digest: String,
    /// Who proposed the change.
    pub proposed_by: String,
    /// When the change was proposed.
    pub created_at: DateTime<Utc>,
    /// When the token stops being executable.
    pub expires_at: DateTime<Utc>,
    /// Recorded approvals.
    #[serde(default)]
    pub approvals: Vec<ApprovalRecord>,
    /// When the change was executed, if it was.
    #[serde(default)]
    pub executed_at: Option<DateTime<Utc>>,
}

impl PendingChange {
    /// Creates a new pending change with a fresh token.
    #[must_use]
    pub fn new(change: Change, proposed_by: &str, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token: ApprovalToken::generate(),
            digest: change.digest(),
            change,
            proposed_by: proposed_by.to_string(),
            created_at: now,
            expires_at: now + ttl,
            approvals: Vec::new(),
            executed_at: None,
        }
    }

    /// Checks if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns true if the change was executed.
    #[must_use]
    pub const fn is_executed(&self) -> bool {
        self.executed_at.is_some()
    }

    /// Returns true if the change still matches its proposal-time digest.
    ///
    /// The digest is stored in the same record as the change, so this catches
    /// accidental edits only. Anyone who can rewrite the record can also
    /// recompute the digest.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.change.digest() == self.digest
    }

    /// Returns true once the change expired more than `retention` ago.
    ///
    /// Executed changes are kept until the same point so they stay visible
    /// to `list-change-requests` for a while.
    #[must_use]
    pub fn is_stale(&self, retention: Duration) -> bool {
        Utc::now() > self.expires_at + retention
    }

    /// Records an approval; a user approving twice counts once.
    pub fn approve(&mut self, user: &str) {
        if self.approvals.iter().any(|a| a.user == user) {
            return;
        }
        self.approvals.push(ApprovalRecord {
            user: user.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Returns a short status word for listings.
    #[must_use]
    pub fn state(&self) -> &'static str {
        if self.is_executed() {
            "executed"
        } else if self.is_expired() {
            "expired"
        } else {
            "pending"
        }
    }
}
