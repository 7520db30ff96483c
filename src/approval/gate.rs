//! Approval gate for registry mutations.
//!
//! Every mutation the rollout controller makes passes through the gate. A
//! change is applied only through an immediate execute or through an explicit
//! execute of a valid, unexpired, not-yet-executed token.

use chrono::{Duration, Utc};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ApprovalError, Result, RolloutError, StepwiseError};
use crate::registry::{Deployment, DeploymentKey, DeploymentRegistry, STAGE_LABEL};

use super::change::{ApprovalToken, Change, PendingChange};
use super::store::ChangeStore;

/// Upper bound on token lifetime (one year).
const MAX_TTL_SECS: i64 = 366 * 24 * 60 * 60;

/// How a change reaches the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum Approval {
    /// Propose and execute in one step.
    Immediate(Change),
    /// Execute a previously proposed change.
    Deferred(ApprovalToken),
}

/// A change that has been applied to the registry.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    /// Token the change was recorded under.
    pub token: ApprovalToken,
    /// The applied change.
    pub change: Change,
    /// The deployment after the change (`None` after a delete).
    pub deployment: Option<Deployment>,
}

/// Gate settings.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Lifetime of a proposed change.
    pub ttl: Duration,
    /// Approvals required before a deferred execute.
    pub min_approvals: u32,
    /// Identity recorded on proposals and immediate approvals.
    pub user: String,
}

impl GateSettings {
    /// Builds settings from the client configuration.
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            ttl: Duration::seconds(
                i64::try_from(config.approval.token_ttl_secs)
                    .unwrap_or(i64::MAX)
                    .min(MAX_TTL_SECS),
            ),
            min_approvals: config.approval.min_approvals,
            user: config.user.clone().unwrap_or_else(default_user),
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self::from_config(&ClientConfig::default())
    }
}

/// Returns `<login>@<hostname>` for the current process.
#[must_use]
pub fn default_user() -> String {
    let host = hostname::get().map_or_else(
        |_| String::from("unknown"),
        |h| h.to_string_lossy().to_string(),
    );
    let login = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| String::from("pipeline"));

    format!("{login}@{host}")
}

/// Two-phase gate in front of the deployment registry.
pub struct ApprovalGate<'a, R: DeploymentRegistry, S: ChangeStore> {
    /// Registry changes are applied to.
    registry: &'a R,
    /// Where proposed changes are recorded.
    store: &'a S,
    /// Gate settings.
    settings: GateSettings,
}

impl<'a, R: DeploymentRegistry, S: ChangeStore> ApprovalGate<'a, R, S> {
    /// Creates a new gate.
    #[must_use]
    pub const fn new(registry: &'a R, store: &'a S, settings: GateSettings) -> Self {
        Self {
            registry,
            store,
            settings,
        }
    }

    /// Returns the gate settings.
    #[must_use]
    pub const fn settings(&self) -> &GateSettings {
        &self.settings
    }

    /// Records a change without applying it.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be recorded.
    pub async fn propose(&self, change: Change) -> Result<ApprovalToken> {
        let pending = PendingChange::new(change, &self.settings.user, self.settings.ttl);
        self.store.insert(&pending).await?;

        info!("Proposed change {}: {}", pending.token, pending.change);
        Ok(pending.token)
    }

    /// Records an approval for a pending change.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is unknown, expired or already executed.
    pub async fn approve(&self, token: &ApprovalToken, user: Option<&str>) -> Result<PendingChange> {
        let mut pending = self.load_executable(token).await?;
        let user = user.unwrap_or(&self.settings.user);

        pending.approve(user);
        self.store.update(&pending).await?;

        info!("Change {token} approved by {user}");
        Ok(pending)
    }

    /// Applies a proposed change exactly once.
    ///
    /// A failed registry call leaves the change unexecuted so the same token
    /// can be executed again.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is unknown, already executed, expired,
    /// insufficiently approved or tampered with, or if the registry call fails.
    pub async fn execute(&self, token: &ApprovalToken) -> Result<AppliedChange> {
        let mut pending = self.load_executable(token).await?;

        let approvals = pending.approvals.len();
        if approvals < self.settings.min_approvals as usize {
            return Err(ApprovalError::NotApproved {
                token: token.to_string(),
                approvals,
                required: self.settings.min_approvals,
            }
            .into());
        }

        if !pending.is_intact() {
            return Err(ApprovalError::Tampered {
                token: token.to_string(),
            }
            .into());
        }

        debug!("Executing change {token}: {}", pending.change);
        let deployment = self.perform(&pending.change).await?;

        pending.executed_at = Some(Utc::now());
        self.store.update(&pending).await?;

        info!("Executed change {token}: {}", pending.change);
        Ok(AppliedChange {
            token: pending.token,
            change: pending.change,
            deployment,
        })
    }

    /// Proposes, approves as the configured user, and executes a change.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the three steps fails.
    pub async fn propose_and_execute(&self, change: Change) -> Result<AppliedChange> {
        let token = self.propose(change).await?;
        self.approve(&token, None).await?;
        self.execute(&token).await
    }

    /// Single entry point for both approval paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the change cannot be applied.
    pub async fn apply(&self, approval: Approval) -> Result<AppliedChange> {
        match approval {
            Approval::Immediate(change) => self.propose_and_execute(change).await,
            Approval::Deferred(token) => self.execute(&token).await,
        }
    }

    /// Loads a recorded change.
    ///
    /// # Errors
    ///
    /// Returns `UnknownToken` if nothing is recorded under the token.
    pub async fn get(&self, token: &ApprovalToken) -> Result<PendingChange> {
        self.store.get(token).await?.ok_or_else(|| {
            StepwiseError::Approval(ApprovalError::UnknownToken {
                token: token.to_string(),
            })
        })
    }

    /// Lists all recorded changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list(&self) -> Result<Vec<PendingChange>> {
        self.store.list().await
    }

    /// Removes records that expired more than one TTL ago.
    ///
    /// Returns how many records were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn prune(&self) -> Result<usize> {
        let retention = self.settings.ttl.max(Duration::zero());
        let mut removed = 0;

        for pending in self.store.list().await? {
            if pending.is_stale(retention) && self.store.remove(&pending.token).await? {
                debug!("Pruned change {} ({})", pending.token, pending.state());
                removed += 1;
            }
        }

        Ok(removed)
    }

    /// Loads a change that may still be approved or executed.
    async fn load_executable(&self, token: &ApprovalToken) -> Result<PendingChange> {
        let pending = self.get(token).await?;

        if let Some(executed_at) = pending.executed_at {
            return Err(ApprovalError::AlreadyExecuted {
                token: token.to_string(),
                executed_at: executed_at.to_rfc3339(),
            }
            .into());
        }

        if pending.is_expired() {
            return Err(ApprovalError::TokenExpired {
                token: token.to_string(),
                expired_at: pending.expires_at.to_rfc3339(),
            }
            .into());
        }

        Ok(pending)
    }

    /// Issues the registry call for a change.
    async fn perform(&self, change: &Change) -> Result<Option<Deployment>> {
        match change {
            Change::Create { manifest } => {
                self.registry.create_deployment(manifest).await.map(Some)
            }
            Change::SetReplicas { key, replicas } => {
                self.registry.set_replicas(key, *replicas).await.map(Some)
            }
            Change::Promote { key, stage } => self
                .registry
                .set_label(key, STAGE_LABEL, stage)
                .await
                .map(Some),
            Change::Delete { key } => {
                self.ensure_drained(key).await?;
                self.registry.delete_deployment(key).await.map(|()| None)
            }
        }
    }

    /// Fails unless the deployment wants zero replicas right now.
    ///
    /// A delete may be executed long after it was proposed, so the drain
    /// state is read again at execute time.
    async fn ensure_drained(&self, key: &DeploymentKey) -> Result<()> {
        let deployment = self.registry.get_status(key).await?;
        if deployment.desired_replicas != 0 {
            return Err(RolloutError::NotDrained {
                deployment: key.name(),
                replicas: deployment.desired_replicas,
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::MemoryChangeStore;
    use crate::registry::{DeploymentKey, DeploymentManifest, MemoryRegistry};

    fn key() -> DeploymentKey {
        DeploymentKey::new("shop", "v1", "1").unwrap()
    }

    fn settings(min_approvals: u32) -> GateSettings {
        GateSettings {
            ttl: Duration::seconds(60),
            min_approvals,
            user: String::from("ci"),
        }
    }

    async fn registry_with_deployment() -> MemoryRegistry {
        let registry = MemoryRegistry::new();
        registry
            .create_deployment(&DeploymentManifest {
                key: key(),
                replicas: 1,
                body: serde_json::Value::Null,
            })
            .await
            .unwrap();
        registry
    }

    fn scale(replicas: u32) -> Change {
        Change::SetReplicas {
            key: key(),
            replicas,
        }
    }

    #[tokio::test]
    async fn test_propose_does_not_mutate() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let token = gate.propose(scale(5)).await.unwrap();

        assert_eq!(registry.replicas(&key()), Some(1));
        assert!(!gate.get(&token).await.unwrap().is_executed());
    }

    #[tokio::test]
    async fn test_execute_twice_fails_with_already_executed() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let token = gate.propose(scale(5)).await.unwrap();
        let applied = gate.execute(&token).await.unwrap();
        assert_eq!(applied.deployment.unwrap().desired_replicas, 5);
        assert_eq!(registry.replicas(&key()), Some(5));

        let err = gate.execute(&token).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Approval(ApprovalError::AlreadyExecuted { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let registry = MemoryRegistry::new();
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let err = gate.execute(&ApprovalToken::generate()).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Approval(ApprovalError::UnknownToken { .. })
        ));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(
            &registry,
            &store,
            GateSettings {
                ttl: Duration::seconds(-1),
                ..settings(0)
            },
        );

        let token = gate.propose(scale(5)).await.unwrap();
        let err = gate.execute(&token).await.unwrap_err();

        assert!(matches!(
            err,
            StepwiseError::Approval(ApprovalError::TokenExpired { .. })
        ));
        assert_eq!(registry.replicas(&key()), Some(1));
    }

    #[tokio::test]
    async fn test_required_approvals() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(1));

        let token = gate.propose(scale(2)).await.unwrap();
        let err = gate.execute(&token).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Approval(ApprovalError::NotApproved { approvals: 0, required: 1, .. })
        ));

        gate.approve(&token, Some("alice")).await.unwrap();
        gate.execute(&token).await.unwrap();
        assert_eq!(registry.replicas(&key()), Some(2));
    }

    #[tokio::test]
    async fn test_tampered_change_is_rejected() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let token = gate.propose(scale(2)).await.unwrap();
        let mut pending = gate.get(&token).await.unwrap();
        pending.change = scale(200);
        store.update(&pending).await.unwrap();

        let err = gate.execute(&token).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Approval(ApprovalError::Tampered { .. })
        ));
        assert_eq!(registry.replicas(&key()), Some(1));
    }

    #[tokio::test]
    async fn test_failed_execute_can_be_retried() {
        let registry = MemoryRegistry::new();
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let token = gate.propose(scale(3)).await.unwrap();
        let err = gate.execute(&token).await.unwrap_err();
        assert!(err.is_not_found());

        registry
            .create_deployment(&DeploymentManifest {
                key: key(),
                replicas: 0,
                body: serde_json::Value::Null,
            })
            .await
            .unwrap();

        gate.execute(&token).await.unwrap();
        assert_eq!(registry.replicas(&key()), Some(3));
    }

    #[tokio::test]
    async fn test_apply_dispatches_both_paths() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let applied = gate.apply(Approval::Immediate(scale(0))).await.unwrap();
        assert_eq!(registry.replicas(&key()), Some(0));
        let recorded = gate.get(&applied.token).await.unwrap();
        assert!(recorded.is_executed());
        assert_eq!(recorded.approvals[0].user, "ci");

        let token = gate.propose(Change::Delete { key: key() }).await.unwrap();
        let applied = gate.apply(Approval::Deferred(token)).await.unwrap();
        assert!(applied.deployment.is_none());
        assert!(!registry.contains(&key()));
    }

    #[tokio::test]
    async fn test_deferred_delete_rechecks_drain() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));
        gate.apply(Approval::Immediate(scale(0))).await.unwrap();

        let token = gate.propose(Change::Delete { key: key() }).await.unwrap();
        gate.apply(Approval::Immediate(scale(5))).await.unwrap();

        let err = gate.execute(&token).await.unwrap_err();
        assert!(matches!(
            err,
            StepwiseError::Rollout(RolloutError::NotDrained { replicas: 5, .. })
        ));
        assert!(registry.contains(&key()));
        assert!(!gate.get(&token).await.unwrap().is_executed());

        gate.apply(Approval::Immediate(scale(0))).await.unwrap();
        gate.execute(&token).await.unwrap();
        assert!(!registry.contains(&key()));
    }

    #[tokio::test]
    async fn test_promote_sets_stage_label() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let applied = gate
            .apply(Approval::Immediate(Change::Promote {
                key: key(),
                stage: String::from("live"),
            }))
            .await
            .unwrap();

        assert_eq!(applied.deployment.unwrap().stage(), Some("live"));
    }

    #[tokio::test]
    async fn test_prune_keeps_recent_records() {
        let registry = registry_with_deployment().await;
        let store = MemoryChangeStore::new();
        let gate = ApprovalGate::new(&registry, &store, settings(0));

        let old = PendingChange::new(scale(2), "ci", Duration::seconds(-3600));
        store.insert(&old).await.unwrap();
        let executed = gate.apply(Approval::Immediate(scale(3))).await.unwrap();
        let pending = gate.propose(scale(4)).await.unwrap();

        assert_eq!(gate.prune().await.unwrap(), 1);

        let left: Vec<_> = gate.list().await.unwrap().into_iter().map(|c| c.token).collect();
        assert_eq!(left.len(), 2);
        assert!(left.contains(&executed.token));
        assert!(left.contains(&pending));
        assert!(!left.contains(&old.token));
    }
}
