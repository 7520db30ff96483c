//! Rollout controller.
//!
//! Drives a deployment through `Created`, `Switching`, `FullyOn`, `Drained`
//! and `Deleted`. Every mutation goes through the approval gate, either
//! applied immediately or proposed for a later execute.
//!
//! The controller holds no state between invocations; replica targets are
//! derived from `(total_desired, step)` alone, so re-running a step after a
//! partial failure converges on the same counts.

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::approval::{
    AppliedChange, Approval, ApprovalGate, ApprovalToken, Change, ChangeStore, GateSettings,
};
use crate::config::{is_valid_stage, STAGE_PATTERN};
use crate::error::{ConfigError, RegistryError, Result, RolloutError};
use crate::registry::{Deployment, DeploymentKey, DeploymentManifest, DeploymentRegistry};

use super::prober::{ReadinessProber, ReadinessReport};
use super::split::{Fraction, ReplicaSplit, RolloutPlan};

/// Whether mutations are applied now or proposed for later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Apply the change immediately.
    Execute,
    /// Record the change and hand back a token.
    #[default]
    Propose,
}

impl ExecutionMode {
    /// Maps an `--execute` flag to a mode.
    #[must_use]
    pub const fn from_flag(execute: bool) -> Self {
        if execute { Self::Execute } else { Self::Propose }
    }
}

/// Result of submitting one change.
#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    /// The change was applied.
    Applied(AppliedChange),
    /// The change was recorded under a token.
    Proposed(ApprovalToken),
}

impl ChangeOutcome {
    /// Returns the token the change is recorded under.
    #[must_use]
    pub const fn token(&self) -> &ApprovalToken {
        match self {
            Self::Applied(applied) => &applied.token,
            Self::Proposed(token) => token,
        }
    }

    /// Returns true if the change reached the registry.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

/// Where a rollout stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RolloutState {
    /// Registered, no share of the replicas yet.
    Created,
    /// Partway through the traffic shift.
    Switching {
        /// Current step.
        step: RolloutPlan,
    },
    /// All replicas on the new deployment.
    FullyOn,
    /// The old deployment runs no replicas.
    Drained,
    /// The old deployment has been removed.
    Deleted,
}

impl RolloutState {
    /// State reached after switching at `plan`.
    #[must_use]
    pub const fn after_switch(plan: RolloutPlan) -> Self {
        if plan.current_step == 0 {
            Self::Created
        } else if plan.is_final() {
            Self::FullyOn
        } else {
            Self::Switching { step: plan }
        }
    }

    /// State reached after deleting old deployments: `Deleted` once every
    /// delete has been applied, `Drained` while any is only proposed.
    #[must_use]
    pub fn after_retire(changes: &[ChangeOutcome]) -> Self {
        if changes.iter().all(ChangeOutcome::is_applied) {
            Self::Deleted
        } else {
            Self::Drained
        }
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Switching { step } => write!(f, "switching ({step})"),
            Self::FullyOn => write!(f, "fully on"),
            Self::Drained => write!(f, "drained"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Result of one switch step.
#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    /// Replica targets for this step.
    pub split: ReplicaSplit,
    /// State after the step.
    pub state: RolloutState,
    /// One outcome per issued change, new deployment first.
    pub changes: Vec<ChangeOutcome>,
}

/// Result of retiring old deployments.
#[derive(Debug, Clone)]
pub struct RetireOutcome {
    /// State after the deletes.
    pub state: RolloutState,
    /// One outcome per deleted deployment.
    pub changes: Vec<ChangeOutcome>,
}

/// Rollout state machine over a registry and an approval gate.
pub struct RolloutController<'a, R: DeploymentRegistry, S: ChangeStore> {
    /// Registry for reads.
    registry: &'a R,
    /// Gate for every mutation.
    gate: ApprovalGate<'a, R, S>,
}

impl<'a, R: DeploymentRegistry, S: ChangeStore> RolloutController<'a, R, S> {
    /// Creates a new controller.
    #[must_use]
    pub const fn new(registry: &'a R, store: &'a S, settings: GateSettings) -> Self {
        Self {
            registry,
            gate: ApprovalGate::new(registry, store, settings),
        }
    }

    /// Returns the approval gate mutations go through.
    #[must_use]
    pub const fn gate(&self) -> &ApprovalGate<'a, R, S> {
        &self.gate
    }

    /// Registers a new deployment with `replicas_hint` replicas (default 0).
    ///
    /// # Errors
    ///
    /// Returns `AlreadyExists` if the deployment is already registered, or
    /// the registry or gate error.
    pub async fn create(
        &self,
        mut manifest: DeploymentManifest,
        replicas_hint: Option<u32>,
        mode: ExecutionMode,
    ) -> Result<ChangeOutcome> {
        match self.registry.get_status(&manifest.key).await {
            Ok(_) => {
                return Err(RegistryError::AlreadyExists {
                    deployment: manifest.key.name(),
                }
                .into());
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        manifest.replicas = replicas_hint.unwrap_or(0);
        info!(
            "Creating deployment {} with {} replicas",
            manifest.key, manifest.replicas
        );

        self.submit(Change::Create { manifest }, mode).await
    }

    /// Shifts replicas from `old` to `new` at `step` of `total_desired`.
    ///
    /// The new deployment is scaled first, then the old one. The two calls
    /// are independent; if the second fails, re-running the same step
    /// reproduces the same targets. Steps must not go backwards; that is up
    /// to the caller.
    ///
    /// # Errors
    ///
    /// Returns the registry or gate error of the first failing change.
    pub async fn switch(
        &self,
        old: &DeploymentKey,
        new: &DeploymentKey,
        step: Fraction,
        total_desired: u32,
        mode: ExecutionMode,
    ) -> Result<SwitchOutcome> {
        let plan = RolloutPlan::from(step);
        let split = plan.split(total_desired)?;

        info!(
            "Switching {old} -> {new} at {plan}: {} old, {} new of {total_desired}",
            split.old_replicas, split.new_replicas
        );

        let mut changes = Vec::with_capacity(2);
        changes.push(
            self.submit(
                Change::SetReplicas {
                    key: new.clone(),
                    replicas: split.new_replicas,
                },
                mode,
            )
            .await?,
        );
        changes.push(
            self.submit(
                Change::SetReplicas {
                    key: old.clone(),
                    replicas: split.old_replicas,
                },
                mode,
            )
            .await?,
        );

        Ok(SwitchOutcome {
            split,
            state: RolloutState::after_switch(plan),
            changes,
        })
    }

    /// Runs one rollout step for `new` against the application's previous
    /// deployments.
    ///
    /// The newest previous deployment takes the old side of the split; any
    /// older ones are scaled to zero. `total_desired` defaults to the sum of
    /// desired replicas across the application.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `new` does not exist, `NoPreviousDeployment` if
    /// it is the only deployment, or the first failing change.
    pub async fn switch_from_previous(
        &self,
        new: &DeploymentKey,
        step: Fraction,
        total_desired: Option<u32>,
        mode: ExecutionMode,
    ) -> Result<SwitchOutcome> {
        self.registry.get_status(new).await?;

        let total = match total_desired {
            Some(total) => total,
            None => self.total_replicas(&new.application).await?,
        };

        let previous = self.previous_deployments(new).await?;
        let Some((old, stale)) = previous.split_first() else {
            return Err(RolloutError::NoPreviousDeployment {
                application: new.application.clone(),
                deployment: new.name(),
            }
            .into());
        };

        let mut outcome = self.switch(&old.key, new, step, total, mode).await?;

        for deployment in stale.iter().filter(|d| d.desired_replicas > 0) {
            warn!(
                "Scaling older deployment {} to 0 replicas",
                deployment.key
            );
            outcome.changes.push(
                self.submit(
                    Change::SetReplicas {
                        key: deployment.key.clone(),
                        replicas: 0,
                    },
                    mode,
                )
                .await?,
            );
        }

        Ok(outcome)
    }

    /// Blocks until the deployment is ready.
    ///
    /// # Errors
    ///
    /// See [`ReadinessProber::wait_until_ready`].
    pub async fn wait_for_deployment(
        &self,
        key: &DeploymentKey,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport> {
        ReadinessProber::new(self.registry)
            .wait_until_ready(key, timeout, poll_interval, cancel)
            .await
    }

    /// Removes a deployment that no longer runs replicas.
    ///
    /// The drain state is checked here and again when the delete executes.
    ///
    /// # Errors
    ///
    /// Returns `NotDrained` if the deployment still wants replicas, `NotFound`
    /// if it does not exist, or the gate error.
    pub async fn delete_old(&self, key: &DeploymentKey, mode: ExecutionMode) -> Result<RetireOutcome> {
        let deployment = self.registry.get_status(key).await?;
        Self::ensure_drained(&deployment)?;

        info!("Deleting drained deployment {key}");
        let changes = vec![self.submit(Change::Delete { key: key.clone() }, mode).await?];

        Ok(RetireOutcome {
            state: RolloutState::after_retire(&changes),
            changes,
        })
    }

    /// Deletes every other deployment of `new`'s application.
    ///
    /// Nothing is deleted unless `new` exists and every other deployment is
    /// drained.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if `new` does not exist, `NotDrained` for the first
    /// deployment still wanting replicas, or the first failing change.
    pub async fn delete_old_deployments(
        &self,
        new: &DeploymentKey,
        mode: ExecutionMode,
    ) -> Result<RetireOutcome> {
        self.registry.get_status(new).await?;

        let previous = self.previous_deployments(new).await?;
        for deployment in &previous {
            Self::ensure_drained(deployment)?;
        }
        if previous.is_empty() {
            info!("No old deployments of {} to delete", new.application);
        }

        let mut changes = Vec::with_capacity(previous.len());
        for deployment in previous {
            info!("Deleting drained deployment {}", deployment.key);
            changes.push(self.submit(Change::Delete { key: deployment.key }, mode).await?);
        }

        Ok(RetireOutcome {
            state: RolloutState::after_retire(&changes),
            changes,
        })
    }

    /// Labels a deployment with a promotion stage.
    ///
    /// # Errors
    ///
    /// Returns `InvalidName` if the stage is not a valid label value,
    /// `NotFound` if the deployment does not exist, or the gate error.
    pub async fn promote(
        &self,
        key: &DeploymentKey,
        stage: &str,
        mode: ExecutionMode,
    ) -> Result<ChangeOutcome> {
        if !is_valid_stage(stage) {
            return Err(ConfigError::InvalidName {
                kind: "stage",
                value: stage.to_string(),
                pattern: STAGE_PATTERN,
            }
            .into());
        }

        let current = self.registry.get_status(key).await?;
        info!(
            "Promoting {key} from stage {} to {stage}",
            current.stage().unwrap_or("none")
        );

        self.submit(
            Change::Promote {
                key: key.clone(),
                stage: stage.to_string(),
            },
            mode,
        )
        .await
    }

    /// Sets the replica count of a deployment directly.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the deployment does not exist, or the gate error.
    pub async fn scale(
        &self,
        key: &DeploymentKey,
        replicas: u32,
        mode: ExecutionMode,
    ) -> Result<ChangeOutcome> {
        let current = self.registry.get_status(key).await?;
        info!(
            "Scaling {key} from {} to {replicas} replicas",
            current.desired_replicas
        );

        self.submit(
            Change::SetReplicas {
                key: key.clone(),
                replicas,
            },
            mode,
        )
        .await
    }

    /// Lists the application's other deployments, newest first.
    ///
    /// # Errors
    ///
    /// Returns the registry error if listing fails.
    pub async fn previous_deployments(&self, new: &DeploymentKey) -> Result<Vec<Deployment>> {
        let mut deployments: Vec<_> = self
            .registry
            .list_deployments(&new.application)
            .await?
            .into_iter()
            .filter(|d| d.key != *new)
            .collect();

        deployments.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.key.name().cmp(&a.key.name()))
        });

        Ok(deployments)
    }

    /// Sums desired replicas across the application's deployments.
    ///
    /// # Errors
    ///
    /// Returns the registry error if listing fails.
    pub async fn total_replicas(&self, application: &str) -> Result<u32> {
        Ok(self
            .registry
            .list_deployments(application)
            .await?
            .iter()
            .fold(0_u32, |sum, d| sum.saturating_add(d.desired_replicas)))
    }

    fn ensure_drained(deployment: &Deployment) -> Result<()> {
        if deployment.desired_replicas == 0 {
            Ok(())
        } else {
            Err(RolloutError::NotDrained {
                deployment: deployment.key.name(),
                replicas: deployment.desired_replicas,
            }
            .into())
        }
    }

    async fn submit(&self, change: Change, mode: ExecutionMode) -> Result<ChangeOutcome> {
        match mode {
            ExecutionMode::Execute => self
                .gate
                .apply(Approval::Immediate(change))
                .await
                .map(ChangeOutcome::Applied),
            ExecutionMode::Propose => self.gate.propose(change).await.map(ChangeOutcome::Proposed),
        }
    }
}
