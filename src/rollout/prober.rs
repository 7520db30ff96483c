//! Readiness probing.
//!
//! Polls a deployment until every desired replica is ready, the platform
//! reports a failed rollout, the deadline passes or the caller cancels.
//! The prober never mutates the registry.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{Result, RolloutError, StepwiseError};
use crate::registry::{Deployment, DeploymentKey, DeploymentRegistry};

/// Outcome of a single readiness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Every desired replica is ready and none are unavailable.
    Ready,
    /// Still converging.
    NotReady,
    /// The platform gave up on the rollout.
    Failed,
}

impl Readiness {
    /// Classifies one snapshot of a deployment.
    #[must_use]
    pub const fn classify(deployment: &Deployment) -> Self {
        if deployment.progress_failed {
            Self::Failed
        } else if deployment.is_ready() {
            Self::Ready
        } else {
            Self::NotReady
        }
    }
}

/// Replica counts observed by one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessReport {
    /// Deployment name.
    pub deployment: String,
    /// Desired replicas.
    pub desired: u32,
    /// Ready replicas.
    pub ready: u32,
    /// Unavailable replicas.
    pub unavailable: u32,
    /// When the snapshot was taken.
    pub observed_at: DateTime<Utc>,
}

impl From<&Deployment> for ReadinessReport {
    fn from(deployment: &Deployment) -> Self {
        Self {
            deployment: deployment.key.name(),
            desired: deployment.desired_replicas,
            ready: deployment.ready_replicas,
            unavailable: deployment.unavailable_replicas,
            observed_at: Utc::now(),
        }
    }
}

/// Polls deployment readiness.
pub struct ReadinessProber<'a, R: DeploymentRegistry> {
    registry: &'a R,
}

impl<'a, R: DeploymentRegistry> ReadinessProber<'a, R> {
    /// Creates a prober reading from `registry`.
    #[must_use]
    pub const fn new(registry: &'a R) -> Self {
        Self { registry }
    }

    /// Takes one readiness snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DeploymentNotFound` if the deployment does not exist, or the
    /// registry error if the read fails.
    pub async fn probe(&self, key: &DeploymentKey) -> Result<(Readiness, ReadinessReport)> {
        let deployment = self.registry.get_status(key).await.map_err(|e| {
            if e.is_not_found() {
                RolloutError::DeploymentNotFound {
                    deployment: key.name(),
                }
                .into()
            } else {
                e
            }
        })?;

        Ok((
            Readiness::classify(&deployment),
            ReadinessReport::from(&deployment),
        ))
    }

    /// Waits until the deployment is ready.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when `timeout` passes without a ready snapshot,
    /// `DeploymentFailed` when the platform reports a failed rollout,
    /// `DeploymentNotFound` when the deployment disappears, and `Cancelled`
    /// when `cancel` fires.
    pub async fn wait_until_ready(
        &self,
        key: &DeploymentKey,
        timeout: Duration,
        poll_interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<ReadinessReport> {
        let start = Instant::now();
        let deadline = start + timeout;

        debug!(
            "Waiting up to {}s for {key}, polling every {}s",
            timeout.as_secs(),
            poll_interval.as_secs()
        );

        loop {
            if cancel.is_cancelled() {
                return Err(Self::cancelled(key));
            }

            let (readiness, report) = self.probe(key).await?;
            match readiness {
                Readiness::Ready => {
                    info!(
                        "Deployment {key} is ready ({}/{} replicas)",
                        report.ready, report.desired
                    );
                    return Ok(report);
                }
                Readiness::Failed => {
                    return Err(RolloutError::DeploymentFailed {
                        deployment: key.name(),
                    }
                    .into());
                }
                Readiness::NotReady => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RolloutError::Timeout {
                    deployment: key.name(),
                    waited_secs: now.duration_since(start).as_secs(),
                    ready: report.ready,
                    desired: report.desired,
                }
                .into());
            }

            let remaining = deadline - now;
            info!(
                "Waiting for {key}: {}/{} replicas ready, {} unavailable, {}s remaining",
                report.ready,
                report.desired,
                report.unavailable,
                remaining.as_secs()
            );

            tokio::select! {
                biased;

                () = cancel.cancelled() => return Err(Self::cancelled(key)),
                () = tokio::time::sleep(poll_interval.min(remaining)) => {}
            }
        }
    }

    fn cancelled(key: &DeploymentKey) -> StepwiseError {
        RolloutError::Cancelled {
            deployment: key.name(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use crate::registry::{DeploymentManifest, MemoryRegistry, MockDeploymentRegistry};

    const INTERVAL: Duration = Duration::from_secs(10);

    async fn registry_with(replicas: u32) -> (MemoryRegistry, DeploymentKey) {
        let registry = MemoryRegistry::new();
        let key = DeploymentKey::new("shop", "v2", "1").unwrap();
        registry
            .create_deployment(&DeploymentManifest {
                key: key.clone(),
                replicas,
                body: serde_json::Value::Null,
            })
            .await
            .unwrap();
        (registry, key)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_immediately() {
        let (registry, key) = registry_with(3).await;
        registry.set_ready(&key, 3).unwrap();

        let report = ReadinessProber::new(&registry)
            .wait_until_ready(&key, Duration::from_secs(60), INTERVAL, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.ready, 3);
        assert_eq!(report.desired, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_becomes_ready_while_polling() {
        let (registry, key) = registry_with(2).await;
        let prober = ReadinessProber::new(&registry);
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(
            prober.wait_until_ready(&key, Duration::from_secs(60), INTERVAL, &cancel),
            async {
                tokio::time::sleep(Duration::from_secs(25)).await;
                registry.set_ready(&key, 2).unwrap();
            }
        );

        assert_eq!(result.unwrap().ready, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_readiness_times_out() {
        let (registry, key) = registry_with(4).await;
        registry.set_ready(&key, 3).unwrap();

        let err = ReadinessProber::new(&registry)
            .wait_until_ready(&key, Duration::from_secs(30), INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepwiseError::Rollout(RolloutError::Timeout {
                waited_secs: 30,
                ready: 3,
                desired: 4,
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_polls_once() {
        let (registry, key) = registry_with(1).await;

        let err = ReadinessProber::new(&registry)
            .wait_until_ready(&key, Duration::ZERO, INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, StepwiseError::Rollout(RolloutError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rollout_stops_immediately() {
        let (registry, key) = registry_with(2).await;
        registry.mark_failed(&key).unwrap();

        let err = ReadinessProber::new(&registry)
            .wait_until_ready(&key, Duration::from_secs(600), INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepwiseError::Rollout(RolloutError::DeploymentFailed { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_deployment() {
        let (registry, key) = registry_with(2).await;
        let prober = ReadinessProber::new(&registry);
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(
            prober.wait_until_ready(&key, Duration::from_secs(60), INTERVAL, &cancel),
            async {
                tokio::time::sleep(Duration::from_secs(15)).await;
                registry.delete_deployment(&key).await.unwrap();
            }
        );

        assert!(matches!(
            result.unwrap_err(),
            StepwiseError::Rollout(RolloutError::DeploymentNotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_wait_without_mutation() {
        let (registry, key) = registry_with(2).await;
        let prober = ReadinessProber::new(&registry);
        let cancel = CancellationToken::new();

        let (result, ()) = tokio::join!(
            prober.wait_until_ready(&key, Duration::from_secs(3600), INTERVAL, &cancel),
            async {
                tokio::time::sleep(Duration::from_secs(15)).await;
                cancel.cancel();
            }
        );

        assert!(matches!(
            result.unwrap_err(),
            StepwiseError::Rollout(RolloutError::Cancelled { .. })
        ));
        assert_eq!(registry.replicas(&key), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_errors_propagate() {
        let mut registry = MockDeploymentRegistry::new();
        registry
            .expect_get_status()
            .times(1)
            .returning(|_| Err(RegistryError::network("connection refused").into()));

        let key = DeploymentKey::new("shop", "v2", "1").unwrap();
        let err = ReadinessProber::new(&registry)
            .wait_until_ready(&key, Duration::from_secs(60), INTERVAL, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }
}
