//! Progressive rollout between two deployments of an application.
//!
//! - [`split`]: replica counts for a step fraction
//! - [`prober`]: cancellable readiness polling
//! - [`controller`]: the rollout state machine

mod controller;
mod prober;
mod split;

pub use controller::{
    ChangeOutcome, ExecutionMode, RetireOutcome, RolloutController, RolloutState, SwitchOutcome,
};
pub use prober::{Readiness, ReadinessProber, ReadinessReport};
pub use split::{compute_split, Fraction, ReplicaSplit, RolloutPlan};
