//! Deployment registry module.
//!
//! This module provides the interface to the orchestration platform's
//! deployment objects, with an HTTP backend for the deploy API and an
//! in-memory backend for dry runs and tests.

mod store;
mod types;
mod http;
mod memory;

pub use store::DeploymentRegistry;
#[cfg(test)]
pub use store::MockDeploymentRegistry;
pub use types::{Deployment, DeploymentKey, DeploymentManifest, DeploymentStatus, STAGE_LABEL};
pub use http::HttpRegistry;
pub use memory::MemoryRegistry;
