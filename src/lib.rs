// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![forbid(unsafe_code)]               // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stepwise Deploy
//!
//! Progressive, pod-by-pod traffic switching between versioned deployments of
//! an application, driven step by step from a CI/CD pipeline.
//!
//! ## Overview
//!
//! A rollout of `shop` from `v1` to `v2` looks like:
//!
//! 1. **Create** `shop-v2-1` with zero replicas
//! 2. **Switch** a share of the replicas (`1/4`, `2/4`, ...) from `v1` to `v2`
//! 3. **Wait** after each step until every replica of `v2` is ready
//! 4. **Delete** `v1` once it has been drained to zero replicas
//!
//! Every mutation is a change request. It is either executed immediately or
//! proposed under a token that a later invocation approves and executes
//! exactly once.
//!
//! ## Modules
//!
//! - [`rollout`]: Replica split, readiness probing and the rollout controller
//! - [`approval`]: Change requests, tokens and the approval gate
//! - [`registry`]: Deployment registry trait with HTTP and in-memory backends
//! - [`template`]: Flat `{{ key }}` manifest templates
//! - [`config`]: Client configuration parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```bash
//! stepwise create-deployment shop v2 1 --template deployment.yaml --execute
//! stepwise switch-deployment shop v2 1 1/4 --execute
//! stepwise wait-for-deployment shop v2 1 --timeout 600
//! stepwise switch-deployment shop v2 1 4/4 --execute
//! stepwise delete-old-deployments shop v2 1 --execute
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod approval;
pub mod cli;
pub mod config;
pub mod error;
pub mod registry;
pub mod rollout;
pub mod template;

// ============================================================================
// Re-exports
// ============================================================================

pub use approval::{Approval, ApprovalGate, ApprovalToken, ChangeStore, LocalChangeStore};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ClientConfig, ConfigParser, ConfigValidator};
pub use error::{Result, StepwiseError};
pub use registry::{DeploymentKey, DeploymentRegistry, HttpRegistry, MemoryRegistry};
pub use rollout::{compute_split, Fraction, ReadinessProber, RetireOutcome, RolloutController};
