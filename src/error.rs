//! Error types for the stepwise deployment client.
//!
//! This module provides the error hierarchy for every stage of a rollout:
//! configuration, template rendering, the deployment registry, the approval
//! gate, and the rollout state machine itself.

use thiserror::Error;

/// The main error type for the stepwise deployment client.
#[derive(Debug, Error)]
pub enum StepwiseError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template rendering errors.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Deployment registry errors.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Approval gate errors.
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    /// Rollout state machine errors.
    #[error("Rollout error: {0}")]
    Rollout(#[from] RolloutError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An application, version or release name does not match its pattern.
    #[error("Invalid {kind} '{value}': does not match pattern \"{pattern}\"")]
    InvalidName {
        /// Which part of the deployment key was invalid.
        kind: &'static str,
        /// The rejected value.
        value: String,
        /// The pattern the value must match.
        pattern: &'static str,
    },
}

/// Template rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A placeholder had no matching variable in strict mode.
    #[error("Unresolved template variable: {name}")]
    UnresolvedVariable {
        /// Name of the unresolved variable.
        name: String,
    },

    /// A `key=value` parameter was malformed.
    #[error("Invalid parameter '{parameter}': expected KEY=VALUE")]
    InvalidParameter {
        /// The rejected parameter.
        parameter: String,
    },

    /// The rendered document is not a usable manifest.
    #[error("Invalid manifest: {message}")]
    InvalidManifest {
        /// Description of the problem.
        message: String,
    },
}

/// Deployment registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The referenced deployment does not exist.
    #[error("Deployment not found: {deployment}")]
    NotFound {
        /// Name of the missing deployment.
        deployment: String,
    },

    /// A deployment with the same key is already registered.
    #[error("Deployment already exists: {deployment}")]
    AlreadyExists {
        /// Name of the existing deployment.
        deployment: String,
    },

    /// Authentication failed.
    #[error("Deploy API authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("Deploy API request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Network error.
    #[error("Network error communicating with deploy API: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("Invalid response from deploy API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Approval gate errors.
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// No pending change is recorded under the token.
    #[error("Unknown change request: {token}")]
    UnknownToken {
        /// The unknown token.
        token: String,
    },

    /// The change was already executed.
    #[error("Change request {token} was already executed at {executed_at}")]
    AlreadyExecuted {
        /// The replayed token.
        token: String,
        /// When the change was executed.
        executed_at: String,
    },

    /// The token expired before execution.
    #[error("Change request {token} expired at {expired_at}")]
    TokenExpired {
        /// The expired token.
        token: String,
        /// When the token expired.
        expired_at: String,
    },

    /// The change has fewer approvals than required.
    #[error("Change request {token} has {approvals} approval(s), {required} required")]
    NotApproved {
        /// The token.
        token: String,
        /// Number of recorded approvals.
        approvals: usize,
        /// Number of required approvals.
        required: u32,
    },

    /// The stored change does not match the digest recorded at proposal time.
    #[error("Change request {token} was modified after it was proposed")]
    Tampered {
        /// The token.
        token: String,
    },

    /// The change store could not be read or written.
    #[error("Change store error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },
}

/// Rollout state machine errors.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// The step fraction is malformed or out of range.
    #[error("Invalid ratio {numerator}/{denominator}: {reason}")]
    InvalidRatio {
        /// Requested numerator.
        numerator: u64,
        /// Requested denominator.
        denominator: u64,
        /// Why the ratio was rejected.
        reason: String,
    },

    /// Readiness was not reached in time.
    #[error(
        "Timeout after {waited_secs}s waiting for deployment {deployment} ({ready}/{desired} replicas ready)"
    )]
    Timeout {
        /// Deployment being waited on.
        deployment: String,
        /// Seconds waited.
        waited_secs: u64,
        /// Ready replicas at the last poll.
        ready: u32,
        /// Desired replicas at the last poll.
        desired: u32,
    },

    /// The wait was cancelled by the caller.
    #[error("Wait for deployment {deployment} was cancelled")]
    Cancelled {
        /// Deployment being waited on.
        deployment: String,
    },

    /// The deployment disappeared while being waited on.
    #[error("Deployment {deployment} disappeared while waiting for readiness")]
    DeploymentNotFound {
        /// Deployment that vanished.
        deployment: String,
    },

    /// The platform reports the deployment cannot make progress.
    #[error("Deployment {deployment} failed to progress")]
    DeploymentFailed {
        /// Deployment that failed.
        deployment: String,
    },

    /// Delete was requested for a deployment that still has replicas.
    #[error("Deployment {deployment} still has {replicas} replica(s); switch traffic away first")]
    NotDrained {
        /// Deployment that still has replicas.
        deployment: String,
        /// Remaining desired replicas.
        replicas: u32,
    },

    /// There is no deployment to switch traffic away from.
    #[error("No previous deployment of application {application} besides {deployment}")]
    NoPreviousDeployment {
        /// Application name.
        application: String,
        /// The new deployment.
        deployment: String,
    },
}

/// Result type alias for stepwise operations.
pub type Result<T> = std::result::Result<T, StepwiseError>;

impl StepwiseError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the caller may retry the failed operation as-is.
    ///
    /// Nothing in this crate retries on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Registry(
                RegistryError::NetworkError { .. }
                    | RegistryError::ApiRequestFailed { status: 500..=599, .. }
            )
        )
    }

    /// Returns true if this error reports a missing deployment.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Registry(RegistryError::NotFound { .. })
                | Self::Rollout(RolloutError::DeploymentNotFound { .. })
        )
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl RegistryError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

impl ApprovalError {
    /// Creates a storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

impl RolloutError {
    /// Creates an invalid ratio error.
    #[must_use]
    pub fn invalid_ratio(numerator: u64, denominator: u64, reason: impl Into<String>) -> Self {
        Self::InvalidRatio {
            numerator,
            denominator,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_retryable() {
        let err = StepwiseError::Registry(RegistryError::network("connection reset"));
        assert!(err.is_retryable());

        let err = StepwiseError::Registry(RegistryError::api_error(503, "unavailable"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_safety_guards_are_not_retryable() {
        let err = StepwiseError::Rollout(RolloutError::NotDrained {
            deployment: String::from("shop-v1-1"),
            replicas: 2,
        });
        assert!(!err.is_retryable());

        let err = StepwiseError::Registry(RegistryError::api_error(422, "bad body"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_found_covers_both_layers() {
        let registry = StepwiseError::Registry(RegistryError::NotFound {
            deployment: String::from("shop-v1-1"),
        });
        let rollout = StepwiseError::Rollout(RolloutError::DeploymentNotFound {
            deployment: String::from("shop-v1-1"),
        });
        assert!(registry.is_not_found());
        assert!(rollout.is_not_found());
    }
}
