//! Configuration and naming validation.
//!
//! Deployment names end up as Kubernetes resource names, so application,
//! version and release must be DNS-subdomain safe. This module also checks
//! the client configuration before any remote call is made.

use crate::error::{ConfigError, Result, StepwiseError};
use tracing::debug;

use super::spec::{
    ClientConfig, MAX_POLL_INTERVAL_SECS, MAX_WAIT_TIMEOUT_SECS, MIN_POLL_INTERVAL_SECS,
};

/// Pattern an application name must match.
pub const APPLICATION_PATTERN: &str = "^[a-z][a-z0-9-]*$";

/// Pattern a version or release must match.
pub const VERSION_PATTERN: &str = "^[a-z0-9][a-z0-9.-]*$";

/// Pattern a promotion stage must match (a Kubernetes label value).
pub const STAGE_PATTERN: &str = "^[A-Za-z0-9]([A-Za-z0-9_.-]{0,61}[A-Za-z0-9])?$";

/// Maximum length of a Kubernetes label value.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Validator for client configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a client configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, config: &ClientConfig) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_api(config, &mut result);
        Self::validate_cluster(config, &mut result);
        Self::validate_rollout(config, &mut result);
        Self::validate_approval(config, &mut result);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(StepwiseError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates the deploy API URL.
    fn validate_api(config: &ClientConfig, result: &mut ValidationResult) {
        match config.deploy_api.as_deref() {
            None | Some("") => result
                .warnings
                .push(String::from("deploy_api is not configured")),
            Some(url) if !url.starts_with("https://") && !url.starts_with("http://") => {
                result.errors.push(ValidationError {
                    field: String::from("deploy_api"),
                    message: format!("Deploy API URL '{url}' must start with http:// or https://"),
                });
            }
            Some(url) if url.starts_with("http://") => result
                .warnings
                .push(format!("Deploy API URL '{url}' is not using TLS")),
            Some(_) => {}
        }
    }

    /// Validates cluster and namespace.
    fn validate_cluster(config: &ClientConfig, result: &mut ValidationResult) {
        match config.kubernetes_cluster.as_deref() {
            None | Some("") => result
                .warnings
                .push(String::from("kubernetes_cluster is not configured")),
            // <provider>:<account>:<region>:<name>
            Some(cluster) if cluster.split(':').count() != 4 => result.warnings.push(format!(
                "Cluster ID '{cluster}' does not look like <provider>:<account>:<region>:<name>"
            )),
            Some(_) => {}
        }

        if !is_valid_application(&config.kubernetes_namespace) {
            result.errors.push(ValidationError {
                field: String::from("kubernetes_namespace"),
                message: format!(
                    "Namespace '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.kubernetes_namespace
                ),
            });
        }
    }

    /// Validates rollout defaults.
    fn validate_rollout(config: &ClientConfig, result: &mut ValidationResult) {
        let rollout = &config.rollout;

        if rollout.wait_timeout_secs > MAX_WAIT_TIMEOUT_SECS {
            result.warnings.push(format!(
                "rollout.wait_timeout_secs {} will be clamped to {MAX_WAIT_TIMEOUT_SECS}",
                rollout.wait_timeout_secs
            ));
        }

        if !(MIN_POLL_INTERVAL_SECS..=MAX_POLL_INTERVAL_SECS).contains(&rollout.poll_interval_secs) {
            result.warnings.push(format!(
                "rollout.poll_interval_secs {} will be clamped to {MIN_POLL_INTERVAL_SECS}..={MAX_POLL_INTERVAL_SECS}",
                rollout.poll_interval_secs
            ));
        }
    }

    /// Validates approval settings.
    fn validate_approval(config: &ClientConfig, result: &mut ValidationResult) {
        if config.approval.token_ttl_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("approval.token_ttl_secs"),
                message: String::from("Token TTL must be greater than zero"),
            });
        }

        if config.approval.min_approvals > 0 && config.user.is_none() {
            result.warnings.push(String::from(
                "approvals are required but no user is configured; approvals will be recorded under the host name",
            ));
        }
    }
}

impl ValidationResult {
    /// Returns true if there are no errors.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Checks a name against [`APPLICATION_PATTERN`].
#[must_use]
pub fn is_valid_application(name: &str) -> bool {
    let mut chars = name.chars();

    // First character must be a letter
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Checks a version or release against [`VERSION_PATTERN`].
#[must_use]
pub fn is_valid_version(value: &str) -> bool {
    let mut chars = value.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '-')
}

/// Checks a promotion stage against [`STAGE_PATTERN`].
#[must_use]
pub fn is_valid_stage(value: &str) -> bool {
    let (Some(first), Some(last)) = (value.chars().next(), value.chars().last()) else {
        return false;
    };

    value.len() <= MAX_LABEL_VALUE_LEN
        && first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
