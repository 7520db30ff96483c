//! Configuration module for the stepwise deployment client.
//!
//! This module handles all configuration-related functionality:
//! - Loading and storing the client `config.yaml`
//! - Environment variable and `.env` overrides
//! - Validation of configuration values and deployment names

mod spec;
mod parser;
mod validator;

pub use spec::{
    ApprovalConfig, ClientConfig, RolloutConfig, DEFAULT_POLL_INTERVAL_SECS,
    DEFAULT_WAIT_TIMEOUT_SECS, MAX_POLL_INTERVAL_SECS, MAX_WAIT_TIMEOUT_SECS,
};
pub use parser::{config_dir, default_config_path, ConfigParser, API_TOKEN_VAR};
pub use validator::{
    is_valid_application, is_valid_stage, is_valid_version, ConfigValidator, ValidationResult,
    APPLICATION_PATTERN, STAGE_PATTERN, VERSION_PATTERN,
};
