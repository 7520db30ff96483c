//! Configuration parser for loading and storing the client configuration.
//!
//! This module handles loading configuration from the YAML file written by
//! `stepwise configure` and from environment variables, with the environment
//! taking precedence.

use crate::error::{ConfigError, Result, StepwiseError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::ClientConfig;

/// Application directory name under the user config directory.
pub const APP_DIR: &str = "stepwise";

/// Configuration file name.
pub const CONFIG_FILE: &str = "config.yaml";

/// Environment variable holding the deploy API bearer token.
pub const API_TOKEN_VAR: &str = "STEPWISE_API_TOKEN";

/// Configuration parser for loading client configuration.
#[derive(Debug, Default)]
pub struct ConfigParser;

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads configuration from a YAML file.
    ///
    /// A missing file yields the default configuration, so a fresh install
    /// can run on environment variables alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ClientConfig> {
        let path = path.as_ref();

        if !path.exists() {
            debug!("No configuration file at {}, using defaults", path.display());
            return Ok(ClientConfig::default());
        }

        info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            StepwiseError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ClientConfig> {
        debug!("Parsing YAML configuration");

        if content.trim().is_empty() {
            return Ok(ClientConfig::default());
        }

        serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            StepwiseError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Environment variables use the `STEPWISE_<KEY>` format
    /// (e.g., `STEPWISE_DEPLOY_API`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ClientConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(config: &mut ClientConfig, var: impl Fn(&str) -> Option<String>) {
        if let Some(api) = var("STEPWISE_DEPLOY_API") {
            debug!("Overriding deploy_api from environment");
            config.deploy_api = Some(api);
        }

        if let Some(cluster) = var("STEPWISE_KUBERNETES_CLUSTER") {
            debug!("Overriding kubernetes_cluster from environment");
            config.kubernetes_cluster = Some(cluster);
        }

        if let Some(namespace) = var("STEPWISE_KUBERNETES_NAMESPACE") {
            debug!("Overriding kubernetes_namespace from environment");
            config.kubernetes_namespace = namespace;
        }

        if let Some(user) = var("STEPWISE_USER") {
            debug!("Overriding user from environment");
            config.user = Some(user);
        }

        if let Some(min) = var("STEPWISE_MIN_APPROVALS").and_then(|v| v.parse().ok()) {
            debug!("Overriding approval.min_approvals from environment");
            config.approval.min_approvals = min;
        }
    }

    /// Writes the configuration back to disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub fn store(&self, config: &ClientConfig, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(config).map_err(|e| {
            StepwiseError::Config(ConfigError::ParseError {
                message: format!("Failed to serialize configuration: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;
        std::fs::write(path, content)?;

        info!("Stored configuration in: {}", path.display());
        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = Path::new(".env");

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(env_path).map_err(|e| {
                StepwiseError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the deploy API token from environment, if set.
    #[must_use]
    pub fn get_api_token() -> Option<String> {
        std::env::var(API_TOKEN_VAR).ok().filter(|t| !t.is_empty())
    }
}

/// Returns the directory holding the configuration and change records.
///
/// # Errors
///
/// Returns an error if the user config directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .ok_or_else(|| StepwiseError::internal("Cannot determine user config directory"))
}

/// Returns the default configuration file path.
///
/// # Errors
///
/// Returns an error if the user config directory cannot be determined.
pub fn default_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE))
}
