//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::error::Result;
use crate::registry::DeploymentKey;
use crate::rollout::Fraction;
use crate::template::RenderMode;

/// Stepwise - progressive deployment switching for CI/CD pipelines.
#[derive(Parser, Debug)]
#[command(name = "stepwise")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "STEPWISE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Identifies one deployment on the command line.
#[derive(Args, Debug, Clone)]
pub struct DeploymentArgs {
    /// Application name.
    pub application: String,
    /// Application version.
    #[arg(id = "deployment_version", value_name = "VERSION")]
    pub version: String,
    /// Release of the version.
    pub release: String,
}

impl DeploymentArgs {
    /// Validates the names and builds the deployment key.
    ///
    /// # Errors
    ///
    /// Returns an error if a name does not match its pattern.
    pub fn key(&self) -> Result<DeploymentKey> {
        DeploymentKey::new(&self.application, &self.version, &self.release)
    }
}

/// Template input shared by rendering commands.
#[derive(Args, Debug, Clone)]
pub struct TemplateArgs {
    /// Template parameter as KEY=VALUE (repeatable).
    #[arg(short, long = "parameter", value_name = "KEY=VALUE")]
    pub parameters: Vec<String>,

    /// How unresolved placeholders are handled.
    #[arg(long, default_value = "strict")]
    pub mode: RenderMode,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store client settings in the configuration file.
    Configure {
        /// Deploy API base URL.
        #[arg(long)]
        deploy_api: Option<String>,

        /// Kubernetes cluster ID (provider:account:region:name).
        #[arg(long)]
        kubernetes_cluster: Option<String>,

        /// Kubernetes namespace.
        #[arg(long)]
        kubernetes_namespace: Option<String>,

        /// User recorded on proposals and approvals.
        #[arg(long)]
        user: Option<String>,

        /// Approvals required before a proposed change can be executed.
        #[arg(long)]
        min_approvals: Option<u32>,
    },

    /// Render a manifest template and print the YAML.
    RenderTemplate {
        /// Template file.
        template: PathBuf,

        #[allow(missing_docs)]
        #[command(flatten)]
        template_args: TemplateArgs,
    },

    /// Register a new deployment from a template.
    CreateDeployment {
        #[allow(missing_docs)]
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Manifest template file.
        #[arg(short, long)]
        template: PathBuf,

        #[allow(missing_docs)]
        #[command(flatten)]
        template_args: TemplateArgs,

        /// Initial replicas (default 0).
        #[arg(long)]
        replicas: Option<u32>,

        /// Apply now instead of proposing a change request.
        #[arg(long)]
        execute: bool,
    },

    /// Wait until every replica of a deployment is ready.
    WaitForDeployment {
        #[allow(missing_docs)]
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Give up after this many seconds [default: from config, 300].
        #[arg(long)]
        timeout: Option<u64>,

        /// Seconds between readiness polls [default: from config, 10].
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Label a deployment with a promotion stage.
    PromoteDeployment {
        #[allow(missing_docs)]
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Stage to promote to, e.g. live.
        stage: String,

        /// Apply now instead of proposing a change request.
        #[arg(long)]
        execute: bool,
    },

    /// Shift a share of the replicas from the previous deployment to this one.
    SwitchDeployment {
        #[allow(missing_docs)]
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Step as NUMERATOR/DENOMINATOR, e.g. 3/10.
        ratio: Fraction,

        /// Total replicas to split (default: current total of the application).
        #[arg(long)]
        total: Option<u32>,

        /// Apply now instead of proposing change requests.
        #[arg(long)]
        execute: bool,
    },

    /// Set the replica count of a deployment.
    ScaleDeployment {
        #[allow(missing_docs)]
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Desired replicas.
        replicas: u32,

        /// Apply now instead of proposing a change request.
        #[arg(long)]
        execute: bool,
    },

    /// Delete drained deployments of the application other than this one.
    DeleteOldDeployments {
        #[allow(missing_docs)]
        #[command(flatten)]
        deployment: DeploymentArgs,

        /// Apply now instead of proposing change requests.
        #[arg(long)]
        execute: bool,
    },

    /// Print the total desired replicas of an application.
    GetCurrentReplicas {
        /// Application name.
        application: String,
    },

    /// List the deployments of an application.
    ListDeployments {
        /// Application name.
        application: String,
    },

    /// List recorded change requests.
    ListChangeRequests,

    /// Show one or more change requests.
    GetChangeRequest {
        /// Change request tokens.
        #[arg(required = true)]
        tokens: Vec<String>,
    },

    /// Approve one or more change requests.
    ApproveChangeRequest {
        /// Change request tokens.
        #[arg(required = true)]
        tokens: Vec<String>,

        /// Approving user (default: configured user).
        #[arg(long)]
        user: Option<String>,
    },

    /// List the approvals of a change request.
    ListApprovals {
        /// Change request token.
        token: String,
    },

    /// Execute one or more approved change requests, in order.
    ExecuteChangeRequest {
        /// Change request tokens.
        #[arg(required = true)]
        tokens: Vec<String>,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_switch() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "switch-deployment",
            "shop",
            "v2",
            "1",
            "3/10",
            "--total",
            "10",
            "--execute",
        ])
        .unwrap();

        match cli.command {
            Commands::SwitchDeployment {
                deployment,
                ratio,
                total,
                execute,
            } => {
                assert_eq!(deployment.key().unwrap().name(), "shop-v2-1");
                assert_eq!(ratio, Fraction::new(3, 10).unwrap());
                assert_eq!(total, Some(10));
                assert!(execute);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_ratio_is_rejected_by_parser() {
        let result = Cli::try_parse_from(["stepwise", "switch-deployment", "shop", "v2", "1", "11/10"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_create_with_parameters() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "--output",
            "json",
            "create-deployment",
            "shop",
            "v2",
            "1",
            "--template",
            "deployment.yaml",
            "-p",
            "image=shop:2",
            "--parameter",
            "cpu=100m",
        ])
        .unwrap();

        assert_eq!(cli.output, OutputFormat::Json);
        match cli.command {
            Commands::CreateDeployment {
                template_args,
                replicas,
                execute,
                ..
            } => {
                assert_eq!(template_args.parameters, vec!["image=shop:2", "cpu=100m"]);
                assert_eq!(template_args.mode, RenderMode::Strict);
                assert_eq!(replicas, None);
                assert!(!execute);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_wait_bounds_default_to_config() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "wait-for-deployment",
            "shop",
            "v2",
            "1",
            "--interval",
            "5",
        ])
        .unwrap();
        match cli.command {
            Commands::WaitForDeployment {
                timeout, interval, ..
            } => {
                assert_eq!(timeout, None);
                assert_eq!(interval, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_names_fail_key() {
        let args = DeploymentArgs {
            application: String::from("Shop"),
            version: String::from("v2"),
            release: String::from("1"),
        };
        assert!(args.key().is_err());
    }

    #[test]
    fn test_change_request_commands_take_many_tokens() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "execute-change-request",
            "3f1c2a5e-8f7b-4d0e-9a55-0d7c1b1e2f3a",
            "9b0e7d44-1c2f-4e3a-8d6b-5a4f3e2d1c0b",
        ])
        .unwrap();
        match cli.command {
            Commands::ExecuteChangeRequest { tokens } => assert_eq!(tokens.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = Cli::try_parse_from([
            "stepwise",
            "approve-change-request",
            "3f1c2a5e-8f7b-4d0e-9a55-0d7c1b1e2f3a",
            "--user",
            "alice",
        ])
        .unwrap();
        match cli.command {
            Commands::ApproveChangeRequest { tokens, user } => {
                assert_eq!(tokens.len(), 1);
                assert_eq!(user.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        assert!(Cli::try_parse_from(["stepwise", "get-change-request"]).is_err());
    }

    #[test]
    fn test_parse_promote() {
        let cli = Cli::try_parse_from([
            "stepwise",
            "promote-deployment",
            "shop",
            "v2",
            "1",
            "live",
        ])
        .unwrap();
        match cli.command {
            Commands::PromoteDeployment {
                deployment,
                stage,
                execute,
            } => {
                assert_eq!(deployment.key().unwrap().name(), "shop-v2-1");
                assert_eq!(stage, "live");
                assert!(!execute);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
