//! Stepwise CLI entrypoint.
//!
//! This is the main entrypoint for the stepwise command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use stepwise_deploy::approval::{
    ApprovalGate, ApprovalToken, ChangeStore, GateSettings, LocalChangeStore,
};
use stepwise_deploy::cli::{Cli, Commands, LogFormat, OutputFormatter, TemplateArgs};
use stepwise_deploy::config::{
    default_config_path, ClientConfig, ConfigParser, ConfigValidator, RolloutConfig,
};
use stepwise_deploy::error::{Result, StepwiseError};
use stepwise_deploy::registry::{DeploymentRegistry, HttpRegistry};
use stepwise_deploy::rollout::{ExecutionMode, RolloutController};
use stepwise_deploy::template::{parse_parameters, TemplateRenderer};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr; stdout is for results.
fn init_logging(verbose: bool, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.map_or_else(default_config_path, Ok)?;
    let formatter = OutputFormatter::new(cli.output);

    let parser = ConfigParser::new();
    parser.load_dotenv()?;

    if let Commands::Configure {
        deploy_api,
        kubernetes_cluster,
        kubernetes_namespace,
        user,
        min_approvals,
    } = cli.command
    {
        let mut config = parser.load_file(&config_path)?;
        config.deploy_api = deploy_api.or(config.deploy_api);
        config.kubernetes_cluster = kubernetes_cluster.or(config.kubernetes_cluster);
        config.kubernetes_namespace = kubernetes_namespace.unwrap_or(config.kubernetes_namespace);
        config.user = user.or(config.user);
        config.approval.min_approvals = min_approvals.unwrap_or(config.approval.min_approvals);

        return cmd_configure(&parser, &config, &config_path);
    }

    if let Commands::RenderTemplate {
        template,
        template_args,
    } = &cli.command
    {
        return cmd_render_template(template, template_args);
    }

    let config = load_config(&parser, &config_path)?;
    let registry = HttpRegistry::new(&config, ConfigParser::get_api_token())?;
    let store = change_store(&config)?;
    debug!(
        "Using {} registry with {} change store",
        registry.backend_type(),
        store.backend_type()
    );
    let controller = RolloutController::new(&registry, &store, GateSettings::from_config(&config));

    let pruned = controller.gate().prune().await?;
    if pruned > 0 {
        debug!("Pruned {pruned} stale change requests");
    }

    match cli.command {
        Commands::Configure { .. } | Commands::RenderTemplate { .. } => Err(
            StepwiseError::internal("command does not use the deployment registry"),
        ),
        Commands::CreateDeployment {
            deployment,
            template,
            template_args,
            replicas,
            execute,
        } => {
            let key = deployment.key()?;
            let variables = parse_parameters(&template_args.parameters)?;
            let manifest = TemplateRenderer::new(template_args.mode).render_manifest(
                &template,
                &key,
                variables,
                0,
            )?;

            let outcome = controller
                .create(manifest, replicas, ExecutionMode::from_flag(execute))
                .await?;
            emit(&formatter.format_outcomes(&[outcome]))
        }
        Commands::WaitForDeployment {
            deployment,
            timeout,
            interval,
        } => {
            let key = deployment.key()?;
            let cancel = CancellationToken::new();
            let _guard = spawn_interrupt_handler(cancel.clone());

            let report = controller
                .wait_for_deployment(
                    &key,
                    Duration::from_secs(RolloutConfig::clamp_timeout(
                        timeout.unwrap_or(config.rollout.wait_timeout_secs),
                    )),
                    Duration::from_secs(RolloutConfig::clamp_interval(
                        interval.unwrap_or(config.rollout.poll_interval_secs),
                    )),
                    &cancel,
                )
                .await?;
            emit(&formatter.format_readiness(&report))
        }
        Commands::SwitchDeployment {
            deployment,
            ratio,
            total,
            execute,
        } => {
            let key = deployment.key()?;
            let outcome = controller
                .switch_from_previous(&key, ratio, total, ExecutionMode::from_flag(execute))
                .await?;
            info!(
                "{key}: {} new / {} old replicas, {}",
                outcome.split.new_replicas, outcome.split.old_replicas, outcome.state
            );
            emit(&formatter.format_switch(&outcome))
        }
        Commands::ScaleDeployment {
            deployment,
            replicas,
            execute,
        } => {
            let key = deployment.key()?;
            let outcome = controller
                .scale(&key, replicas, ExecutionMode::from_flag(execute))
                .await?;
            emit(&formatter.format_outcomes(&[outcome]))
        }
        Commands::DeleteOldDeployments {
            deployment,
            execute,
        } => {
            let key = deployment.key()?;
            let outcome = controller
                .delete_old_deployments(&key, ExecutionMode::from_flag(execute))
                .await?;
            info!("{key}: old deployments {}", outcome.state);
            emit(&formatter.format_retire(&outcome))
        }
        Commands::PromoteDeployment {
            deployment,
            stage,
            execute,
        } => {
            let key = deployment.key()?;
            let outcome = controller
                .promote(&key, &stage, ExecutionMode::from_flag(execute))
                .await?;
            emit(&formatter.format_outcomes(&[outcome]))
        }
        Commands::GetCurrentReplicas { application } => {
            let replicas = controller.total_replicas(&application).await?;
            emit(&formatter.format_replicas(&application, replicas))
        }
        Commands::ListDeployments { application } => {
            let mut deployments = registry.list_deployments(&application).await?;
            deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            emit(&formatter.format_deployments(&deployments))
        }
        Commands::ListChangeRequests => {
            let changes = controller.gate().list().await?;
            emit(&formatter.format_change_requests(&changes))
        }
        Commands::GetChangeRequest { tokens } => {
            for token in tokens {
                let change = controller.gate().get(&ApprovalToken::from(token)).await?;
                emit(&formatter.format_change_request(&change))?;
            }
            Ok(())
        }
        Commands::ApproveChangeRequest { tokens, user } => {
            for token in tokens {
                let change = controller
                    .gate()
                    .approve(&ApprovalToken::from(token), user.as_deref())
                    .await?;
                emit(&formatter.format_approvals(&change))?;
            }
            Ok(())
        }
        Commands::ListApprovals { token } => {
            let change = controller.gate().get(&ApprovalToken::from(token)).await?;
            emit(&formatter.format_approvals(&change))
        }
        Commands::ExecuteChangeRequest { tokens } => {
            for token in tokens {
                cmd_execute(controller.gate(), &ApprovalToken::from(token)).await?;
            }
            Ok(())
        }
    }
}

/// Validate and store the configuration.
fn cmd_configure(parser: &ConfigParser, config: &ClientConfig, path: &Path) -> Result<()> {
    let result = ConfigValidator::new().validate(config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }
    parser.store(config, path)
}

/// Render a template to stdout.
fn cmd_render_template(template: &Path, args: &TemplateArgs) -> Result<()> {
    let variables = parse_parameters(&args.parameters)?;
    let content = std::fs::read_to_string(template)?;
    let renderer = TemplateRenderer::new(args.mode);

    // Parse to catch non-mapping documents before printing.
    renderer.render_document(&content, &variables)?;
    emit(&renderer.render(&content, &variables)?)
}

/// Execute a change request.
async fn cmd_execute<R: DeploymentRegistry>(
    gate: &ApprovalGate<'_, R, LocalChangeStore>,
    token: &ApprovalToken,
) -> Result<()> {
    let applied = gate.execute(token).await?;
    info!("Applied {}", applied.change);
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads and validates the client configuration.
fn load_config(parser: &ConfigParser, path: &Path) -> Result<ClientConfig> {
    debug!("Loading configuration from: {}", path.display());
    let config = parser.load_with_env(path)?;

    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    Ok(config)
}

/// Opens the change store named by the configuration.
fn change_store(config: &ClientConfig) -> Result<LocalChangeStore> {
    config.approval.store_dir.as_ref().map_or_else(LocalChangeStore::new, |dir| {
        Ok(LocalChangeStore::with_base_dir(PathBuf::from(dir)))
    })
}

/// Cancels `cancel` on Ctrl-C. The task is aborted when the guard drops.
fn spawn_interrupt_handler(cancel: CancellationToken) -> AbortOnDrop {
    AbortOnDrop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling wait");
            cancel.cancel();
        }
    }))
}

/// Aborts a background task when dropped.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Writes a machine-readable result to stdout.
fn emit(output: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(output.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
