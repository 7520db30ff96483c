//! Output formatting for CLI commands.
//!
//! Text output is for people; JSON output is for pipelines. Proposed change
//! tokens are printed one per line in text mode so a script can capture them.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::approval::PendingChange;
use crate::registry::{Deployment, DeploymentStatus};
use crate::rollout::{ChangeOutcome, ReadinessReport, RetireOutcome, SwitchOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Deployment row for table display.
#[derive(Tabled)]
struct DeploymentRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Desired")]
    desired: u32,
    #[tabled(rename = "Ready")]
    ready: u32,
    #[tabled(rename = "Unavailable")]
    unavailable: u32,
    #[tabled(rename = "Stage")]
    stage: String,
    #[tabled(rename = "Created")]
    created: String,
}

/// Change request row for table display.
#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Token")]
    token: String,
    #[tabled(rename = "Op")]
    op: String,
    #[tabled(rename = "Deployment")]
    deployment: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Approvals")]
    approvals: usize,
    #[tabled(rename = "Proposed by")]
    proposed_by: String,
    #[tabled(rename = "Expires")]
    expires: String,
}

/// Approval row for table display.
#[derive(Tabled)]
struct ApprovalRow {
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Approved at")]
    approved_at: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the deployments of an application.
    #[must_use]
    pub fn format_deployments(&self, deployments: &[Deployment]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&deployments),
            OutputFormat::Text => {
                if deployments.is_empty() {
                    return String::from("No deployments found.\n");
                }

                let rows: Vec<DeploymentRow> = deployments
                    .iter()
                    .map(|d| DeploymentRow {
                        name: d.key.name(),
                        status: Self::format_status(d.status),
                        desired: d.desired_replicas,
                        ready: d.ready_replicas,
                        unavailable: d.unavailable_replicas,
                        stage: d.stage().unwrap_or("-").to_string(),
                        created: d.created_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats a replica count.
    #[must_use]
    pub fn format_replicas(&self, application: &str, replicas: u32) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "application": application,
                "replicas": replicas,
            })),
            OutputFormat::Text => format!("{replicas}\n"),
        }
    }

    /// Formats the result of a readiness wait.
    #[must_use]
    pub fn format_readiness(&self, report: &ReadinessReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => format!(
                "{} {} is ready ({}/{} replicas)\n",
                "✓".green(),
                report.deployment,
                report.ready,
                report.desired
            ),
        }
    }

    /// Formats submitted changes.
    ///
    /// In text mode only proposed tokens are printed, one per line.
    #[must_use]
    pub fn format_outcomes(&self, outcomes: &[ChangeOutcome]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&outcomes.iter().map(OutcomeJson::from).collect::<Vec<_>>()),
            OutputFormat::Text => Self::format_tokens(outcomes),
        }
    }

    /// Formats the result of a switch step.
    #[must_use]
    pub fn format_switch(&self, outcome: &SwitchOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(&SwitchJson {
                old_replicas: outcome.split.old_replicas,
                new_replicas: outcome.split.new_replicas,
                state: outcome.state.to_string(),
                changes: outcome.changes.iter().map(OutcomeJson::from).collect(),
            }),
            OutputFormat::Text => Self::format_tokens(&outcome.changes),
        }
    }

    /// Formats the result of deleting old deployments.
    #[must_use]
    pub fn format_retire(&self, outcome: &RetireOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(&RetireJson {
                state: outcome.state.to_string(),
                changes: outcome.changes.iter().map(OutcomeJson::from).collect(),
            }),
            OutputFormat::Text => Self::format_tokens(&outcome.changes),
        }
    }

    /// Formats a list of change requests.
    #[must_use]
    pub fn format_change_requests(&self, changes: &[PendingChange]) -> String {
        match self.format {
            OutputFormat::Json => to_json(&changes),
            OutputFormat::Text => {
                if changes.is_empty() {
                    return String::from("No change requests.\n");
                }

                let rows: Vec<ChangeRow> = changes
                    .iter()
                    .map(|c| ChangeRow {
                        token: c.token.to_string(),
                        op: c.change.kind().to_string(),
                        deployment: c.change.target().name(),
                        state: Self::format_change_state(c.state()),
                        approvals: c.approvals.len(),
                        proposed_by: c.proposed_by.clone(),
                        expires: c.expires_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats one change request.
    #[must_use]
    pub fn format_change_request(&self, change: &PendingChange) -> String {
        match self.format {
            OutputFormat::Json => to_json(change),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "Token:       {}", change.token);
                let _ = writeln!(output, "Change:      {}", change.change);
                let _ = writeln!(output, "State:       {}", Self::format_change_state(change.state()));
                let _ = writeln!(output, "Proposed by: {}", change.proposed_by);
                let _ = writeln!(output, "Created:     {}", change.created_at.to_rfc3339());
                let _ = writeln!(output, "Expires:     {}", change.expires_at.to_rfc3339());
                let _ = writeln!(output, "Approvals:   {}", change.approvals.len());
                if let Some(executed_at) = change.executed_at {
                    let _ = writeln!(output, "Executed:    {}", executed_at.to_rfc3339());
                }
                let _ = writeln!(output, "Digest:      {}", change.digest);
                output
            }
        }
    }

    /// Formats the approvals of a change request.
    #[must_use]
    pub fn format_approvals(&self, change: &PendingChange) -> String {
        match self.format {
            OutputFormat::Json => to_json(&change.approvals),
            OutputFormat::Text => {
                if change.approvals.is_empty() {
                    return String::from("No approvals.\n");
                }

                let rows: Vec<ApprovalRow> = change
                    .approvals
                    .iter()
                    .map(|a| ApprovalRow {
                        user: a.user.clone(),
                        approved_at: a.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    fn format_tokens(outcomes: &[ChangeOutcome]) -> String {
        outcomes
            .iter()
            .filter(|o| !o.is_applied())
            .fold(String::new(), |mut output, o| {
                let _ = writeln!(output, "{}", o.token());
                output
            })
    }

    /// Formats a deployment status with color.
    fn format_status(status: DeploymentStatus) -> String {
        match status {
            DeploymentStatus::Active => "active".green().to_string(),
            DeploymentStatus::Pending => "pending".yellow().to_string(),
            DeploymentStatus::Draining => "draining".yellow().to_string(),
            DeploymentStatus::Deleted => "deleted".dimmed().to_string(),
        }
    }

    /// Formats a change request state with color.
    fn format_change_state(state: &str) -> String {
        match state {
            "executed" => state.green().to_string(),
            "expired" => state.red().to_string(),
            _ => state.yellow().to_string(),
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    let mut output = serde_json::to_string_pretty(value).unwrap_or_default();
    output.push('\n');
    output
}

// JSON serialization helpers

#[derive(Serialize)]
struct OutcomeJson {
    token: String,
    applied: bool,
    change: Option<String>,
    replicas: Option<u32>,
}

impl From<&ChangeOutcome> for OutcomeJson {
    fn from(outcome: &ChangeOutcome) -> Self {
        match outcome {
            ChangeOutcome::Applied(applied) => Self {
                token: applied.token.to_string(),
                applied: true,
                change: Some(applied.change.to_string()),
                replicas: applied.deployment.as_ref().map(|d| d.desired_replicas),
            },
            ChangeOutcome::Proposed(token) => Self {
                token: token.to_string(),
                applied: false,
                change: None,
                replicas: None,
            },
        }
    }
}

#[derive(Serialize)]
struct SwitchJson {
    old_replicas: u32,
    new_replicas: u32,
    state: String,
    changes: Vec<OutcomeJson>,
}

#[derive(Serialize)]
struct RetireJson {
    state: String,
    changes: Vec<OutcomeJson>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalToken, Change};
    use crate::registry::DeploymentKey;
    use crate::rollout::{ReplicaSplit, RolloutState};

    fn proposed() -> ChangeOutcome {
        ChangeOutcome::Proposed(ApprovalToken::from("3f1c2a5e-8f7b-4d0e-9a55-0d7c1b1e2f3a"))
    }

    #[test]
    fn test_proposed_tokens_one_per_line() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let output = formatter.format_outcomes(&[proposed(), proposed()]);
        assert_eq!(
            output,
            "3f1c2a5e-8f7b-4d0e-9a55-0d7c1b1e2f3a\n3f1c2a5e-8f7b-4d0e-9a55-0d7c1b1e2f3a\n"
        );
    }

    #[test]
    fn test_switch_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let outcome = SwitchOutcome {
            split: ReplicaSplit { old_replicas: 7, new_replicas: 3 },
            state: RolloutState::FullyOn,
            changes: vec![proposed()],
        };

        let json: serde_json::Value = serde_json::from_str(&formatter.format_switch(&outcome)).unwrap();
        assert_eq!(json["old_replicas"], 7);
        assert_eq!(json["new_replicas"], 3);
        assert_eq!(json["changes"][0]["applied"], false);
    }

    #[test]
    fn test_replicas_text_is_bare_number() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        assert_eq!(formatter.format_replicas("shop", 12), "12\n");
    }

    #[test]
    fn test_change_requests_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let pending = PendingChange::new(
            Change::Delete {
                key: DeploymentKey::new("shop", "v1", "1").unwrap(),
            },
            "ci",
            chrono::Duration::seconds(60),
        );

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_change_requests(&[pending])).unwrap();
        assert_eq!(json[0]["change"]["op"], "delete");
        assert_eq!(json[0]["proposed_by"], "ci");
    }

    #[test]
    fn test_switch_text_prints_proposed_tokens_only() {
        let formatter = OutputFormatter::new(OutputFormat::Text);
        let applied = ChangeOutcome::Applied(crate::approval::AppliedChange {
            token: ApprovalToken::from("0a1b2c3d-0000-4000-8000-000000000000"),
            change: Change::Delete {
                key: DeploymentKey::new("shop", "v0", "1").unwrap(),
            },
            deployment: None,
        });
        let outcome = SwitchOutcome {
            split: ReplicaSplit { old_replicas: 5, new_replicas: 5 },
            state: RolloutState::Switching {
                step: crate::rollout::RolloutPlan { current_step: 1, total_steps: 2 },
            },
            changes: vec![
                ChangeOutcome::Proposed(ApprovalToken::from("11111111-1111-4111-8111-111111111111")),
                ChangeOutcome::Proposed(ApprovalToken::from("22222222-2222-4222-8222-222222222222")),
                applied,
            ],
        };

        let output = formatter.format_switch(&outcome);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(
            lines,
            vec![
                "11111111-1111-4111-8111-111111111111",
                "22222222-2222-4222-8222-222222222222",
            ]
        );
        assert!(output.ends_with('\n'));
    }

    #[test]
    fn test_retire_json_reports_state() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let outcome = RetireOutcome {
            state: RolloutState::Drained,
            changes: vec![proposed()],
        };

        let json: serde_json::Value =
            serde_json::from_str(&formatter.format_retire(&outcome)).unwrap();
        assert_eq!(json["state"], "drained");
        assert_eq!(json["changes"][0]["applied"], false);
    }
}
