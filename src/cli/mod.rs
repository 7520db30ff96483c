//! CLI module for the stepwise deployment tool.
//!
//! This module provides the command-line interface used by pipeline steps.

mod commands;
mod output;

pub use commands::{Cli, Commands, DeploymentArgs, LogFormat, OutputFormat, TemplateArgs};
pub use output::OutputFormatter;
