//! CLI command definitions for the `cadence` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Validate and run workflow definitions locally.
#[derive(Parser)]
#[command(name = "cadence", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a cadence.toml config file.
    #[arg(long, global = true, env = "CADENCE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed logs (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file and print its execution order.
    Validate {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,
    },

    /// List every valid workflow file under a directory.
    #[command(alias = "ls")]
    List {
        /// Directory to scan.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Run a workflow file on an in-process engine and print the result.
    Run {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,

        /// Input variable as key=value (value parsed as JSON when possible).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,

        /// Recorded as the execution's trigger.
        #[arg(long, default_value = "cli")]
        triggered_by: String,

        /// Approve every human approval step.
        #[arg(long, conflicts_with = "reject")]
        approve: bool,

        /// Reject the first human approval step.
        #[arg(long)]
        reject: bool,
    },
}
