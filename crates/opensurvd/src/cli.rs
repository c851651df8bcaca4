//! CLI - Command-line argument parsing for opensurvd

use clap::{Parser, Subcommand};
use opensurv_common::PLAN_NAME;
use std::path::PathBuf;

/// OpenSurv manager daemon
#[derive(Parser, Debug)]
#[command(name = "opensurvd")]
#[command(about = "OpenSurv manager daemon with self-update", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Config file (overrides the default search locations)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand (if not provided, serves the HTTP API)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Serve the HTTP API
    Serve,

    /// Apply a staged update (run by the installer launcher)
    #[command(hide = true)]
    ApplyUpdate {
        /// Pending-update marker written when the update was staged
        #[arg(long, default_value = PLAN_NAME)]
        plan: PathBuf,
    },

    /// Check for a newer release and print the result as JSON
    Check,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Serve)
    }
}
