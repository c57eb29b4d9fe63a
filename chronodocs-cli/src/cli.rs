use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "chronodocs", version)]
#[command(about = "Keep phase documents prefixed in creation order")]
pub struct Cli {
    /// Repository root the phase directory template is resolved against
    #[arg(long, global = true, value_name = "DIR")]
    pub repo_root: Option<PathBuf>,

    /// Configuration file (TOML or JSON); overrides discovery
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one reconciliation pass and print the renames
    Reconcile {
        #[command(flatten)]
        phase: PhaseArgs,
        /// Report the rename plan without touching any file
        #[arg(long)]
        dry_run: bool,
    },
    /// Reconcile now, then keep the directory reconciled until Ctrl-C
    Watch {
        #[command(flatten)]
        phase: PhaseArgs,
        /// Override debounce.phase (milliseconds)
        #[arg(long, value_name = "MS")]
        debounce_ms: Option<u64>,
        /// Override debounce.min_interval_phase (milliseconds)
        #[arg(long, value_name = "MS")]
        min_interval_ms: Option<u64>,
    },
    /// Inspect the effective configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args, Debug, Clone)]
pub struct PhaseArgs {
    /// Phase name substituted into phase_dir_template
    #[arg(long)]
    pub phase: String,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
}
