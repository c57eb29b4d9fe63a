use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chronodocs_config::{ChronodocsConfig, ConfigSource, LogFormat, LoggingConfig};
use chronodocs_core::{PhaseWatcher, ReconcileReport, Reconciler};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

use cli::{Cli, Command, ConfigAction};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let repo_root = match cli.repo_root {
        Some(root) => root,
        None => env::current_dir().context("failed to resolve current directory")?,
    };
    let (config, source) = ChronodocsConfig::load(cli.config.as_deref(), &repo_root)?;

    init_tracing(&config.logging);
    info!(%source, "configuration resolved");

    match cli.command {
        Command::Reconcile { phase, dry_run } => {
            let dir = config.phase_dir(&repo_root, &phase.phase)?;
            reconcile(dir, &config, dry_run).await
        }
        Command::Watch {
            phase,
            debounce_ms,
            min_interval_ms,
        } => {
            let dir = config.phase_dir(&repo_root, &phase.phase)?;
            let mut config = config;
            if let Some(ms) = debounce_ms {
                config.debounce.phase = ms;
            }
            if let Some(ms) = min_interval_ms {
                config.debounce.min_interval_phase = ms;
            }
            watch(dir, &config).await
        }
        Command::Config {
            action: ConfigAction::Show,
        } => show_config(&config, &source),
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn reconcile(dir: PathBuf, config: &ChronodocsConfig, dry_run: bool) -> Result<()> {
    let mut reconciler = Reconciler::new(dir, config.ignore_set());
    let report = tokio::task::spawn_blocking(move || reconciler.reconcile(dry_run))
        .await
        .context("reconciliation task panicked")??;

    print_report(&report);
    info!(
        dry_run,
        observed = report.observed,
        planned = report.planned.len(),
        renamed = report.renamed.len(),
        skipped = report.skipped.len(),
        "reconcile finished"
    );
    Ok(())
}

fn print_report(report: &ReconcileReport) {
    let lines = if report.dry_run {
        &report.planned
    } else {
        &report.renamed
    };
    for rename in lines {
        println!("{} -> {}", rename.from_name(), rename.to_name());
    }
}

async fn watch(dir: PathBuf, config: &ChronodocsConfig) -> Result<()> {
    let reconciler = Reconciler::new(&dir, config.ignore_set());
    let mut watcher = PhaseWatcher::start(reconciler, config.scheduler_settings())
        .await
        .with_context(|| format!("failed to watch {}", dir.display()))?;
    info!(dir = %dir.display(), "watching for changes, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;

    info!("stopping, waiting for any pass in flight");
    watcher.stop().await;
    info!(
        passes = watcher.scheduler().completed_runs(),
        "watcher stopped"
    );
    Ok(())
}

fn show_config(config: &ChronodocsConfig, source: &ConfigSource) -> Result<()> {
    println!("# source: {source}");
    print!("{}", config.to_toml_string()?);
    Ok(())
}
