//! Mentat CLI library
//!
//! This library contains all the CLI logic for mentat, making it reusable
//! for testing and integration with other tools.

pub mod cmd;
pub mod command;
pub mod common;
pub mod error;
pub mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use command::Command;
use common::{ResolvedPaths, RuntimeContext};

/// Mentat - keep dotfiles in sync across machines
#[derive(Parser, Debug)]
#[command(name = "mentat")]
#[command(about = "Keep a dotfiles repository in sync across machines")]
#[command(version)]
#[command(long_about = "Keep a dotfiles repository in sync across machines

Each machine holds a checkout of one git repository whose home/ tree is
symlinked into the home directory. mentat commits and pushes local edits,
pulls and rebases remote ones, resolves the conflicts it can, and keeps
the links and a per-machine registry up to date.

Examples:
  • mentat sync full
      → Push, pull, verify symlinks, update the registry

  • mentat sync force-pull --dry-run
      → Show what a reset to the remote branch would discard

  • mentat health monitor 300
      → Re-check health every five minutes")]
pub struct Cli {
    /// Path to the dotfiles repository checkout
    #[arg(long, env = "MENTAT_DOTFILES_DIR", value_name = "DIR", global = true)]
    pub repo: Option<PathBuf>,

    /// Directory holding config, lock, journals and backups
    #[arg(long, env = "MENTAT_STATE_DIR", value_name = "DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Branch to sync (overrides `sync_branch` in config.json)
    #[arg(long, env = "MENTAT_SYNC_BRANCH", value_name = "NAME", global = true)]
    pub branch: Option<String>,

    /// Directory the repository's home/ tree is linked into
    #[arg(long, env = "MENTAT_HOME_DIR", value_name = "DIR", global = true)]
    pub home: Option<PathBuf>,

    /// Enable verbose output (shows DEBUG level logs)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append a debug trace to this file
    #[arg(long, env = "MENTAT_LOG_FILE", value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for mentat CLI
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Synchronize with the remote (full, push, pull, check, force-pull, daemon)
    Sync(cmd::sync::SyncCommand),

    /// Score and repair this machine's setup
    Health(cmd::health::HealthCommand),

    /// Detect, resolve and analyze merge conflicts
    #[command(name = "resolve-conflicts")]
    ResolveConflicts(cmd::conflicts::ConflictsCommand),

    /// Set up, verify and repair managed symlinks
    Symlinks(cmd::symlinks::SymlinksCommand),
}

impl Commands {
    /// Whether the command loops until a termination signal
    pub fn is_long_running(&self) -> bool {
        match self {
            Commands::Sync(sync) => sync.action.is_long_running(),
            Commands::Health(health) => health.action.is_long_running(),
            Commands::ResolveConflicts(_) | Commands::Symlinks(_) => false,
        }
    }
}

/// Termination handling for this invocation
///
/// Long-running commands get a flag and wind down after the current cycle;
/// everything else releases the sync lock and exits on the first signal.
fn install_signal_handling(command: &Commands, lock_dir: PathBuf) -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    if command.is_long_running() {
        register_stop_flag(&stop)?;
    } else {
        mentat_engine::lock::install_signal_cleanup(lock_dir)
            .context("Failed to install signal handler")?;
    }
    Ok(stop)
}

/// First termination signal sets `stop`; a second one exits immediately
///
/// The shutdown hook is registered before the flag so it sees the flag
/// from the previous signal, not the current one.
fn register_stop_flag(stop: &Arc<AtomicBool>) -> Result<()> {
    use signal_hook::flag;

    for signal in signal_hook::consts::TERM_SIGNALS {
        flag::register_conditional_shutdown(*signal, 128 + *signal, Arc::clone(stop))
            .context("Failed to register signal handler")?;
        flag::register(*signal, Arc::clone(stop)).context("Failed to register signal handler")?;
    }
    Ok(())
}

/// Main entry point for the CLI logic
///
/// # Errors
///
/// Returns the first error from path resolution, configuration loading or
/// the command itself.
pub fn run(cli: Cli) -> Result<()> {
    mentat_config::logging::init(cli.verbose, cli.log_file.as_deref())?;

    let paths = ResolvedPaths::resolve(
        cli.repo.as_deref(),
        cli.home.as_deref(),
        cli.state_dir.as_deref(),
    )?;
    let config = common::load_config(&paths.state, cli.branch.as_deref())?;
    tracing::debug!(
        repo = %paths.repo.display(),
        state = %paths.state.root().display(),
        branch = %config.sync_branch,
        "Resolved invocation"
    );

    let stop = install_signal_handling(&cli.command, paths.state.lock_dir())?;
    let context = RuntimeContext::new(config, paths)?.with_stop_flag(stop);

    execute_command(&cli.command, &context)?;
    Ok(())
}

/// Execute the command based on the command type
fn execute_command(command: &Commands, context: &RuntimeContext) -> error::Result<()> {
    match command {
        Commands::Sync(sync) => sync.execute(context),
        Commands::Health(health) => health.execute(context),
        Commands::ResolveConflicts(conflicts) => conflicts.execute(context),
        Commands::Symlinks(symlinks) => symlinks.execute(context),
    }
}
