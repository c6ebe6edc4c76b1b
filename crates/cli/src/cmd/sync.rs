//! Sync command implementation
//!
//! Routine cycles (`full`, `push`, `pull`, `check`), the daemon loop and the
//! force-pull protocol.

use clap::{Args, Subcommand};
use mentat_engine::health::HealthReport;
use mentat_engine::reset::{DryRunReport, ResetOptions, ResetReport, RestoreReport};
use mentat_engine::sync::StepOutcome;
use mentat_engine::system::HostInvocation;
use mentat_engine::{ForcePull, ForcePullOutcome, SyncMode, SyncOrchestrator, SyncReport};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::command::Command;
use crate::common::RuntimeContext;
use crate::error::{CommandError, Result};
use crate::ui::{self, progress::with_spinner};

/// Synchronize the dotfiles repository with its remote
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// What to run
    #[command(subcommand)]
    pub action: SyncAction,
}

/// Sync sub-commands
#[derive(Debug, Subcommand)]
pub enum SyncAction {
    /// Push, pull, verify symlinks and update the machine registry
    Full,
    /// Commit and push local changes only
    Push,
    /// Pull remote changes and refresh symlinks only
    Pull,
    /// Fetch and report health and divergence without changing anything
    Check,
    /// Replace local state with the remote branch (interactive only)
    #[command(name = "force-pull")]
    ForcePull(ForcePullArgs),
    /// Run full cycles on an interval until interrupted
    Daemon {
        /// Seconds between cycles (defaults to `sync_interval`)
        #[arg(long, value_name = "SECS")]
        interval: Option<u64>,
    },
}

/// Flags for `sync force-pull`
#[derive(Debug, Args, Default)]
pub struct ForcePullArgs {
    /// Show what would be discarded without changing anything
    #[arg(long, conflicts_with = "restore")]
    pub dry_run: bool,

    /// Restore the repository and symlinks from a force-pull backup
    #[arg(long, value_name = "BACKUP")]
    pub restore: Option<PathBuf>,

    /// Answer an arithmetic challenge instead of typing "yes"
    #[arg(short, long)]
    pub yes: bool,

    /// Run the configured package reinstall hook after the reset
    #[arg(long)]
    pub reinstall_packages: bool,
}

impl ForcePullArgs {
    /// Engine request for these flags
    pub fn request(&self) -> ForcePull {
        let options = ResetOptions {
            assume_yes: self.yes,
            reinstall_packages: self.reinstall_packages,
        };
        match (&self.restore, self.dry_run) {
            (Some(backup), _) => ForcePull::Restore {
                backup: backup.clone(),
                options,
            },
            (None, true) => ForcePull::DryRun,
            (None, false) => ForcePull::Execute(options),
        }
    }
}

impl SyncAction {
    /// Whether this action loops until a termination signal
    pub fn is_long_running(&self) -> bool {
        matches!(self, SyncAction::Daemon { .. })
    }
}

impl Command for SyncCommand {
    type Output = ();

    fn execute(&self, context: &RuntimeContext) -> Result<()> {
        let ws = context.workspace();
        let orchestrator = SyncOrchestrator::new(&ws, &context.prompt);

        match &self.action {
            SyncAction::Full => run_mode(&orchestrator, SyncMode::Full),
            SyncAction::Push => run_mode(&orchestrator, SyncMode::Push),
            SyncAction::Pull => run_mode(&orchestrator, SyncMode::Pull),
            SyncAction::Check => run_mode(&orchestrator, SyncMode::Check),
            SyncAction::ForcePull(args) => {
                let request = args.request();
                let outcome = if matches!(request, ForcePull::DryRun) {
                    with_spinner("Fetching remote state...", || {
                        orchestrator.force_pull(&HostInvocation, request)
                    })?
                } else {
                    orchestrator.force_pull(&HostInvocation, request)?
                };
                match outcome {
                    ForcePullOutcome::DryRun(report) => print_dry_run(&report),
                    ForcePullOutcome::Reset(report) => print_reset(&report),
                    ForcePullOutcome::Restored(report) => print_restore(&report),
                }
                Ok(())
            }
            SyncAction::Daemon { interval } => {
                let interval =
                    Duration::from_secs(interval.unwrap_or(context.config.sync_interval).max(1));
                println!(
                    "Syncing every {}s; press Ctrl-C to stop",
                    interval.as_secs()
                );
                let cycles = orchestrator.run_daemon(interval, context.stop_flag(), None);
                info!(cycles, "Daemon exited");
                ui::success(format!("Daemon stopped after {cycles} cycle(s)"));
                Ok(())
            }
        }
    }
}

/// One routine cycle; step failures make the command fail after reporting
fn run_mode(orchestrator: &SyncOrchestrator<'_, '_>, mode: SyncMode) -> Result<()> {
    let report = with_spinner(&format!("Running {mode} sync..."), || orchestrator.run(mode))?;
    print_sync_report(&report);
    match report.failures().count() {
        0 => Ok(()),
        failed => Err(CommandError::SyncIncomplete { failed }),
    }
}

fn print_sync_report(report: &SyncReport) {
    for step in &report.steps {
        match &step.outcome {
            StepOutcome::Done(detail) => ui::success(format!("{}: {detail}", step.step)),
            StepOutcome::Failed(reason) => ui::failure(format!("{}: {reason}", step.step)),
        }
    }
    if let Some(health) = &report.health {
        print_health_line(health);
    }
    if let Some(divergence) = report.divergence {
        let line = format!(
            "{} ahead, {} behind {}",
            divergence.ahead,
            divergence.behind,
            "remote".dimmed()
        );
        if divergence.diverged() {
            ui::warning(line);
        } else {
            ui::success(line);
        }
    }
}

/// One-line health summary shared with the health command
pub fn print_health_line(report: &HealthReport) {
    let scores = report.status.scores;
    let line = format!(
        "health {}/100 ({}) repository={} symlinks={} network={} disk={} sync={}",
        report.overall(),
        report.state(),
        scores.repository,
        scores.symlinks,
        scores.network,
        scores.disk,
        scores.sync,
    );
    match report.state() {
        mentat_engine::HealthState::Healthy => ui::success(line),
        mentat_engine::HealthState::Warning => ui::warning(line),
        mentat_engine::HealthState::Critical => ui::failure(line),
    }
}

fn short(rev: Option<&str>) -> &str {
    rev.map_or("none", |r| r.get(..12).unwrap_or(r))
}

fn print_dry_run(report: &DryRunReport) {
    ui::heading("Force pull preview (nothing was changed)");
    println!(
        "  {} -> {}",
        short(report.head.as_deref()),
        short(report.remote_head.as_deref())
    );
    println!(
        "  local commits discarded: {}",
        report.commits_discarded.red()
    );
    println!("  remote commits taken:    {}", report.commits_gained.green());
    println!("  managed symlinks rebuilt: {}", report.managed_links);
    if !report.uncommitted.is_empty() {
        ui::warning(format!(
            "{} uncommitted path(s) would be stashed:",
            report.uncommitted.len()
        ));
        for path in &report.uncommitted {
            println!("    {path}");
        }
    }
    if !report.files_changed.is_empty() {
        println!("  files replaced with the remote version:");
        for path in &report.files_changed {
            println!("    {path}");
        }
    }
}

fn print_reset(report: &ResetReport) {
    ui::success(format!(
        "Reset {} -> {}",
        short(report.head_before.as_deref()),
        short(report.head_after.as_deref())
    ));
    ui::success(format!("Backup saved to {}", report.backup_dir.display()));
    if report.stashed {
        ui::warning("Uncommitted changes were stashed (kept in the backup as well)");
    }
    ui::success(format!(
        "Symlinks rebuilt: {} removed, {} created",
        report.links_removed, report.links_created
    ));
    for hook in &report.hooks {
        if hook.success {
            ui::success(format!("hook: {}", hook.command));
        } else {
            ui::failure(format!("hook: {} ({})", hook.command, hook.output));
        }
    }
    println!(
        "Undo with: mentat sync force-pull --restore {}",
        report.backup_dir.display()
    );
}

fn print_restore(report: &RestoreReport) {
    ui::success(format!(
        "Restored repository at {} from {}",
        short(report.head.as_deref()),
        report.backup_dir.display()
    ));
    ui::success(format!("{} symlink(s) restored", report.links_restored));
    if let Some(dir) = &report.occupants_backup {
        ui::warning(format!(
            "{} file(s) in the way were moved to {}",
            report.moved_aside.len(),
            dir.display()
        ));
    }
}
