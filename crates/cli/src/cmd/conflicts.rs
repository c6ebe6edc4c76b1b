//! Conflict resolution command implementation

use clap::{Args, Subcommand};
use mentat_engine::conflict::{ConflictAnalysis, Resolution, ResolveAllReport};
use mentat_engine::{ConflictResolver, MergeStrategy};
use owo_colors::OwoColorize;

use crate::command::Command;
use crate::common::RuntimeContext;
use crate::error::Result;
use crate::ui::{self, progress::with_spinner};

/// Files listed per section of the analysis
const TOP_FILES: usize = 10;

/// Detect, resolve and analyze merge conflicts
#[derive(Debug, Args)]
pub struct ConflictsCommand {
    /// What to run
    #[command(subcommand)]
    pub action: ConflictsAction,
}

/// Conflict sub-commands
#[derive(Debug, Subcommand)]
pub enum ConflictsAction {
    /// Resolve one file, or every unmerged file and continue
    Resolve {
        /// union, section, prefer-remote (theirs), prefer-local (ours),
        /// interactive, or auto to use the per-file policy
        #[arg(value_name = "STRATEGY")]
        strategy: String,

        /// Repository-relative path; all unmerged files when omitted
        #[arg(value_name = "FILE")]
        file: Option<String>,
    },
    /// List unmerged files
    Detect,
    /// Summarize resolutions from the last DAYS days
    Analyze {
        /// Window size in days
        #[arg(value_name = "DAYS", default_value_t = 30)]
        days: u32,
    },
    /// Fetch and warn about files changed on both sides
    Prevent,
    /// Delete old conflict, force-pull and link backups
    Clean {
        /// Keep backups younger than this (defaults to `backup_retention_days`)
        #[arg(long, value_name = "N")]
        days: Option<u32>,
    },
}

impl Command for ConflictsCommand {
    type Output = ();

    fn execute(&self, context: &RuntimeContext) -> Result<()> {
        let ws = context.workspace();
        let resolver = ConflictResolver::new(&ws, &context.prompt);

        match &self.action {
            ConflictsAction::Resolve { strategy, file } => {
                let strategy = MergeStrategy::parse_override(strategy)?;
                match file {
                    Some(file) => match resolver.resolve(file, strategy)? {
                        Resolution::Resolved(used) => {
                            ui::success(format!("{file}: resolved with {used}"));
                        }
                        Resolution::Skipped => ui::warning(format!("{file}: skipped")),
                    },
                    None => {
                        let report = resolver.resolve_all(strategy)?;
                        print_resolve_all(&report);
                        if !report.remaining.is_empty() {
                            return Err(mentat_engine::Error::ManualResolutionRequired {
                                files: report.remaining,
                            }
                            .into());
                        }
                    }
                }
                Ok(())
            }
            ConflictsAction::Detect => {
                let files = resolver.detect()?;
                if files.is_empty() {
                    ui::success("No conflicts");
                } else {
                    ui::warning(format!("{} conflicted file(s):", files.len()));
                    for file in files {
                        println!("  {}", file.red());
                    }
                }
                Ok(())
            }
            ConflictsAction::Analyze { days } => {
                print_analysis(&resolver.analyze(*days)?);
                Ok(())
            }
            ConflictsAction::Prevent => {
                let report = with_spinner("Fetching...", || resolver.prevent_check())?;
                if report.at_risk() {
                    ui::warning(format!(
                        "Diverged ({} ahead, {} behind); both sides changed:",
                        report.ahead, report.behind
                    ));
                    for file in &report.overlapping {
                        println!("  {}", file.yellow());
                    }
                    println!("Sync soon, or resolve with {}", "mentat resolve-conflicts resolve auto".cyan());
                } else {
                    ui::success(format!(
                        "No overlapping changes ({} ahead, {} behind)",
                        report.ahead, report.behind
                    ));
                }
                Ok(())
            }
            ConflictsAction::Clean { days } => {
                let days = days.unwrap_or(context.config.conflicts.backup_retention_days);
                let removed = resolver.clean(days)?;
                ui::success(format!("Removed {removed} backup(s) older than {days} day(s)"));
                Ok(())
            }
        }
    }
}

fn print_resolve_all(report: &ResolveAllReport) {
    if report.resolved.is_empty() && report.skipped.is_empty() {
        ui::success("No conflicts");
        return;
    }
    for (file, strategy) in &report.resolved {
        ui::success(format!("{file}: resolved with {strategy}"));
    }
    for file in &report.skipped {
        ui::warning(format!("{file}: skipped"));
    }
    if let Some(dir) = &report.backup_dir {
        println!("Backups in {}", dir.display());
    }
    if report.completed {
        ui::success("Merge completed");
    }
    for file in &report.remaining {
        ui::failure(format!("{file}: still conflicted"));
    }
}

fn print_analysis(analysis: &ConflictAnalysis) {
    ui::heading(format!(
        "{} resolution(s) in the last {} day(s)",
        analysis.total, analysis.window_days
    ));
    if analysis.total == 0 {
        return;
    }

    println!("Most conflicted files:");
    for (file, count) in analysis.by_file.iter().take(TOP_FILES) {
        println!("  {count:>4}  {file}");
    }
    println!("Strategies:");
    for (strategy, count) in &analysis.by_strategy {
        println!("  {count:>4}  {strategy}");
    }
    if let Some(hour) = analysis.busiest_hour() {
        println!("Busiest hour: {hour:02}:00");
    }
}
