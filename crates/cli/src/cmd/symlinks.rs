//! Symlink command implementation

use clap::{Args, Subcommand};
use mentat_engine::symlink::{SetupReport, VerifyReport};

use crate::command::Command;
use crate::common::RuntimeContext;
use crate::error::{CommandError, Result};
use crate::ui;

/// Manage the links from the home directory into the repository
#[derive(Debug, Args)]
pub struct SymlinksCommand {
    /// What to run
    #[command(subcommand)]
    pub action: SymlinksAction,
}

/// Symlink sub-commands
#[derive(Debug, Subcommand)]
pub enum SymlinksAction {
    /// Link every repository file into place, backing up what is in the way
    Setup,
    /// Check every managed link and recreate the ones that can be
    Verify,
    /// Verify, then run setup to fill in anything missing
    Repair,
}

impl Command for SymlinksCommand {
    type Output = ();

    fn execute(&self, context: &RuntimeContext) -> Result<()> {
        let ws = context.workspace();
        let symlinks = ws.symlinks();

        let broken = match &self.action {
            SymlinksAction::Setup => {
                print_setup(&symlinks.setup()?);
                0
            }
            SymlinksAction::Verify => {
                let report = symlinks.verify()?;
                print_verify(&report);
                report.broken.len()
            }
            SymlinksAction::Repair => {
                let (verify, setup) = symlinks.repair()?;
                print_verify(&verify);
                print_setup(&setup);
                verify.broken.len()
            }
        };

        if broken > 0 {
            Err(CommandError::BrokenLinks { count: broken })
        } else {
            Ok(())
        }
    }
}

fn print_setup(report: &SetupReport) {
    for link in &report.created {
        ui::success(format!("linked {}", link.display()));
    }
    for path in &report.backed_up {
        ui::warning(format!("moved aside {}", path.display()));
    }
    if let Some(dir) = &report.backup_dir {
        println!("Backups in {}", dir.display());
    }
    for link in &report.pruned {
        ui::warning(format!("removed stale link {}", link.display()));
    }
    ui::success(format!(
        "{} created, {} already in place",
        report.created.len(),
        report.unchanged
    ));
}

fn print_verify(report: &VerifyReport) {
    for link in &report.repaired {
        ui::success(format!("repaired {}", link.display()));
    }
    for link in &report.broken {
        ui::failure(format!("broken {}", link.display()));
    }
    let line = format!("{}/{} links healthy", report.healthy, report.total);
    if report.broken.is_empty() {
        ui::success(line);
    } else {
        ui::warning(line);
    }
}
