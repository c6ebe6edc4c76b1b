//! Health command implementation

use clap::{Args, Subcommand};
use mentat_engine::HealthEvaluator;
use mentat_engine::health::{CRITICAL_ALERT_AFTER, HealthReport, HealthState, RepairReport};
use owo_colors::OwoColorize;
use std::time::Duration;

use crate::cmd::sync::print_health_line;
use crate::command::Command;
use crate::common::RuntimeContext;
use crate::error::{CommandError, Result};
use crate::ui::{self, progress::with_spinner};

/// Evaluate and repair the health of this machine's setup
#[derive(Debug, Args)]
pub struct HealthCommand {
    /// What to run
    #[command(subcommand)]
    pub action: HealthAction,
}

/// Health sub-commands
#[derive(Debug, Subcommand)]
pub enum HealthAction {
    /// Score repository, symlinks, network, disk and sync state once
    Check,
    /// Re-evaluate every INTERVAL seconds, repairing when needed
    Monitor {
        /// Seconds between evaluations
        #[arg(value_name = "INTERVAL")]
        interval: u64,

        /// Stop after this many evaluations
        #[arg(long, value_name = "N")]
        count: Option<u64>,
    },
    /// Run every applicable repair under the sync lock, then evaluate again
    Repair,
}

impl HealthAction {
    /// Whether this action loops until a termination signal
    pub fn is_long_running(&self) -> bool {
        matches!(self, HealthAction::Monitor { .. })
    }
}

impl Command for HealthCommand {
    type Output = ();

    fn execute(&self, context: &RuntimeContext) -> Result<()> {
        let ws = context.workspace();
        let evaluator = HealthEvaluator::new(&ws);

        match &self.action {
            HealthAction::Check => {
                let report = with_spinner("Checking health...", || evaluator.evaluate())?;
                print_report(&report);
                if report.needs_repair() {
                    println!("Run {} to fix what can be fixed", "mentat health repair".cyan());
                }
                if report.state() == HealthState::Critical {
                    return Err(CommandError::Unhealthy {
                        score: report.overall(),
                    });
                }
                Ok(())
            }
            HealthAction::Monitor { interval, count } => {
                let interval = Duration::from_secs((*interval).max(1));
                evaluator.monitor(interval, *count, context.stop_flag(), |report, alert| {
                    print_health_line(report);
                    if alert {
                        ui::failure(format!(
                            "ALERT: health has been critical for {CRITICAL_ALERT_AFTER} consecutive checks"
                        ));
                    }
                })?;
                Ok(())
            }
            HealthAction::Repair => {
                let repair =
                    with_spinner("Repairing...", || evaluator.repair_locked(ws.lock_timeout()))?;
                print_repair(&repair);
                let report = evaluator.evaluate()?;
                print_report(&report);
                Ok(())
            }
        }
    }
}

fn print_report(report: &HealthReport) {
    print_health_line(report);
    for issue in &report.issues {
        ui::warning(format!("{}: {}", issue.check, issue.message));
    }
}

fn print_repair(repair: &RepairReport) {
    if repair.actions.is_empty() && repair.failures.is_empty() {
        ui::success("Nothing to repair");
    }
    for action in &repair.actions {
        ui::success(action);
    }
    for failure in &repair.failures {
        ui::failure(failure);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_monitor_is_long_running() {
        assert!(
            HealthAction::Monitor {
                interval: 60,
                count: Some(3)
            }
            .is_long_running()
        );
        assert!(!HealthAction::Check.is_long_running());
        assert!(!HealthAction::Repair.is_long_running());
    }
}
