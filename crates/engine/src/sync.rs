//! Sync orchestrator
//!
//! One cycle walks a fixed state machine under the sync lock:
//!
//! ```text
//! Idle -> LockAcquired -> HealthChecked -> Pushing -> Pulling
//!      -> SymlinksVerified -> RegistryUpdated -> Idle
//! ```
//!
//! Push always precedes pull so a rebase never has uncommitted local work
//! to discard, and symlink verification always follows the last repository
//! mutation. In [`SyncMode::Full`] push, pull, link and registry failures
//! are recorded and the cycle moves on (the next cycle retries them); the
//! single-step modes return the failure.

use crate::backup::{self, BackupKind};
use crate::conflict::{ConflictResolver, MergeStrategy};
use crate::error::{Error, Result};
use crate::git::{AheadBehind, InProgress, RebaseOutcome};
use crate::health::{self, HealthEvaluator, HealthReport};
use crate::registry::{self, REGISTRY_FILE};
use crate::reset::{DryRunReport, ForceReset, ResetOptions, ResetReport, RestoreReport, gate};
use crate::state::{Journal, Level};
use crate::workspace::Workspace;
use mentat_config::SyncSettings;
use mentat_core::{InvocationContext, UserPrompt};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Each `rebase --continue` may stop on the next replayed commit
const MAX_CONTINUE_ROUNDS: usize = 64;

/// Basenames listed in a commit message before "and N more"
const MESSAGE_FILES: usize = 5;

/// Which part of the cycle to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Health, push, pull, links and registry; step failures are soft
    Full,
    /// Commit and push local changes
    Push,
    /// Pull, then verify links
    Pull,
    /// Fetch and evaluate without touching the work tree
    Check,
}

impl SyncMode {
    /// Name used on the command line and in the journal
    pub fn name(self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Push => "push",
            SyncMode::Pull => "pull",
            SyncMode::Check => "check",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(SyncMode::Full),
            "push" => Ok(SyncMode::Push),
            "pull" => Ok(SyncMode::Pull),
            "check" => Ok(SyncMode::Check),
            other => Err(Error::Core(mentat_core::Error::Message(format!(
                "unknown sync mode '{other}'"
            )))),
        }
    }
}

/// States of one sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Not running
    Idle,
    /// Holding the sync lock
    LockAcquired,
    /// Health evaluated and the repository gate passed
    HealthChecked,
    /// Committing and pushing
    Pushing,
    /// Fetching and rebasing
    Pulling,
    /// Links verified and refreshed
    SymlinksVerified,
    /// This machine's registry entry written
    RegistryUpdated,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncState::Idle => "idle",
            SyncState::LockAcquired => "lock-acquired",
            SyncState::HealthChecked => "health-checked",
            SyncState::Pushing => "pushing",
            SyncState::Pulling => "pulling",
            SyncState::SymlinksVerified => "symlinks-verified",
            SyncState::RegistryUpdated => "registry-updated",
        })
    }
}

/// How one step ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Completed, with a short description
    Done(String),
    /// Failed softly, with the reason
    Failed(String),
}

/// One step of a cycle and how it ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    /// Which step
    pub step: SyncState,
    /// How it ended
    pub outcome: StepOutcome,
}

/// What the push step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// Clean tree and nothing unpushed
    NothingToCommit,
    /// Pushed to the remote
    Pushed {
        /// Message of the commit this step created, if it created one
        commit: Option<String>,
    },
}

/// What the pull step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    /// Nobody has pushed the branch yet
    NoRemoteBranch,
    /// Nothing new on the remote
    UpToDate,
    /// Remote commits applied without local ones
    FastForwarded,
    /// Local commits replayed on the remote tip; lists files the
    /// best-effort policy resolved along the way
    Rebased {
        /// Files resolved by policy during the rebase
        resolved: Vec<String>,
    },
}

impl fmt::Display for PullOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullOutcome::NoRemoteBranch => f.write_str("remote branch does not exist yet"),
            PullOutcome::UpToDate => f.write_str("already up to date"),
            PullOutcome::FastForwarded => f.write_str("fast-forwarded"),
            PullOutcome::Rebased { resolved } if resolved.is_empty() => f.write_str("rebased"),
            PullOutcome::Rebased { resolved } => {
                write!(f, "rebased, auto-resolved {}", resolved.join(", "))
            }
        }
    }
}

/// Result of one cycle
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Mode that ran
    pub mode: SyncMode,
    /// States walked, in order, starting and ending with `Idle`
    pub transitions: Vec<SyncState>,
    /// Steps attempted, in order
    pub steps: Vec<StepReport>,
    /// Health evaluation taken at the start (full and check)
    pub health: Option<HealthReport>,
    /// Push step result
    pub push: Option<PushOutcome>,
    /// Pull step result
    pub pull: Option<PullOutcome>,
    /// Divergence after the cycle, when the remote branch is known
    pub divergence: Option<AheadBehind>,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            transitions: vec![SyncState::Idle],
            steps: Vec::new(),
            health: None,
            push: None,
            pull: None,
            divergence: None,
        }
    }

    fn enter(&mut self, state: SyncState) {
        debug!(%state, "Sync state");
        self.transitions.push(state);
    }

    fn done(&mut self, step: SyncState, detail: impl Into<String>) {
        self.steps.push(StepReport {
            step,
            outcome: StepOutcome::Done(detail.into()),
        });
    }

    fn failed(&mut self, step: SyncState, err: &Error) {
        self.steps.push(StepReport {
            step,
            outcome: StepOutcome::Failed(err.to_string()),
        });
    }

    /// Steps that failed softly
    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
    }

    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Fixed-backoff retry for pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Policy from the `sync` section of the config
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            attempts: settings.push_attempts.max(1),
            backoff: Duration::from_secs(settings.retry_backoff_secs),
        }
    }

    /// Run `op` until it succeeds or attempts run out
    ///
    /// Authentication failures are returned at once. A rejected push (the
    /// remote moved) will not succeed by retrying either, so it ends the loop
    /// early as `PushFailed`.
    pub fn run<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match op() {
                Ok(()) => return Ok(()),
                Err(e @ Error::AuthenticationFailed(_)) => return Err(e),
                Err(e) => e,
            };
            if attempt >= attempts || is_rejection(&err) {
                return Err(Error::PushFailed {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }
            warn!(attempt, attempts, error = %err, "Push failed, retrying");
            if !self.backoff.is_zero() {
                std::thread::sleep(self.backoff);
            }
        }
    }
}

fn is_rejection(err: &Error) -> bool {
    let message = err.to_string();
    ["[rejected]", "non-fast-forward", "fetch first"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// What the pull step does with a file the rebase left unmerged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PullPolicy {
    TakeRemote,
    TakeLocal,
    MergeRegistry,
}

const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "conf", "ini", "cfg", "xml", "plist"];
const SHELL_EXTENSIONS: &[&str] = &["sh", "bash", "zsh", "fish"];
const PROFILE_FILES: &[&str] = &[".profile", ".bash_profile", ".zprofile"];

/// Best-effort policy for rebase conflicts; `None` leaves the file for a
/// human
fn pull_policy(file: &str) -> Option<PullPolicy> {
    if file == REGISTRY_FILE {
        return Some(PullPolicy::MergeRegistry);
    }
    let path = Path::new(file);
    let name = path.file_name()?.to_str()?;
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    if CONFIG_EXTENSIONS.contains(&extension) {
        Some(PullPolicy::TakeRemote)
    } else if name.ends_with("rc")
        || PROFILE_FILES.contains(&name)
        || SHELL_EXTENSIONS.contains(&extension)
    {
        Some(PullPolicy::TakeLocal)
    } else {
        None
    }
}

/// Commit message for the push step
///
/// `sync(<machine>): <timestamp> - a, b, c, d, e and 2 more`
pub fn commit_message(machine_id: &str, timestamp: &str, files: &[String]) -> String {
    let mut names: Vec<&str> = Vec::new();
    for file in files {
        let name = Path::new(file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file.as_str());
        if !names.contains(&name) {
            names.push(name);
        }
    }

    let mut list = names
        .iter()
        .take(MESSAGE_FILES)
        .copied()
        .collect::<Vec<_>>()
        .join(", ");
    if names.len() > MESSAGE_FILES {
        list.push_str(&format!(" and {} more", names.len() - MESSAGE_FILES));
    }
    format!("sync({machine_id}): {timestamp} - {list}")
}

/// Ways to ask for a force pull
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForcePull {
    /// Reset to the remote branch
    Execute(ResetOptions),
    /// Read-only preview
    DryRun,
    /// Restore from a force-pull snapshot
    Restore {
        /// Snapshot directory to restore from
        backup: PathBuf,
        /// Confirmation options
        options: ResetOptions,
    },
}

/// Result of [`SyncOrchestrator::force_pull`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForcePullOutcome {
    /// Reset done
    Reset(ResetReport),
    /// Preview only
    DryRun(DryRunReport),
    /// Snapshot restored
    Restored(RestoreReport),
}

/// Entry point for routine sync
pub struct SyncOrchestrator<'w, 'a> {
    ws: &'w Workspace<'a>,
    prompt: &'w dyn UserPrompt,
    retry: RetryPolicy,
    probe_network: bool,
}

impl<'w, 'a> SyncOrchestrator<'w, 'a> {
    /// Orchestrator retrying pushes per the workspace config
    pub fn new(ws: &'w Workspace<'a>, prompt: &'w dyn UserPrompt) -> Self {
        Self {
            ws,
            prompt,
            retry: RetryPolicy::from_settings(&ws.config.sync),
            probe_network: true,
        }
    }

    /// Override the push retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Skip the TCP probes in health evaluation
    #[must_use]
    pub fn with_network_probe(mut self, enabled: bool) -> Self {
        self.probe_network = enabled;
        self
    }

    fn repo(&self) -> &Path {
        &self.ws.repo
    }

    fn journal(&self, level: Level, message: &str) {
        self.ws.state.record(Journal::Sync, level, message);
    }

    /// Run one cycle under the sync lock
    ///
    /// The lock is released on every path out of this function.
    #[tracing::instrument(skip(self), fields(machine = %self.ws.machine_id))]
    pub fn run(&self, mode: SyncMode) -> Result<SyncReport> {
        let mut report = SyncReport::new(mode);
        let guard = match self.ws.lock_manager().acquire(self.ws.lock_timeout()) {
            Ok(guard) => guard,
            Err(e) => {
                self.journal(Level::Error, &format!("sync {mode}: {e}"));
                return Err(e);
            }
        };
        report.enter(SyncState::LockAcquired);
        self.journal(Level::Info, &format!("sync {mode} started"));

        let result = match mode {
            SyncMode::Full => self.full(&mut report),
            SyncMode::Push => self.push_only(&mut report),
            SyncMode::Pull => self.pull_only(&mut report),
            SyncMode::Check => self.check(&mut report),
        };

        if let Err(e) = guard.release() {
            warn!(error = %e, "Failed to release sync lock");
        }
        report.enter(SyncState::Idle);

        match result {
            Ok(()) => {
                let level = if report.is_clean() { Level::Info } else { Level::Warn };
                let failures = report.failures().count();
                self.journal(
                    level,
                    &format!("sync {mode} completed ({failures} step failures)"),
                );
                info!(%mode, failures, "Sync completed");
                Ok(report)
            }
            Err(e) => {
                self.journal(Level::Error, &format!("sync {mode} failed: {e}"));
                error!(%mode, error = %e, "Sync failed");
                Err(e)
            }
        }
    }

    fn full(&self, report: &mut SyncReport) -> Result<()> {
        let evaluator = HealthEvaluator::new(self.ws).with_network_probe(self.probe_network);
        let (health, repair) = evaluator.evaluate_and_repair()?;
        if let Some(repair) = &repair {
            info!(actions = repair.actions.len(), failures = repair.failures.len(), "Auto-repair ran");
        }
        let score = health.overall();
        report.health = Some(health);
        self.repository_gate()?;
        report.enter(SyncState::HealthChecked);
        report.done(SyncState::HealthChecked, format!("overall health {score}"));

        report.enter(SyncState::Pushing);
        match self.push_step() {
            Ok(outcome) => {
                report.done(SyncState::Pushing, describe_push(&outcome));
                report.push = Some(outcome);
            }
            Err(e) => self.soft_failure(report, SyncState::Pushing, &e),
        }

        report.enter(SyncState::Pulling);
        match self.pull_step() {
            Ok(outcome) => {
                report.done(SyncState::Pulling, outcome.to_string());
                report.pull = Some(outcome);
            }
            Err(e) => self.soft_failure(report, SyncState::Pulling, &e),
        }

        report.enter(SyncState::SymlinksVerified);
        match self.links_step() {
            Ok(detail) => report.done(SyncState::SymlinksVerified, detail),
            Err(e) => self.soft_failure(report, SyncState::SymlinksVerified, &e),
        }

        report.enter(SyncState::RegistryUpdated);
        match self.registry_step() {
            Ok(detail) => report.done(SyncState::RegistryUpdated, detail),
            Err(e) => self.soft_failure(report, SyncState::RegistryUpdated, &e),
        }

        report.divergence = self.divergence();
        Ok(())
    }

    fn push_only(&self, report: &mut SyncReport) -> Result<()> {
        self.repository_gate()?;
        report.enter(SyncState::HealthChecked);
        report.enter(SyncState::Pushing);
        let outcome = self.push_step()?;
        report.done(SyncState::Pushing, describe_push(&outcome));
        report.push = Some(outcome);
        report.divergence = self.divergence();
        Ok(())
    }

    fn pull_only(&self, report: &mut SyncReport) -> Result<()> {
        self.repository_gate()?;
        report.enter(SyncState::HealthChecked);
        report.enter(SyncState::Pulling);
        let outcome = self.pull_step()?;
        report.done(SyncState::Pulling, outcome.to_string());
        report.pull = Some(outcome);

        report.enter(SyncState::SymlinksVerified);
        let detail = self.links_step()?;
        report.done(SyncState::SymlinksVerified, detail);
        report.divergence = self.divergence();
        Ok(())
    }

    fn check(&self, report: &mut SyncReport) -> Result<()> {
        let ws = self.ws;
        if let Err(e) = ws.git.fetch(self.repo(), ws.remote(), ws.branch()) {
            warn!(error = %e, "Fetch failed, reporting against the last known remote state");
            report.failed(SyncState::HealthChecked, &e);
        }
        let health = HealthEvaluator::new(ws)
            .with_network_probe(self.probe_network)
            .evaluate()?;
        report.enter(SyncState::HealthChecked);
        report.done(
            SyncState::HealthChecked,
            format!("overall health {} ({})", health.overall(), health.state()),
        );
        report.health = Some(health);
        report.divergence = self.divergence();
        Ok(())
    }

    fn soft_failure(&self, report: &mut SyncReport, step: SyncState, err: &Error) {
        warn!(%step, error = %err, "Sync step failed, continuing");
        self.journal(Level::Warn, &format!("{step} failed: {err}"));
        report.failed(step, err);
    }

    /// Mutating steps need a work tree with no merge or rebase paused in it
    fn repository_gate(&self) -> Result<()> {
        let git = self.ws.git;
        if !git.is_repository(self.repo()) {
            return Err(Error::RepositoryCorrupted {
                path: self.repo().to_path_buf(),
                reason: "not a git work tree".to_string(),
            });
        }
        match git.in_progress(self.repo()) {
            InProgress::None => Ok(()),
            InProgress::Merge | InProgress::Rebase => Err(Error::ManualResolutionRequired {
                files: git.conflicted_files(self.repo())?,
            }),
        }
    }

    fn divergence(&self) -> Option<AheadBehind> {
        let ws = self.ws;
        ws.git
            .ahead_behind(self.repo(), ws.remote(), ws.branch())
            .ok()
            .flatten()
    }

    /// Whether HEAD has commits the remote-tracking branch lacks
    fn has_unpushed(&self) -> Result<bool> {
        let ws = self.ws;
        if ws.git.head(self.repo())?.is_none() {
            return Ok(false);
        }
        Ok(match ws.git.ahead_behind(self.repo(), ws.remote(), ws.branch())? {
            Some(counts) => counts.ahead > 0,
            None => true,
        })
    }

    fn push_with_retry(&self) -> Result<()> {
        let ws = self.ws;
        self.retry
            .run(|| ws.git.push(self.repo(), ws.remote(), ws.branch()))
    }

    #[tracing::instrument(skip(self))]
    fn push_step(&self) -> Result<PushOutcome> {
        let ws = self.ws;
        let repo = self.repo();

        let changed = ws.git.changed_files(repo)?;
        let commit = if changed.is_empty() {
            None
        } else {
            ws.git.stage_all(repo)?;
            let message = commit_message(&ws.machine_id, &crate::state::timestamp(), &changed);
            ws.git.commit(repo, &message)?;
            info!(files = changed.len(), "Committed local changes");
            Some(message)
        };

        if commit.is_none() && !self.has_unpushed()? {
            info!("No changes to commit");
            self.journal(Level::Info, "push: no changes to commit");
            return Ok(PushOutcome::NothingToCommit);
        }

        self.push_with_retry()?;
        self.journal(
            Level::Info,
            &format!(
                "push: {}",
                commit.as_deref().unwrap_or("pushed pending commits")
            ),
        );
        Ok(PushOutcome::Pushed { commit })
    }

    #[tracing::instrument(skip(self))]
    fn pull_step(&self) -> Result<PullOutcome> {
        let ws = self.ws;
        let repo = self.repo();
        ws.git.fetch(repo, ws.remote(), ws.branch())?;

        let Some(remote_head) = ws.git.remote_head(repo, ws.remote(), ws.branch())? else {
            return Ok(PullOutcome::NoRemoteBranch);
        };
        if ws.git.head(repo)?.as_deref() == Some(remote_head.as_str()) {
            return Ok(PullOutcome::UpToDate);
        }
        let counts = ws
            .git
            .ahead_behind(repo, ws.remote(), ws.branch())?
            .unwrap_or_default();
        if counts.behind == 0 {
            return Ok(PullOutcome::UpToDate);
        }

        let outcome = if ws.git.fast_forward(repo, ws.remote(), ws.branch())? {
            PullOutcome::FastForwarded
        } else {
            match ws.git.rebase(repo, ws.remote(), ws.branch())? {
                RebaseOutcome::Completed => PullOutcome::Rebased {
                    resolved: Vec::new(),
                },
                RebaseOutcome::Conflicts(files) => self.settle_rebase(files)?,
            }
        };
        self.journal(Level::Info, &format!("pull: {outcome}"));
        Ok(outcome)
    }

    /// Apply the best-effort policy and continue; abort the rebase if
    /// anything is left for a human
    fn settle_rebase(&self, files: Vec<String>) -> Result<PullOutcome> {
        match self.resolve_rebase_conflicts(files) {
            Ok(resolved) => Ok(PullOutcome::Rebased { resolved }),
            Err(e) => {
                if self.ws.git.in_progress(self.repo()) == InProgress::Rebase {
                    if let Err(abort) = self.ws.git.rebase_abort(self.repo()) {
                        error!(error = %abort, "Failed to abort rebase");
                    } else {
                        info!("Rebase aborted, repository back in its pre-pull state");
                    }
                }
                Err(e)
            }
        }
    }

    fn resolve_rebase_conflicts(&self, mut pending: Vec<String>) -> Result<Vec<String>> {
        let ws = self.ws;
        let resolver = ConflictResolver::new(ws, self.prompt);
        let backup_dir = backup::create_backup_dir(&ws.paths.backups_dir(), BackupKind::Conflict)?;
        let mut resolved = Vec::new();

        for _ in 0..MAX_CONTINUE_ROUNDS {
            let mut manual = Vec::new();
            for file in pending {
                match pull_policy(&file) {
                    Some(PullPolicy::MergeRegistry) => resolver.merge_registry(&file, &backup_dir)?,
                    Some(PullPolicy::TakeRemote) => {
                        resolver.resolve_with_backup(&file, Some(MergeStrategy::PreferRemote), &backup_dir)?;
                    }
                    Some(PullPolicy::TakeLocal) => {
                        resolver.resolve_with_backup(&file, Some(MergeStrategy::PreferLocal), &backup_dir)?;
                    }
                    None => {
                        manual.push(file);
                        continue;
                    }
                }
                resolved.push(file);
            }

            if !manual.is_empty() {
                warn!(files = ?manual, "Conflicts need manual resolution");
                return Err(Error::ManualResolutionRequired { files: manual });
            }
            match ws.git.rebase_continue(self.repo())? {
                RebaseOutcome::Completed => return Ok(resolved),
                RebaseOutcome::Conflicts(next) => pending = next,
            }
        }
        Err(Error::ManualResolutionRequired {
            files: ws.git.conflicted_files(self.repo())?,
        })
    }

    fn links_step(&self) -> Result<String> {
        let (verified, setup) = self.ws.symlinks().repair()?;
        let detail = format!(
            "{} healthy, {} repaired, {} created, {} broken",
            verified.healthy,
            verified.repaired.len(),
            setup.created.len(),
            verified.broken.len()
        );
        if !verified.broken.is_empty() {
            self.journal(
                Level::Warn,
                &format!("symlinks: {} broken links remain", verified.broken.len()),
            );
        }
        Ok(detail)
    }

    /// Record this machine in the registry, commit it and push best-effort
    fn registry_step(&self) -> Result<String> {
        let ws = self.ws;
        let repo = self.repo();
        let path = repo.join(REGISTRY_FILE);

        let before = fs::read(&path).ok();
        let timestamp = registry::record_presence(repo, &ws.machine_id)?;
        if fs::read(&path).ok() != before {
            ws.git.commit_paths(
                repo,
                &[REGISTRY_FILE],
                &format!("registry({}): {timestamp}", ws.machine_id),
            )?;
        }

        if !self.has_unpushed()? {
            return Ok("registry up to date".to_string());
        }
        match self.push_with_retry() {
            Ok(()) => Ok(format!("recorded {} at {timestamp}", ws.machine_id)),
            Err(e) => {
                warn!(error = %e, "Registry push failed, will retry next cycle");
                Ok(format!("recorded {} at {timestamp} (push pending: {e})", ws.machine_id))
            }
        }
    }

    /// Route a force pull through the invocation check, then the reset
    /// protocol
    ///
    /// Dry runs only read, so they skip the check.
    pub fn force_pull(
        &self,
        invocation: &dyn InvocationContext,
        request: ForcePull,
    ) -> Result<ForcePullOutcome> {
        let reset = ForceReset::new(self.ws, invocation, self.prompt);
        match request {
            ForcePull::DryRun => reset.dry_run().map(ForcePullOutcome::DryRun),
            ForcePull::Execute(options) => {
                gate::validate_invocation(invocation)?;
                reset.execute(options).map(ForcePullOutcome::Reset)
            }
            ForcePull::Restore { backup, options } => {
                gate::validate_invocation(invocation)?;
                reset.restore(&backup, options).map(ForcePullOutcome::Restored)
            }
        }
    }

    /// Run full cycles every `interval` until `stop` is set
    ///
    /// Failed cycles are logged and retried on the next tick. Returns the
    /// number of cycles run.
    pub fn run_daemon(&self, interval: Duration, stop: &AtomicBool, max_cycles: Option<u64>) -> u64 {
        let mut cycles = 0u64;
        info!(interval_secs = interval.as_secs(), "Sync daemon started");

        while !stop.load(Ordering::Relaxed) {
            match self.run(SyncMode::Full) {
                Ok(report) if report.is_clean() => debug!("Daemon cycle clean"),
                Ok(report) => warn!(failures = report.failures().count(), "Daemon cycle had failures"),
                Err(e) if e.is_retryable() => warn!(error = %e, "Daemon cycle skipped"),
                Err(e) => error!(error = %e, "Daemon cycle failed"),
            }
            cycles += 1;
            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            health::sleep_unless_stopped(interval, stop);
        }

        info!(cycles, "Sync daemon stopped");
        cycles
    }
}

fn describe_push(outcome: &PushOutcome) -> String {
    match outcome {
        PushOutcome::NothingToCommit => "no changes to commit".to_string(),
        PushOutcome::Pushed { commit: Some(message) } => format!("pushed \"{message}\""),
        PushOutcome::Pushed { commit: None } => "pushed pending commits".to_string(),
    }
}
