//! Force-reset protocol
//!
//! Replaces local state with the remote branch tip when ordinary sync
//! cannot reconcile. It runs in two phases so that no single automated call
//! can both decide on and carry out the destruction:
//!
//! 1. **Validation** ([`gate::validate_invocation`]): refuses non-terminal,
//!    CI, scheduler and agent invocations with `SecurityViolation` before
//!    anything is shown or written.
//! 2. **Confirmation and execution**: a literal `yes` (or a timed
//!    arithmetic challenge), then an unconditional backup, then the reset.
//!
//! Every failure after the backup is wrapped in `ResetFailed` carrying the
//! backup location. The protocol does not take the sync lock; refusing
//! automated callers stands in for it.

pub mod gate;
pub mod snapshot;

use crate::backup::{self, BackupKind};
use crate::error::{Error, Result};
use crate::hooks::{self, HookOutcome};
use crate::registry;
use crate::state::{Journal, Level};
use crate::workspace::Workspace;
use gate::Challenge;
use mentat_core::{InvocationContext, UserPrompt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Flags for [`ForceReset::execute`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetOptions {
    /// Replace the free-text confirmation with the arithmetic challenge
    pub assume_yes: bool,
    /// Run `hooks.reinstall_packages` after the reset
    pub reinstall_packages: bool,
}

/// What a completed reset did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    /// Snapshot taken before anything changed
    pub backup_dir: PathBuf,
    /// HEAD before the reset
    pub head_before: Option<String>,
    /// HEAD after the reset
    pub head_after: Option<String>,
    /// Whether uncommitted work was stashed (kept for forensics only)
    pub stashed: bool,
    /// Managed links removed before the reset
    pub links_removed: usize,
    /// Links created afterwards
    pub links_created: usize,
    /// Post-reset hook results
    pub hooks: Vec<HookOutcome>,
}

/// Read-only preview of a reset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DryRunReport {
    /// Local HEAD
    pub head: Option<String>,
    /// Tip of the remote branch after fetching
    pub remote_head: Option<String>,
    /// Local commits that would be discarded
    pub commits_discarded: usize,
    /// Remote commits that would be taken
    pub commits_gained: usize,
    /// Uncommitted paths that would be stashed away
    pub uncommitted: Vec<String>,
    /// Tracked files whose content differs from the remote tip
    pub files_changed: Vec<String>,
    /// Links that would be removed and recreated
    pub managed_links: usize,
}

/// What a restore did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Snapshot that was restored
    pub backup_dir: PathBuf,
    /// HEAD after restoring
    pub head: Option<String>,
    /// Links pointing at their recorded target afterwards
    pub links_restored: usize,
    /// Files that sat where a link belonged and were moved aside
    pub moved_aside: Vec<PathBuf>,
    /// Where `moved_aside` went
    pub occupants_backup: Option<PathBuf>,
}

/// Two-phase force reset: refuse automation, then confirm and reset
pub struct ForceReset<'w, 'a> {
    ws: &'w Workspace<'a>,
    invocation: &'w dyn InvocationContext,
    prompt: &'w dyn UserPrompt,
    challenge: Option<Challenge>,
    challenge_timeout: Duration,
}

impl<'w, 'a> ForceReset<'w, 'a> {
    /// Reset for `ws`, gated on `invocation` and confirmed through `prompt`
    pub fn new(
        ws: &'w Workspace<'a>,
        invocation: &'w dyn InvocationContext,
        prompt: &'w dyn UserPrompt,
    ) -> Self {
        Self {
            ws,
            invocation,
            prompt,
            challenge: None,
            challenge_timeout: gate::CHALLENGE_TIMEOUT,
        }
    }

    /// Use a fixed challenge instead of a random one
    #[must_use]
    pub fn with_challenge(mut self, challenge: Challenge) -> Self {
        self.challenge = Some(challenge);
        self
    }

    fn repo(&self) -> &Path {
        &self.ws.repo
    }

    fn upstream(&self) -> String {
        format!("{}/{}", self.ws.remote(), self.ws.branch())
    }

    /// Repository must be a work tree and the remote branch must exist
    fn preflight(&self) -> Result<String> {
        let ws = self.ws;
        if !ws.git.is_repository(self.repo()) {
            return Err(Error::RepositoryCorrupted {
                path: self.repo().to_path_buf(),
                reason: "not a git work tree".to_string(),
            });
        }
        ws.git
            .ls_remote(self.repo(), ws.remote(), ws.branch())?
            .ok_or_else(|| Error::Git(format!("remote branch {} does not exist", self.upstream())))
    }

    fn confirm(&self, warning: &str, options: ResetOptions) -> Result<()> {
        let challenge = self
            .challenge
            .unwrap_or_else(|| Challenge::random(&mut rand::rng()));
        gate::confirm(
            self.prompt,
            warning,
            options.assume_yes,
            challenge,
            self.challenge_timeout,
        )
    }

    /// Back up everything, then hard-reset to the remote branch tip
    #[tracing::instrument(skip(self))]
    pub fn execute(&self, options: ResetOptions) -> Result<ResetReport> {
        gate::validate_invocation(self.invocation)?;
        let remote_tip = self.preflight()?;

        let warning = format!(
            "FORCE PULL: this discards every local commit and uncommitted change in {}\n\
             and replaces it with {} ({}). Managed symlinks are rebuilt.\n\
             A full backup is taken first, but this cannot be undone automatically.",
            self.repo().display(),
            self.upstream(),
            short(&remote_tip),
        );
        self.confirm(&warning, options)?;

        let ws = self.ws;
        let backup_dir = backup::create_backup_dir(&ws.paths.backups_dir(), BackupKind::ForcePull)?;
        let head_before = ws.git.head(self.repo())?;
        snapshot::take(
            &backup_dir,
            self.repo(),
            &ws.home,
            head_before.clone(),
            ws.branch(),
            &ws.symlinks().managed_links()?,
        )?;

        match self.reset_after_backup(&backup_dir, head_before, options) {
            Ok(report) => Ok(report),
            Err(source) => {
                ws.state.record(
                    Journal::ForcePull,
                    Level::Error,
                    &format!("force-pull failed: {source}; backup={}", backup_dir.display()),
                );
                Err(Error::ResetFailed {
                    backup: backup_dir,
                    source: Box::new(source),
                })
            }
        }
    }

    fn reset_after_backup(
        &self,
        backup_dir: &Path,
        head_before: Option<String>,
        options: ResetOptions,
    ) -> Result<ResetReport> {
        let ws = self.ws;
        let repo = self.repo();

        ws.git.fetch_all(repo, ws.remote())?;
        let stashed = ws.git.stash(
            repo,
            &format!("mentat force-pull {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S")),
        )?;
        ws.git.reset_hard(repo, &self.upstream())?;
        ws.git.clean_untracked(repo)?;

        let symlinks = ws.symlinks();
        let links_removed = symlinks.remove_all()?;
        let setup = symlinks.setup()?;

        let mut commands: Vec<&str> = Vec::new();
        if options.reinstall_packages {
            match ws.config.hooks.reinstall_packages.as_deref() {
                Some(command) => commands.push(command),
                None => warn!("No reinstall_packages hook configured"),
            }
        }
        commands.extend(ws.config.hooks.post_reset.iter().map(String::as_str));
        let hook_outcomes = hooks::run_hooks(&commands, repo);
        for outcome in hook_outcomes.iter().filter(|o| !o.success) {
            ws.state.record(
                Journal::ForcePull,
                Level::Warn,
                &format!("hook failed: {} ({})", outcome.command, outcome.output),
            );
        }

        registry::record_presence(repo, &ws.machine_id)?;
        let head_after = ws.git.head(repo)?;

        ws.state.record(
            Journal::ForcePull,
            Level::Info,
            &format!(
                "force-pull machine={} head={} previous={} backup={} links_removed={links_removed} links_created={}",
                ws.machine_id,
                head_after.as_deref().unwrap_or("none"),
                head_before.as_deref().unwrap_or("none"),
                backup_dir.display(),
                setup.created.len(),
            ),
        );
        info!(backup = %backup_dir.display(), "Force pull complete");

        Ok(ResetReport {
            backup_dir: backup_dir.to_path_buf(),
            head_before,
            head_after,
            stashed,
            links_removed,
            links_created: setup.created.len(),
            hooks: hook_outcomes,
        })
    }

    /// Count what a reset would change without backing up or mutating
    /// anything but remote-tracking refs
    pub fn dry_run(&self) -> Result<DryRunReport> {
        let ws = self.ws;
        let repo = self.repo();
        self.preflight()?;
        ws.git.fetch(repo, ws.remote(), ws.branch())?;

        let upstream = self.upstream();
        let counts = ws
            .git
            .ahead_behind(repo, ws.remote(), ws.branch())?
            .unwrap_or_default();
        let head = ws.git.head(repo)?;
        let files_changed = match &head {
            Some(_) => ws.git.diff_names(repo, "HEAD", &upstream)?,
            None => Vec::new(),
        };

        Ok(DryRunReport {
            head,
            remote_head: ws.git.remote_head(repo, ws.remote(), ws.branch())?,
            commits_discarded: counts.ahead,
            commits_gained: counts.behind,
            uncommitted: ws.git.changed_files(repo)?,
            files_changed,
            managed_links: ws.symlinks().managed_links()?.links.len(),
        })
    }

    /// Put the repository and links back as they were in `backup_dir`
    #[tracing::instrument(skip(self))]
    pub fn restore(&self, backup_dir: &Path, options: ResetOptions) -> Result<RestoreReport> {
        gate::validate_invocation(self.invocation)?;
        let manifest = snapshot::SnapshotManifest::load(backup_dir)?;

        let warning = format!(
            "RESTORE: {} will be replaced with the copy from {} ({}), and symlinks\n\
             recreated as they were then. Current local state is discarded.",
            self.repo().display(),
            backup_dir.display(),
            manifest.created,
        );
        self.confirm(&warning, options)?;

        let ws = self.ws;
        let symlinks = ws.symlinks();
        symlinks.remove_all()?;
        snapshot::restore_repository(backup_dir, self.repo())?;

        let links = snapshot::recorded_links(backup_dir, &ws.home)?;
        let restored = snapshot::restore_links(&links, &ws.home, &ws.paths.backups_dir())?;
        let links_restored = restored.restored;
        ws.state.save_link_manifest(&links)?;

        let head = ws.git.head(self.repo())?;
        ws.state.record(
            Journal::ForcePull,
            Level::Info,
            &format!(
                "restore backup={} head={} links={links_restored} moved_aside={}",
                backup_dir.display(),
                head.as_deref().unwrap_or("none"),
                restored.backed_up.len()
            ),
        );
        Ok(RestoreReport {
            backup_dir: backup_dir.to_path_buf(),
            head,
            links_restored,
            moved_aside: restored.backed_up,
            occupants_backup: restored.backup_dir,
        })
    }
}

fn short(rev: &str) -> &str {
    rev.get(..12).unwrap_or(rev)
}
