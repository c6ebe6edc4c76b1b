//! Conflict resolver
//!
//! Resolves files git left unmerged after a merge or rebase. Before any
//! file is touched, every version of it (base, local, remote and the raw
//! conflicted working copy) is written to a fresh backup directory.
//! Strategy selection goes through [`PolicyTable`] unless the caller
//! overrides it.

pub mod history;
pub mod merge;
pub mod policy;

use crate::backup::{self, BackupKind};
use crate::error::{Error, Result};
use crate::git::{InProgress, RebaseOutcome, Version};
use crate::registry::{self, MachineRegistry};
use crate::state::{Journal, Level};
use crate::workspace::Workspace;
use mentat_core::UserPrompt;
use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use history::{ConflictAnalysis, analyze};
pub use policy::{FilePattern, MergeStrategy, PolicyTable};

/// How one `resolve` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Merged and staged using this strategy
    Resolved(MergeStrategy),
    /// Left unmerged at the user's request
    Skipped,
}

/// Outcome of [`ConflictResolver::resolve_all`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveAllReport {
    /// Files resolved, with the strategy that resolved them
    pub resolved: Vec<(String, MergeStrategy)>,
    /// Files the user chose to skip
    pub skipped: Vec<String>,
    /// Files still unmerged after the merge/rebase was continued
    pub remaining: Vec<String>,
    /// Where every version of every file was saved
    pub backup_dir: Option<PathBuf>,
    /// Whether the paused merge or rebase was completed
    pub completed: bool,
}

/// Result of [`ConflictResolver::prevent_check`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreventReport {
    /// Local commits not on the remote
    pub ahead: usize,
    /// Remote commits not merged locally
    pub behind: usize,
    /// Files changed on both sides since the merge base
    pub overlapping: Vec<String>,
}

impl PreventReport {
    /// Whether the next pull is likely to conflict
    pub fn at_risk(&self) -> bool {
        self.ahead > 0 && self.behind > 0 && !self.overlapping.is_empty()
    }
}

/// A rebase may stop again on every replayed commit
const MAX_ROUNDS: usize = 64;

const MENU: &[&str] = &[
    "Keep local version",
    "Accept remote version",
    "View diff",
    "Edit manually",
    "Auto-merge (line union)",
    "Skip this file",
];

/// Resolves unmerged files in the workspace repository
pub struct ConflictResolver<'w, 'a> {
    ws: &'w Workspace<'a>,
    prompt: &'w dyn UserPrompt,
    policy: PolicyTable,
}

impl<'w, 'a> ConflictResolver<'w, 'a> {
    /// Resolver using the default per-file policy
    pub fn new(ws: &'w Workspace<'a>, prompt: &'w dyn UserPrompt) -> Self {
        Self {
            ws,
            prompt,
            policy: PolicyTable::default(),
        }
    }

    /// Replace the per-file policy
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyTable) -> Self {
        self.policy = policy;
        self
    }

    fn repo(&self) -> &Path {
        &self.ws.repo
    }

    /// Files currently unmerged
    pub fn detect(&self) -> Result<Vec<String>> {
        self.ws.git.conflicted_files(self.repo())
    }

    /// Resolve one file, backing up every version first
    pub fn resolve(&self, file: &str, strategy: Option<MergeStrategy>) -> Result<Resolution> {
        if !self.detect()?.iter().any(|f| f == file) {
            return Err(Error::Git(format!("{file} is not in conflict")));
        }
        let backup_dir = backup::create_backup_dir(&self.ws.paths.backups_dir(), BackupKind::Conflict)?;
        self.resolve_with_backup(file, strategy, &backup_dir)
    }

    /// Resolve every unmerged file, then continue the rebase or commit the
    /// merge
    #[tracing::instrument(skip(self))]
    pub fn resolve_all(&self, strategy: Option<MergeStrategy>) -> Result<ResolveAllReport> {
        let mut report = ResolveAllReport::default();
        let mut pending = self.detect()?;
        if pending.is_empty() {
            return Ok(report);
        }

        let backup_dir = backup::create_backup_dir(&self.ws.paths.backups_dir(), BackupKind::Conflict)?;
        report.backup_dir = Some(backup_dir.clone());

        for _ in 0..MAX_ROUNDS {
            for file in &pending {
                match self.resolve_with_backup(file, strategy, &backup_dir)? {
                    Resolution::Resolved(used) => report.resolved.push((file.clone(), used)),
                    Resolution::Skipped => report.skipped.push(file.clone()),
                }
            }
            if !report.skipped.is_empty() {
                break;
            }

            match self.ws.git.in_progress(self.repo()) {
                InProgress::Rebase => match self.ws.git.rebase_continue(self.repo())? {
                    RebaseOutcome::Completed => {
                        report.completed = true;
                        break;
                    }
                    RebaseOutcome::Conflicts(next) => pending = next,
                },
                InProgress::Merge => {
                    self.ws.git.commit_merge(self.repo())?;
                    report.completed = true;
                    break;
                }
                InProgress::None => {
                    report.completed = true;
                    break;
                }
            }
        }

        report.remaining = self.detect()?;
        if !report.remaining.is_empty() {
            warn!(files = ?report.remaining, "Conflicts remain");
        }
        Ok(report)
    }

    /// Fetch without merging and report files both sides changed
    #[tracing::instrument(skip(self))]
    pub fn prevent_check(&self) -> Result<PreventReport> {
        let ws = self.ws;
        let repo = self.repo();
        ws.git.fetch(repo, ws.remote(), ws.branch())?;

        let Some(counts) = ws.git.ahead_behind(repo, ws.remote(), ws.branch())? else {
            return Ok(PreventReport::default());
        };
        let mut report = PreventReport {
            ahead: counts.ahead,
            behind: counts.behind,
            overlapping: Vec::new(),
        };
        if !counts.diverged() {
            return Ok(report);
        }

        let upstream = format!("{}/{}", ws.remote(), ws.branch());
        if let Some(base) = ws.git.merge_base(repo, "HEAD", &upstream)? {
            let local = ws.git.diff_names(repo, &base, "HEAD")?;
            let remote = ws.git.diff_names(repo, &base, &upstream)?;
            report.overlapping = local.into_iter().filter(|f| remote.contains(f)).collect();
        }

        if report.at_risk() {
            ws.state.record(
                Journal::Conflicts,
                Level::Warn,
                &format!(
                    "prevent: diverged ({} ahead, {} behind) with overlapping changes: {}",
                    report.ahead,
                    report.behind,
                    report.overlapping.join(", ")
                ),
            );
        }
        Ok(report)
    }

    /// Resolution statistics for the last `window_days`
    pub fn analyze(&self, window_days: u32) -> Result<ConflictAnalysis> {
        let lines = self.ws.state.read_journal(Journal::Conflicts)?;
        Ok(history::analyze(
            &lines,
            window_days,
            chrono::Local::now().naive_local(),
        ))
    }

    /// Delete backups older than `retention_days`
    pub fn clean(&self, retention_days: u32) -> Result<usize> {
        let retention = Duration::from_secs(u64::from(retention_days) * 86_400);
        let removed = backup::prune_backups(&self.ws.paths.backups_dir(), retention)?;
        if removed > 0 {
            self.ws.state.record(
                Journal::Conflicts,
                Level::Info,
                &format!("clean: removed {removed} backups older than {retention_days} days"),
            );
        }
        Ok(removed)
    }

    /// Resolve `file` into an existing backup directory
    pub(crate) fn resolve_with_backup(
        &self,
        file: &str,
        requested: Option<MergeStrategy>,
        backup_dir: &Path,
    ) -> Result<Resolution> {
        let versions = self.read_versions(file)?;
        self.write_backup(file, &versions, backup_dir)?;

        let mut strategy = requested.unwrap_or_else(|| self.policy.strategy_for(file));
        if strategy.is_textual() && versions.any_binary() {
            debug!(file, "Binary conflict, asking instead of merging");
            strategy = MergeStrategy::Interactive;
        }

        let resolution = match strategy {
            MergeStrategy::Union => {
                self.write_merged(file, &versions.union())?;
                Resolution::Resolved(MergeStrategy::Union)
            }
            MergeStrategy::Section => {
                let merged = merge::section_aware(&versions.local_text(), &versions.remote_text())
                    .unwrap_or_else(|| versions.union());
                self.write_merged(file, &merged)?;
                Resolution::Resolved(MergeStrategy::Section)
            }
            MergeStrategy::PreferRemote => {
                self.take(file, Version::Remote)?;
                Resolution::Resolved(MergeStrategy::PreferRemote)
            }
            MergeStrategy::PreferLocal => {
                self.take(file, Version::Local)?;
                Resolution::Resolved(MergeStrategy::PreferLocal)
            }
            MergeStrategy::Interactive => self.interactive(file, &versions)?,
        };

        match resolution {
            Resolution::Resolved(_) => {
                info!(file, strategy = %strategy, "Resolved conflict");
                self.ws.state.record(
                    Journal::Conflicts,
                    Level::Info,
                    &format!("resolved file={file} strategy={strategy}"),
                );
            }
            Resolution::Skipped => {
                self.ws
                    .state
                    .record(Journal::Conflicts, Level::Warn, &format!("skipped file={file}"));
            }
        }
        Ok(resolution)
    }

    /// Resolve the machine registry by keeping every machine's newest entry
    pub(crate) fn merge_registry(&self, file: &str, backup_dir: &Path) -> Result<()> {
        let versions = self.read_versions(file)?;
        self.write_backup(file, &versions, backup_dir)?;

        let merged = registry::merge_registries(
            &MachineRegistry::parse(&versions.local_text()),
            &MachineRegistry::parse(&versions.remote_text()),
        );
        self.write_merged(file, &merged.render())?;
        info!(file, machines = merged.len(), "Merged machine registry");
        self.ws.state.record(
            Journal::Conflicts,
            Level::Info,
            &format!("resolved file={file} strategy={}", MergeStrategy::Union),
        );
        Ok(())
    }

    fn interactive(&self, file: &str, versions: &Versions) -> Result<Resolution> {
        loop {
            let choice = self
                .prompt
                .select(&format!("Conflict in {file}"), MENU)?;
            match choice {
                0 => {
                    self.take(file, Version::Local)?;
                    return Ok(Resolution::Resolved(MergeStrategy::Interactive));
                }
                1 => {
                    self.take(file, Version::Remote)?;
                    return Ok(Resolution::Resolved(MergeStrategy::Interactive));
                }
                2 => self.prompt.show(&versions.diff(file)),
                3 => {
                    let path = self.repo().join(file);
                    self.prompt.edit_file(&path)?;
                    let edited = fs::read(&path).unwrap_or_default();
                    if has_markers(&edited) {
                        self.prompt
                            .show(&format!("{file} still contains conflict markers"));
                        continue;
                    }
                    if self
                        .prompt
                        .confirm(&format!("Mark {file} as resolved?"), false)?
                    {
                        self.ws.git.mark_resolved(self.repo(), file)?;
                        return Ok(Resolution::Resolved(MergeStrategy::Interactive));
                    }
                }
                4 => {
                    if versions.any_binary() {
                        self.prompt.show("Binary files cannot be merged line by line");
                        continue;
                    }
                    self.write_merged(file, &versions.union())?;
                    return Ok(Resolution::Resolved(MergeStrategy::Interactive));
                }
                _ => return Ok(Resolution::Skipped),
            }
        }
    }

    fn take(&self, file: &str, version: Version) -> Result<()> {
        self.ws.git.checkout_version(self.repo(), file, version)?;
        self.ws.git.mark_resolved(self.repo(), file)
    }

    fn write_merged(&self, file: &str, content: &str) -> Result<()> {
        fs::write(self.repo().join(file), content)?;
        self.ws.git.mark_resolved(self.repo(), file)
    }

    fn read_versions(&self, file: &str) -> Result<Versions> {
        let git = self.ws.git;
        let repo = self.repo();
        Ok(Versions {
            base: git.read_version(repo, file, Version::Base)?,
            local: git.read_version(repo, file, Version::Local)?,
            remote: git.read_version(repo, file, Version::Remote)?,
            working: fs::read(repo.join(file)).ok(),
        })
    }

    fn write_backup(&self, file: &str, versions: &Versions, dir: &Path) -> Result<()> {
        let target = dir.join(file);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        for (suffix, content) in [
            ("base", &versions.base),
            ("ours", &versions.local),
            ("theirs", &versions.remote),
            ("conflict", &versions.working),
        ] {
            if let Some(content) = content {
                let mut name = target.as_os_str().to_os_string();
                name.push(".");
                name.push(suffix);
                fs::write(PathBuf::from(name), content)?;
            }
        }
        debug!(file, backup = %dir.display(), "Backed up conflict versions");
        Ok(())
    }
}

/// Every side of one conflicted file
struct Versions {
    base: Option<Vec<u8>>,
    local: Option<Vec<u8>>,
    remote: Option<Vec<u8>>,
    working: Option<Vec<u8>>,
}

impl Versions {
    fn any_binary(&self) -> bool {
        [&self.base, &self.local, &self.remote]
            .into_iter()
            .flatten()
            .any(|c| merge::is_binary(c))
    }

    fn text(content: Option<&[u8]>) -> String {
        content
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .unwrap_or_default()
    }

    fn local_text(&self) -> String {
        Self::text(self.local.as_deref())
    }

    fn remote_text(&self) -> String {
        Self::text(self.remote.as_deref())
    }

    fn union(&self) -> String {
        merge::line_union(&Self::text(self.base.as_deref()), &self.local_text(), &self.remote_text())
    }

    fn diff(&self, file: &str) -> String {
        if self.any_binary() {
            return format!("{file}: binary files differ");
        }
        let local = self.local_text();
        let remote = self.remote_text();
        TextDiff::from_lines(&local, &remote)
            .unified_diff()
            .context_radius(3)
            .header(&format!("local/{file}"), &format!("remote/{file}"))
            .to_string()
    }
}

fn has_markers(content: &[u8]) -> bool {
    String::from_utf8_lossy(content)
        .lines()
        .any(|line| line.starts_with("<<<<<<< ") || line.starts_with(">>>>>>> "))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_marker_detection() {
        assert!(has_markers(b"a\n<<<<<<< HEAD\nb\n"));
        assert!(!has_markers(b"a\n<<<< not a marker\n"));
    }

    #[test]
    fn test_versions_union_and_diff() {
        let versions = Versions {
            base: Some(b"a\nb\n".to_vec()),
            local: Some(b"a\nb\nc\n".to_vec()),
            remote: Some(b"a\nb\nd\n".to_vec()),
            working: None,
        };
        assert_eq!(versions.union(), "a\nb\nc\nd\n");
        let diff = versions.diff(".bashrc");
        assert!(diff.contains("--- local/.bashrc"));
        assert!(diff.contains("-c"));
        assert!(diff.contains("+d"));
        assert!(!versions.any_binary());
    }

    #[test]
    fn test_deleted_side_reads_as_empty() {
        let versions = Versions {
            base: None,
            local: None,
            remote: Some(b"x\0y".to_vec()),
            working: None,
        };
        assert!(versions.any_binary());
        assert_eq!(versions.local_text(), "");
    }
}
