//! Health evaluator
//!
//! Five independent checks (repository, symlinks, network, disk, sync
//! recency) each yield a 0-100 score. Their mean is the overall score:
//!
//! - `>= 70`: healthy
//! - `50..70`: warning
//! - `< 50`: critical
//!
//! Health is advisory. The status file is overwritten on every evaluation
//! and nothing else gates on it; a sub-check that cannot run degrades its
//! score instead of failing the evaluation.

pub mod probe;
pub mod score;

use crate::error::{Error, Result};
use crate::registry::MachineRegistry;
use crate::state::{Journal, Level, StateStore};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use score::{DiskFacts, NetworkFacts, RepositoryFacts, SyncFacts};

/// Scores below this trigger auto-repair
pub const REPAIR_THRESHOLD: u8 = 70;
const WARNING_THRESHOLD: u8 = 50;

/// Consecutive critical readings before the monitor alerts
pub const CRITICAL_ALERT_AFTER: u32 = 3;

/// Leftover git lock files that block every git command
const GIT_LOCK_ARTIFACTS: &[&str] = &["index.lock", "HEAD.lock", "config.lock", "shallow.lock"];

/// Age after which a git lock file is assumed abandoned rather than held
/// by a running git command
pub const GIT_LOCK_GRACE: Duration = Duration::from_secs(10 * 60);

/// Overall classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Overall score of 70 or more
    Healthy,
    /// Overall score from 50 to 69
    Warning,
    /// Overall score below 50
    Critical,
}

impl HealthState {
    /// Classify an overall score
    pub fn from_score(score: u8) -> Self {
        if score >= REPAIR_THRESHOLD {
            HealthState::Healthy
        } else if score >= WARNING_THRESHOLD {
            HealthState::Warning
        } else {
            HealthState::Critical
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HealthState::Healthy => "healthy",
            HealthState::Warning => "warning",
            HealthState::Critical => "critical",
        })
    }
}

/// Per-check scores, each 0-100
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubScores {
    /// Work tree, integrity, locks and conflicts
    pub repository: u8,
    /// Share of managed links that resolve
    pub symlinks: u8,
    /// Internet, remote host, remote repository and credentials
    pub network: u8,
    /// Volume utilisation and repository size
    pub disk: u8,
    /// Divergence and time since the last sync
    pub sync: u8,
}

impl SubScores {
    fn as_array(self) -> [u8; 5] {
        [
            self.repository,
            self.symlinks,
            self.network,
            self.disk,
            self.sync,
        ]
    }
}

/// Contents of `health.status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// RFC 3339
    pub timestamp: String,
    /// Mean of the five sub-scores
    pub overall: u8,
    /// Classification of `overall`
    pub status: HealthState,
    /// Individual check scores
    pub scores: SubScores,
}

/// Which check raised an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    /// Repository check
    Repository,
    /// Symlink check
    Symlinks,
    /// Network check
    Network,
    /// Disk check
    Disk,
    /// Sync recency check
    Sync,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Check::Repository => "repository",
            Check::Symlinks => "symlinks",
            Check::Network => "network",
            Check::Disk => "disk",
            Check::Sync => "sync",
        })
    }
}

/// One deduction and its cause
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Check that raised it
    pub check: Check,
    /// Human-readable cause
    pub message: String,
}

/// One evaluation: the persisted status plus the issues behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// What gets written to `health.status`
    pub status: HealthStatus,
    /// Every deduction behind the score
    pub issues: Vec<Issue>,
}

impl HealthReport {
    /// Overall score
    pub fn overall(&self) -> u8 {
        self.status.overall
    }

    /// Overall classification
    pub fn state(&self) -> HealthState {
        self.status.status
    }

    /// Whether the score is below the auto-repair threshold
    pub fn needs_repair(&self) -> bool {
        self.status.overall < REPAIR_THRESHOLD
    }
}

/// What `auto_repair` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Repairs that succeeded
    pub actions: Vec<String>,
    /// Repairs that were attempted and failed
    pub failures: Vec<String>,
}

/// Counts consecutive critical readings
#[derive(Debug, Clone, Copy, Default)]
pub struct CriticalStreak {
    count: u32,
}

impl CriticalStreak {
    /// Feed one reading; true when this reading completes an alerting streak
    ///
    /// The streak restarts after an alert, so a machine that stays critical
    /// alerts on every third reading rather than every reading.
    pub fn observe(&mut self, state: HealthState) -> bool {
        if state != HealthState::Critical {
            self.count = 0;
            return false;
        }
        self.count += 1;
        if self.count >= CRITICAL_ALERT_AFTER {
            self.count = 0;
            true
        } else {
            false
        }
    }

    /// Critical readings seen since the last reset
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Runs the five checks against a workspace
pub struct HealthEvaluator<'w, 'a> {
    ws: &'w Workspace<'a>,
    /// Skip the remote probes (used by offline callers and `sync check`
    /// after it already fetched)
    probe_network: bool,
}

impl<'w, 'a> HealthEvaluator<'w, 'a> {
    /// Evaluator that probes the network
    pub fn new(ws: &'w Workspace<'a>) -> Self {
        Self {
            ws,
            probe_network: true,
        }
    }

    /// Toggle the network probes
    pub fn with_network_probe(mut self, enabled: bool) -> Self {
        self.probe_network = enabled;
        self
    }

    /// Run every check, persist the status and journal the issues
    #[tracing::instrument(skip(self))]
    pub fn evaluate(&self) -> Result<HealthReport> {
        let mut issues = Vec::new();

        let (repository, mut found) = score::repository(&self.repository_facts());
        issues.append(&mut found);

        let (symlinks, mut found) = self.symlink_score();
        issues.append(&mut found);

        let (network, mut found) = score::network(self.network_facts());
        issues.append(&mut found);

        let (disk, mut found) = score::disk(self.disk_facts());
        issues.append(&mut found);

        let (sync, mut found) = score::sync(self.sync_facts());
        issues.append(&mut found);

        let scores = SubScores {
            repository,
            symlinks,
            network,
            disk,
            sync,
        };
        let overall = score::overall(scores.as_array());
        let status = HealthStatus {
            timestamp: Utc::now().to_rfc3339(),
            overall,
            status: HealthState::from_score(overall),
            scores,
        };

        let state = self.ws.state;
        state.write_health_status(&status)?;
        let level = match status.status {
            HealthState::Healthy => Level::Info,
            HealthState::Warning => Level::Warn,
            HealthState::Critical => Level::Error,
        };
        state.record(
            Journal::Health,
            level,
            &format!(
                "overall={overall} status={} repository={repository} symlinks={symlinks} network={network} disk={disk} sync={sync}",
                status.status
            ),
        );
        for issue in &issues {
            state.record(Journal::Health, Level::Warn, &format!("[{}] {}", issue.check, issue.message));
        }

        info!(overall, status = %status.status, "Health evaluated");
        Ok(HealthReport { status, issues })
    }

    /// Evaluate, and when below the repair threshold repair and re-evaluate
    ///
    /// The caller must hold the sync lock.
    pub(crate) fn evaluate_and_repair(&self) -> Result<(HealthReport, Option<RepairReport>)> {
        let report = self.evaluate()?;
        if !report.needs_repair() {
            return Ok((report, None));
        }
        warn!(overall = report.overall(), "Health below threshold, attempting auto-repair");
        let repair = self.auto_repair()?;
        let report = self.evaluate()?;
        Ok((report, Some(repair)))
    }

    /// [`Self::auto_repair`] under the sync lock, waiting up to `wait` for it
    ///
    /// # Errors
    ///
    /// `LockTimeout` when a live process (usually a sync cycle) still holds
    /// the lock; nothing is repaired in that case.
    pub fn repair_locked(&self, wait: Duration) -> Result<RepairReport> {
        let guard = self.ws.lock_manager().acquire(wait)?;
        let report = self.auto_repair();
        if let Err(e) = guard.release() {
            warn!(error = %e, "Failed to release sync lock");
        }
        report
    }

    /// Clear stale locks, run git's integrity routines and repair symlinks
    ///
    /// Mutates the repository; the caller must hold the sync lock.
    #[tracing::instrument(skip(self))]
    pub(crate) fn auto_repair(&self) -> Result<RepairReport> {
        let ws = self.ws;
        let mut report = RepairReport::default();

        match ws.lock_manager().clear_stale() {
            Ok(true) => report.actions.push("removed stale sync lock".to_string()),
            Ok(false) => {}
            Err(e) => report.failures.push(format!("stale sync lock: {e}")),
        }

        let git_dir = ws.repo.join(".git");
        for artifact in stale_git_locks(&git_dir, GIT_LOCK_GRACE) {
            match fs::remove_file(git_dir.join(&artifact)) {
                Ok(()) => report.actions.push(format!("removed .git/{artifact}")),
                Err(e) => report.failures.push(format!(".git/{artifact}: {e}")),
            }
        }

        if ws.git.is_repository(&ws.repo) {
            if let Err(e) = ws.git.fsck(&ws.repo) {
                debug!(error = %e, "fsck failed, running gc");
                match ws.git.gc(&ws.repo).and_then(|()| ws.git.fsck(&ws.repo)) {
                    Ok(()) => report.actions.push("repaired repository with gc".to_string()),
                    Err(e) => report.failures.push(format!("repository integrity: {e}")),
                }
            }
        }

        match ws.symlinks().repair() {
            Ok((verified, setup)) => {
                if !verified.repaired.is_empty() || !setup.created.is_empty() {
                    report.actions.push(format!(
                        "repaired {} symlinks, created {}",
                        verified.repaired.len(),
                        setup.created.len()
                    ));
                }
                if !verified.broken.is_empty() {
                    report
                        .failures
                        .push(format!("{} symlinks remain broken", verified.broken.len()));
                }
            }
            Err(e) => report.failures.push(format!("symlink repair: {e}")),
        }

        for action in &report.actions {
            ws.state.record(Journal::Health, Level::Info, &format!("auto-repair: {action}"));
        }
        for failure in &report.failures {
            ws.state.record(Journal::Health, Level::Error, &format!("auto-repair failed: {failure}"));
        }
        Ok(report)
    }

    /// Re-evaluate every `interval` until `stop` is set or `count`
    /// evaluations have run
    ///
    /// `on_report` receives each report and whether it completed a critical
    /// streak.
    pub fn monitor<F>(
        &self,
        interval: Duration,
        count: Option<u64>,
        stop: &AtomicBool,
        mut on_report: F,
    ) -> Result<()>
    where
        F: FnMut(&HealthReport, bool),
    {
        let mut streak = CriticalStreak::default();
        let mut runs = 0u64;

        while !stop.load(Ordering::Relaxed) {
            let report = self.evaluate()?;
            let alert = streak.observe(report.state());
            if alert {
                self.ws.state.record(
                    Journal::Health,
                    Level::Error,
                    &format!(
                        "ALERT: health critical for {CRITICAL_ALERT_AFTER} consecutive checks (overall={})",
                        report.overall()
                    ),
                );
            }
            if report.needs_repair() {
                match self.repair_locked(Duration::ZERO) {
                    Ok(_) => {}
                    Err(Error::LockTimeout { holder, .. }) => {
                        info!(holder, "Sync in progress, skipping auto-repair");
                        self.ws.state.record(
                            Journal::Health,
                            Level::Info,
                            &format!("auto-repair skipped: sync lock held by pid {holder}"),
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
            on_report(&report, alert);

            runs += 1;
            if count.is_some_and(|max| runs >= max) {
                break;
            }
            sleep_unless_stopped(interval, stop);
        }
        Ok(())
    }

    fn repository_facts(&self) -> RepositoryFacts {
        let ws = self.ws;
        let repo = &ws.repo;
        let git = ws.git;
        if !git.is_repository(repo) {
            return RepositoryFacts::default();
        }

        let mut facts = RepositoryFacts {
            is_work_tree: true,
            fsck_error: git.fsck(repo).err().map(|e| e.to_string()),
            stale_locks: stale_git_locks(&repo.join(".git"), GIT_LOCK_GRACE)
                .into_iter()
                .map(|name| format!(".git/{name}"))
                .collect(),
            ..Default::default()
        };
        if ws.lock_manager().has_stale_lock() {
            facts.stale_locks.push("sync.lock".to_string());
        }

        let changed = git.changed_files(repo).unwrap_or_default();
        let mut conflicted = git.conflicted_files(repo).unwrap_or_default();
        for file in &changed {
            if !conflicted.contains(file) && has_conflict_markers(&repo.join(file)) {
                conflicted.push(file.clone());
            }
        }
        facts.conflicted = conflicted;
        facts.uncommitted = changed.len();
        facts.uncommitted_age_hours = newest_age_hours(repo, &changed);
        facts
    }

    fn symlink_score(&self) -> (u8, Vec<Issue>) {
        match self.ws.symlinks().inventory() {
            Ok(inventory) => score::symlinks(inventory.total, inventory.broken.len()),
            Err(e) => (
                0,
                vec![Issue {
                    check: Check::Symlinks,
                    message: format!("could not inspect symlinks: {e}"),
                }],
            ),
        }
    }

    fn network_facts(&self) -> NetworkFacts {
        let ws = self.ws;
        if !self.probe_network {
            return NetworkFacts {
                internet: true,
                remote_host: true,
                remote_repository: true,
                authenticated: true,
            };
        }

        let internet = ws.network.internet();
        let url = ws
            .git
            .remote_url(&ws.repo, ws.remote())
            .ok()
            .flatten()
            .unwrap_or_else(|| ws.config.dotfiles_repo.clone());

        let remote_host = match probe::remote_endpoint(&url) {
            Some((host, port)) => ws.network.can_connect(&host, port),
            None => !url.is_empty() && local_remote_exists(&url),
        };

        let (remote_repository, authenticated) =
            match ws.git.ls_remote(&ws.repo, ws.remote(), ws.branch()) {
                Ok(_) => (true, true),
                Err(crate::Error::AuthenticationFailed(_)) => (true, false),
                Err(e) => {
                    debug!(error = %e, "Remote repository unreachable");
                    (false, true)
                }
            };

        NetworkFacts {
            internet,
            remote_host,
            remote_repository,
            authenticated,
        }
    }

    fn disk_facts(&self) -> DiskFacts {
        let ws = self.ws;
        let bytes = ws.disk.tree_size(&ws.repo);
        DiskFacts {
            used_percent: ws.disk.used_percent(&ws.home).unwrap_or(0),
            repo_size_mb: bytes / (1024 * 1024),
            max_repo_size_mb: ws.config.health.max_repo_size_mb,
        }
    }

    fn sync_facts(&self) -> SyncFacts {
        let ws = self.ws;
        let counts = ws
            .git
            .ahead_behind(&ws.repo, ws.remote(), ws.branch())
            .ok()
            .flatten()
            .unwrap_or_default();

        let hours_since_sync = MachineRegistry::load(&ws.repo)
            .ok()
            .and_then(|registry| registry.last_seen(&ws.machine_id))
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts, 0))
            .map(|last| {
                let hours = (Utc::now() - last).num_hours();
                u64::try_from(hours).unwrap_or(0)
            });

        SyncFacts {
            ahead: counts.ahead,
            behind: counts.behind,
            hours_since_sync,
        }
    }
}

/// Git lock files in a `.git` directory untouched for at least `grace`
fn stale_git_locks(git_dir: &Path, grace: Duration) -> Vec<String> {
    GIT_LOCK_ARTIFACTS
        .iter()
        .filter(|name| {
            fs::symlink_metadata(git_dir.join(name))
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| SystemTime::now().duration_since(modified).ok())
                .is_some_and(|age| age >= grace)
        })
        .map(|name| (*name).to_string())
        .collect()
}

/// Whether a file contains a full set of merge conflict markers
fn has_conflict_markers(path: &Path) -> bool {
    let Ok(content) = fs::read(path) else {
        return false;
    };
    let text = String::from_utf8_lossy(&content);
    let mut seen = [false; 3];
    for line in text.lines() {
        if line.starts_with("<<<<<<< ") {
            seen[0] = true;
        } else if line == "=======" {
            seen[1] = true;
        } else if line.starts_with(">>>>>>> ") {
            seen[2] = true;
        }
    }
    seen.iter().all(|s| *s)
}

fn newest_age_hours(repo: &Path, files: &[String]) -> Option<u64> {
    let newest = files
        .iter()
        .filter_map(|file| fs::symlink_metadata(repo.join(file)).ok())
        .filter_map(|meta| meta.modified().ok())
        .max()?;
    let age = SystemTime::now().duration_since(newest).unwrap_or_default();
    Some(age.as_secs() / 3600)
}

fn local_remote_exists(url: &str) -> bool {
    let path = url.strip_prefix("file://").unwrap_or(url);
    Path::new(path).exists()
}

/// Sleep in short slices so a stop request is noticed promptly
pub(crate) fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(200);
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_state_boundaries() {
        assert_eq!(HealthState::from_score(100), HealthState::Healthy);
        assert_eq!(HealthState::from_score(70), HealthState::Healthy);
        assert_eq!(HealthState::from_score(69), HealthState::Warning);
        assert_eq!(HealthState::from_score(50), HealthState::Warning);
        assert_eq!(HealthState::from_score(49), HealthState::Critical);
    }

    #[test]
    fn test_critical_streak_alerts_on_third() {
        let mut streak = CriticalStreak::default();
        assert!(!streak.observe(HealthState::Critical));
        assert!(!streak.observe(HealthState::Critical));
        assert!(streak.observe(HealthState::Critical));
        assert_eq!(streak.count(), 0);
    }

    #[test]
    fn test_critical_streak_resets_on_recovery() {
        let mut streak = CriticalStreak::default();
        streak.observe(HealthState::Critical);
        streak.observe(HealthState::Critical);
        assert!(!streak.observe(HealthState::Warning));
        assert!(!streak.observe(HealthState::Critical));
        assert!(!streak.observe(HealthState::Critical));
        assert!(streak.observe(HealthState::Critical));
    }

    #[test]
    fn test_conflict_marker_detection() {
        let temp = tempfile::TempDir::new().unwrap();
        let marked = temp.path().join("marked");
        fs::write(&marked, "<<<<<<< HEAD\na\n=======\nb\n>>>>>>> remote\n").unwrap();
        let plain = temp.path().join("plain");
        fs::write(&plain, "a\n=======\nb\n").unwrap();

        assert!(has_conflict_markers(&marked));
        assert!(!has_conflict_markers(&plain));
        assert!(!has_conflict_markers(&temp.path().join("missing")));
    }

    #[test]
    fn test_stale_git_locks_respect_grace() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::write(temp.path().join("index.lock"), "").unwrap();
        let old = fs::File::create(temp.path().join("HEAD.lock")).unwrap();
        old.set_modified(SystemTime::now() - 2 * GIT_LOCK_GRACE).unwrap();

        assert_eq!(
            stale_git_locks(temp.path(), GIT_LOCK_GRACE),
            vec!["HEAD.lock".to_string()]
        );
        assert_eq!(
            stale_git_locks(temp.path(), Duration::ZERO),
            vec!["index.lock".to_string(), "HEAD.lock".to_string()]
        );
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&HealthState::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
    }

    #[test]
    fn test_sleep_returns_immediately_when_stopped() {
        let stop = AtomicBool::new(true);
        let started = std::time::Instant::now();
        sleep_unless_stopped(Duration::from_secs(10), &stop);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
