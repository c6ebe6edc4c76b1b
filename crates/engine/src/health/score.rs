//! Sub-score arithmetic
//!
//! Every function here is pure: the evaluator gathers facts, these turn
//! facts into a 0-100 score plus the issues that cost points.

use super::{Check, Issue};

/// What the evaluator learned about the repository
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryFacts {
    /// Whether the checkout is a git work tree
    pub is_work_tree: bool,
    /// Output of a failed `git fsck`
    pub fsck_error: Option<String>,
    /// Leftover `.git/*.lock` files and stale sync locks
    pub stale_locks: Vec<String>,
    /// Unmerged files plus modified files containing conflict markers
    pub conflicted: Vec<String>,
    /// Number of uncommitted paths
    pub uncommitted: usize,
    /// Age in hours of the newest uncommitted modification
    pub uncommitted_age_hours: Option<u64>,
}

/// Reachability of the remote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetworkFacts {
    /// A well-known host answered
    pub internet: bool,
    /// The remote's host accepted a connection
    pub remote_host: bool,
    /// `ls-remote` succeeded
    pub remote_repository: bool,
    /// The remote accepted our credentials
    pub authenticated: bool,
}

/// Disk usage facts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskFacts {
    /// Home volume utilization, 0-100
    pub used_percent: u8,
    /// Size of the checkout
    pub repo_size_mb: u64,
    /// Configured size limit
    pub max_repo_size_mb: u64,
}

/// Sync recency facts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFacts {
    /// Local commits not pushed
    pub ahead: usize,
    /// Remote commits not pulled
    pub behind: usize,
    /// `None` when this machine never synced
    pub hours_since_sync: Option<u64>,
}

const UNCOMMITTED_STALE_HOURS: u64 = 24;

fn issue(check: Check, message: impl Into<String>) -> Issue {
    Issue {
        check,
        message: message.into(),
    }
}

fn deduct(score: &mut u8, points: u8) {
    *score = score.saturating_sub(points);
}

/// Score the repository check
pub fn repository(facts: &RepositoryFacts) -> (u8, Vec<Issue>) {
    if !facts.is_work_tree {
        return (
            0,
            vec![issue(Check::Repository, "repository missing or not a work tree")],
        );
    }

    let mut score = 100;
    let mut issues = Vec::new();

    if let Some(err) = &facts.fsck_error {
        deduct(&mut score, 40);
        issues.push(issue(Check::Repository, format!("integrity check failed: {err}")));
    }
    if !facts.stale_locks.is_empty() {
        deduct(&mut score, 15);
        issues.push(issue(
            Check::Repository,
            format!("stale lock files: {}", facts.stale_locks.join(", ")),
        ));
    }
    if !facts.conflicted.is_empty() {
        deduct(&mut score, 30);
        issues.push(issue(
            Check::Repository,
            format!("unresolved conflicts: {}", facts.conflicted.join(", ")),
        ));
    }
    if facts.uncommitted > 0
        && facts
            .uncommitted_age_hours
            .is_some_and(|age| age >= UNCOMMITTED_STALE_HOURS)
    {
        deduct(&mut score, 15);
        issues.push(issue(
            Check::Repository,
            format!(
                "{} uncommitted changes older than {UNCOMMITTED_STALE_HOURS}h",
                facts.uncommitted
            ),
        ));
    }
    (score, issues)
}

/// Score the symlink check from link counts
pub fn symlinks(total: usize, broken: usize) -> (u8, Vec<Issue>) {
    if total == 0 {
        return (100, Vec::new());
    }
    let broken = broken.min(total);
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let lost = ((broken as f64 * 100.0) / total as f64).round() as u8;
    let issues = if broken > 0 {
        vec![issue(
            Check::Symlinks,
            format!("{broken} of {total} symlinks broken"),
        )]
    } else {
        Vec::new()
    };
    (100 - lost, issues)
}

/// Score the network check
pub fn network(facts: NetworkFacts) -> (u8, Vec<Issue>) {
    let mut score = 100;
    let mut issues = Vec::new();

    if !facts.internet {
        deduct(&mut score, 50);
        issues.push(issue(Check::Network, "no internet connectivity"));
    }
    if !facts.remote_host {
        deduct(&mut score, 25);
        issues.push(issue(Check::Network, "remote host unreachable"));
    }
    if !facts.remote_repository {
        deduct(&mut score, 15);
        issues.push(issue(Check::Network, "remote repository unreachable"));
    }
    if !facts.authenticated {
        deduct(&mut score, 10);
        issues.push(issue(Check::Network, "authentication with remote failed"));
    }
    (score, issues)
}

/// Score the disk check
pub fn disk(facts: DiskFacts) -> (u8, Vec<Issue>) {
    let mut issues = Vec::new();
    let mut score = match facts.used_percent {
        95.. => 0,
        90..=94 => 30,
        80..=89 => 60,
        _ => 100,
    };
    if score < 100 {
        issues.push(issue(
            Check::Disk,
            format!("home volume {}% full", facts.used_percent),
        ));
    }
    if facts.repo_size_mb > facts.max_repo_size_mb {
        deduct(&mut score, 20);
        issues.push(issue(
            Check::Disk,
            format!(
                "repository is {} MB (limit {} MB)",
                facts.repo_size_mb, facts.max_repo_size_mb
            ),
        ));
    }
    (score, issues)
}

/// Score the sync recency check
pub fn sync(facts: SyncFacts) -> (u8, Vec<Issue>) {
    let mut score = 100u8;
    let mut issues = Vec::new();

    if facts.behind > 0 {
        deduct(&mut score, capped(facts.behind, 5, 30));
        issues.push(issue(Check::Sync, format!("{} commits behind remote", facts.behind)));
    }
    if facts.ahead > 0 {
        deduct(&mut score, capped(facts.ahead, 3, 15));
        issues.push(issue(Check::Sync, format!("{} commits not pushed", facts.ahead)));
    }
    match facts.hours_since_sync {
        None => {
            deduct(&mut score, 30);
            issues.push(issue(Check::Sync, "never synced"));
        }
        Some(hours) if hours > 48 => {
            deduct(&mut score, 30);
            issues.push(issue(Check::Sync, format!("last sync {hours}h ago")));
        }
        Some(hours) if hours > 24 => {
            deduct(&mut score, 15);
            issues.push(issue(Check::Sync, format!("last sync {hours}h ago")));
        }
        Some(_) => {}
    }
    if facts.ahead > 0 && facts.behind > 0 {
        deduct(&mut score, 20);
        issues.push(issue(Check::Sync, "local and remote have diverged"));
    }
    (score, issues)
}

fn capped(count: usize, per: u8, max: u8) -> u8 {
    u8::try_from(count)
        .unwrap_or(u8::MAX)
        .saturating_mul(per)
        .min(max)
}

/// Mean of the five sub-scores, rounded
pub fn overall(scores: [u8; 5]) -> u8 {
    let sum: u32 = scores.iter().map(|s| u32::from(*s)).sum();
    u8::try_from((sum + 2) / 5).unwrap_or(100)
}
