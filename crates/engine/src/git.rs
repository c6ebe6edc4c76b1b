//! Git operations abstraction layer
//!
//! The engine orchestrates git; it never reimplements it. [`GitProvider`]
//! is the capability interface the sync, conflict, health and reset code
//! program against. [`GitCli`] implements it with libgit2 for read-only
//! queries and the `git` executable for anything that mutates the work tree
//! or talks to a remote, since rebase, stash and clean have no complete
//! libgit2 equivalent.

use crate::error::{Error, Result};
use git2::{Repository, RepositoryState, Status, StatusOptions};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// One side of a conflicted file, in the user's sense
///
/// During a rebase git's "ours" is the upstream being rebased onto; the
/// provider hides that inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// Common ancestor
    Base,
    /// This machine's change
    Local,
    /// The change that came from the remote
    Remote,
}

/// Operation currently paused in the work tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InProgress {
    /// Nothing is paused
    None,
    /// A merge stopped on conflicts
    Merge,
    /// A rebase stopped on conflicts
    Rebase,
}

/// Result of a rebase step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Every commit was replayed
    Completed,
    /// Paused with these files unmerged
    Conflicts(Vec<String>),
}

/// Commit counts between HEAD and the remote-tracking branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AheadBehind {
    /// Commits on HEAD only
    pub ahead: usize,
    /// Commits on the remote-tracking branch only
    pub behind: usize,
}

impl AheadBehind {
    /// Both sides have commits the other lacks
    pub fn diverged(self) -> bool {
        self.ahead > 0 && self.behind > 0
    }
}

/// Git provider trait defining every git operation the engine needs
pub trait GitProvider: Send + Sync {
    /// Whether `repo` is a non-bare git work tree
    fn is_repository(&self, repo: &Path) -> bool;

    /// Commit id HEAD points at; `None` on an unborn branch
    fn head(&self, repo: &Path) -> Result<Option<String>>;

    /// Commit id of `refs/remotes/<remote>/<branch>`, if fetched
    fn remote_head(&self, repo: &Path, remote: &str, branch: &str) -> Result<Option<String>>;

    /// URL configured for a remote
    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>>;

    /// Modified, staged and untracked paths, relative to the repository
    fn changed_files(&self, repo: &Path) -> Result<Vec<String>>;

    /// Stage every change, including deletions and untracked files
    fn stage_all(&self, repo: &Path) -> Result<()>;

    /// Commit whatever is staged
    fn commit(&self, repo: &Path, message: &str) -> Result<()>;

    /// Stage and commit only the given paths
    fn commit_paths(&self, repo: &Path, paths: &[&str], message: &str) -> Result<()>;

    /// Fetch one branch from a remote
    fn fetch(&self, repo: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Fetch every ref from a remote
    fn fetch_all(&self, repo: &Path, remote: &str) -> Result<()>;

    /// Push `branch` to `remote`
    fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<()>;

    /// Branch tip on the remote itself, without fetching
    fn ls_remote(&self, repo: &Path, remote: &str, branch: &str) -> Result<Option<String>>;

    /// `None` when the remote-tracking branch does not exist yet
    fn ahead_behind(&self, repo: &Path, remote: &str, branch: &str)
    -> Result<Option<AheadBehind>>;

    /// Best common ancestor of two revisions
    fn merge_base(&self, repo: &Path, a: &str, b: &str) -> Result<Option<String>>;

    /// Paths differing between two commits
    fn diff_names(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<String>>;

    /// Fast-forward onto the remote-tracking branch; `false` if not possible
    fn fast_forward(&self, repo: &Path, remote: &str, branch: &str) -> Result<bool>;

    /// Rebase local commits onto the remote-tracking branch
    fn rebase(&self, repo: &Path, remote: &str, branch: &str) -> Result<RebaseOutcome>;

    /// Continue a paused rebase after conflicts were resolved
    fn rebase_continue(&self, repo: &Path) -> Result<RebaseOutcome>;

    /// Abort a rebase, restoring the pre-rebase state
    fn rebase_abort(&self, repo: &Path) -> Result<()>;

    /// Conclude a merge whose conflicts are resolved
    fn commit_merge(&self, repo: &Path) -> Result<()>;

    /// Merge or rebase paused in the work tree, if any
    fn in_progress(&self, repo: &Path) -> InProgress;

    /// Files with unmerged index entries
    fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>>;

    /// Content of one side of a conflicted file; `None` if that side
    /// does not have the file
    fn read_version(&self, repo: &Path, path: &str, version: Version) -> Result<Option<Vec<u8>>>;

    /// Replace the work-tree file with one side wholesale
    fn checkout_version(&self, repo: &Path, path: &str, version: Version) -> Result<()>;

    /// Stage the work-tree file, clearing its unmerged state
    fn mark_resolved(&self, repo: &Path, path: &str) -> Result<()>;

    /// Move HEAD and the work tree to `target`, discarding changes
    fn reset_hard(&self, repo: &Path, target: &str) -> Result<()>;

    /// Remove untracked files and directories
    fn clean_untracked(&self, repo: &Path) -> Result<()>;

    /// Stash uncommitted work including untracked files; `false` if
    /// there was nothing to stash
    fn stash(&self, repo: &Path, message: &str) -> Result<bool>;

    /// Run the object-database integrity check
    fn fsck(&self, repo: &Path) -> Result<()>;

    /// Run the repair/housekeeping routine
    fn gc(&self, repo: &Path) -> Result<()>;
}

/// Git provider using libgit2 for reads and the git executable for writes
#[derive(Debug, Clone)]
pub struct GitCli {
    network_timeout: Duration,
}

impl GitCli {
    /// Provider whose network commands give up after `network_timeout`
    pub fn new(network_timeout: Duration) -> Self {
        Self { network_timeout }
    }

    fn open(repo: &Path) -> Result<Repository> {
        Repository::open(repo).map_err(|e| Error::RepositoryCorrupted {
            path: repo.to_path_buf(),
            reason: e.message().to_string(),
        })
    }

    fn command(repo: &Path, args: &[&str]) -> duct::Expression {
        duct::cmd("git", args.iter().copied())
            .dir(repo)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .stdin_null()
            .stdout_capture()
            .stderr_capture()
            .unchecked()
    }

    /// Run a local git command, returning stdout
    fn run(&self, repo: &Path, args: &[&str]) -> Result<String> {
        let output = self.run_raw(repo, args)?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(Error::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn run_raw(&self, repo: &Path, args: &[&str]) -> Result<std::process::Output> {
        debug!(args = ?args, "git");
        Ok(Self::command(repo, args).run()?)
    }

    /// Run a git command that talks to a remote, under the network deadline
    fn run_network(&self, repo: &Path, args: &[&str]) -> Result<String> {
        let operation = format!("git {}", args.join(" "));
        debug!(%operation, timeout = ?self.network_timeout, "git (network)");

        let handle = Self::command(repo, args).start()?;
        let output = match handle.wait_timeout(self.network_timeout)? {
            Some(output) => output.clone(),
            None => {
                if let Err(e) = handle.kill() {
                    debug!(error = %e, "Failed to kill timed-out git");
                }
                return Err(Error::NetworkTimeout {
                    operation,
                    seconds: self.network_timeout.as_secs(),
                });
            }
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_remote_error(&String::from_utf8_lossy(
                &output.stderr,
            )))
        }
    }

    /// Map a user-facing side onto git's index stage / checkout flag
    fn stage(&self, repo: &Path, version: Version) -> (u8, &'static str) {
        let rebasing = self.in_progress(repo) == InProgress::Rebase;
        match (version, rebasing) {
            (Version::Base, _) => (1, "--ours"),
            (Version::Local, false) | (Version::Remote, true) => (2, "--ours"),
            (Version::Remote, false) | (Version::Local, true) => (3, "--theirs"),
        }
    }

    /// After a failed rebase command, decide between "paused on conflicts"
    /// and a real error
    fn rebase_outcome(&self, repo: &Path, stderr: &str) -> Result<RebaseOutcome> {
        if self.in_progress(repo) == InProgress::Rebase {
            let conflicts = self.conflicted_files(repo)?;
            if !conflicts.is_empty() {
                return Ok(RebaseOutcome::Conflicts(conflicts));
            }
        }
        Err(Error::Git(format!("rebase failed: {}", stderr.trim())))
    }
}

/// Sort a remote failure into the error taxonomy by its stderr
fn classify_remote_error(stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    const AUTH: &[&str] = &[
        "permission denied",
        "authentication failed",
        "could not read username",
        "could not read password",
        "access denied",
        "host key verification failed",
        "403",
    ];
    const UNREACHABLE: &[&str] = &[
        "could not resolve host",
        "connection refused",
        "network is unreachable",
        "connection timed out",
        "operation timed out",
        "no route to host",
        "does not appear to be a git repository",
        "unable to access",
        "could not read from remote repository",
    ];

    if AUTH.iter().any(|needle| lower.contains(needle)) {
        Error::AuthenticationFailed(message)
    } else if UNREACHABLE.iter().any(|needle| lower.contains(needle)) {
        Error::NetworkUnreachable(message)
    } else {
        Error::Git(message)
    }
}

fn oid_of(repo: &Repository, refname: &str) -> Option<git2::Oid> {
    repo.refname_to_id(refname).ok()
}

impl GitProvider for GitCli {
    fn is_repository(&self, repo: &Path) -> bool {
        Repository::open(repo).is_ok_and(|r| !r.is_bare())
    }

    fn head(&self, repo: &Path) -> Result<Option<String>> {
        let repo = Self::open(repo)?;
        match repo.head() {
            Ok(head) => Ok(head.target().map(|oid| oid.to_string())),
            Err(e) if e.code() == git2::ErrorCode::UnbornBranch => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remote_head(&self, repo: &Path, remote: &str, branch: &str) -> Result<Option<String>> {
        let repo = Self::open(repo)?;
        Ok(oid_of(&repo, &format!("refs/remotes/{remote}/{branch}")).map(|oid| oid.to_string()))
    }

    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>> {
        let repo = Self::open(repo)?;
        match repo.find_remote(remote) {
            Ok(r) => Ok(r.url().map(str::to_string)),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn changed_files(&self, repo: &Path) -> Result<Vec<String>> {
        let repo = Self::open(repo)?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);

        let statuses = repo.statuses(Some(&mut options))?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status() != Status::CURRENT)
            .filter_map(|entry| entry.path().map(str::to_string))
            .collect())
    }

    fn stage_all(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["add", "--all"]).map(drop)
    }

    fn commit(&self, repo: &Path, message: &str) -> Result<()> {
        self.run(repo, &["commit", "--quiet", "--no-verify", "-m", message])
            .map(drop)
    }

    fn commit_paths(&self, repo: &Path, paths: &[&str], message: &str) -> Result<()> {
        let mut add = vec!["add", "--"];
        add.extend_from_slice(paths);
        self.run(repo, &add)?;

        let mut commit = vec!["commit", "--quiet", "--no-verify", "-m", message, "--"];
        commit.extend_from_slice(paths);
        self.run(repo, &commit).map(drop)
    }

    fn fetch(&self, repo: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        match self.run_network(repo, &["fetch", "--quiet", remote, &refspec]) {
            // Branch not pushed by anyone yet
            Err(Error::Git(message)) if message.contains("couldn't find remote ref") => Ok(()),
            other => other.map(drop),
        }
    }

    fn fetch_all(&self, repo: &Path, remote: &str) -> Result<()> {
        self.run_network(repo, &["fetch", "--quiet", "--prune", "--tags", remote])
            .map(drop)
    }

    fn push(&self, repo: &Path, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("HEAD:refs/heads/{branch}");
        self.run_network(repo, &["push", "--quiet", remote, &refspec])?;
        // Keep the tracking ref in step so ahead/behind is accurate
        self.run(
            repo,
            &[
                "update-ref",
                &format!("refs/remotes/{remote}/{branch}"),
                "HEAD",
            ],
        )
        .map(drop)
    }

    fn ls_remote(&self, repo: &Path, remote: &str, branch: &str) -> Result<Option<String>> {
        let out = self.run_network(
            repo,
            &["ls-remote", remote, &format!("refs/heads/{branch}")],
        )?;
        Ok(out
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string))
    }

    fn ahead_behind(
        &self,
        repo: &Path,
        remote: &str,
        branch: &str,
    ) -> Result<Option<AheadBehind>> {
        let repo = Self::open(repo)?;
        let Some(upstream) = oid_of(&repo, &format!("refs/remotes/{remote}/{branch}")) else {
            return Ok(None);
        };
        let Some(local) = oid_of(&repo, "HEAD") else {
            return Ok(Some(AheadBehind {
                ahead: 0,
                behind: 1,
            }));
        };
        let (ahead, behind) = repo.graph_ahead_behind(local, upstream)?;
        Ok(Some(AheadBehind { ahead, behind }))
    }

    fn merge_base(&self, repo: &Path, a: &str, b: &str) -> Result<Option<String>> {
        let repo = Self::open(repo)?;
        let a = repo.revparse_single(a)?.id();
        let b = repo.revparse_single(b)?.id();
        match repo.merge_base(a, b) {
            Ok(oid) => Ok(Some(oid.to_string())),
            Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn diff_names(&self, repo: &Path, from: &str, to: &str) -> Result<Vec<String>> {
        let out = self.run(repo, &["diff", "--name-only", from, to])?;
        Ok(out.lines().map(str::to_string).collect())
    }

    fn fast_forward(&self, repo: &Path, remote: &str, branch: &str) -> Result<bool> {
        let upstream = format!("{remote}/{branch}");
        let output = self.run_raw(repo, &["merge", "--ff-only", "--quiet", &upstream])?;
        Ok(output.status.success())
    }

    fn rebase(&self, repo: &Path, remote: &str, branch: &str) -> Result<RebaseOutcome> {
        let upstream = format!("{remote}/{branch}");
        let output = self.run_raw(repo, &["rebase", "--autostash", "--quiet", &upstream])?;
        if output.status.success() {
            Ok(RebaseOutcome::Completed)
        } else {
            self.rebase_outcome(repo, &String::from_utf8_lossy(&output.stderr))
        }
    }

    fn rebase_continue(&self, repo: &Path) -> Result<RebaseOutcome> {
        let output = Self::command(repo, &["rebase", "--continue"])
            .env("GIT_EDITOR", "true")
            .run()?;
        if output.status.success() {
            return Ok(RebaseOutcome::Completed);
        }

        // A resolution identical to upstream leaves nothing to commit
        if self.in_progress(repo) == InProgress::Rebase && self.conflicted_files(repo)?.is_empty()
        {
            let skipped = self.run_raw(repo, &["rebase", "--skip"])?;
            if skipped.status.success() {
                return Ok(RebaseOutcome::Completed);
            }
            return self.rebase_outcome(repo, &String::from_utf8_lossy(&skipped.stderr));
        }
        self.rebase_outcome(repo, &String::from_utf8_lossy(&output.stderr))
    }

    fn rebase_abort(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["rebase", "--abort"]).map(drop)
    }

    fn commit_merge(&self, repo: &Path) -> Result<()> {
        let output = Self::command(repo, &["commit", "--no-edit", "--quiet", "--no-verify"])
            .env("GIT_EDITOR", "true")
            .run()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::Git(format!(
                "merge commit failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    fn in_progress(&self, repo: &Path) -> InProgress {
        match Repository::open(repo).map(|r| r.state()) {
            Ok(
                RepositoryState::Rebase
                | RepositoryState::RebaseInteractive
                | RepositoryState::RebaseMerge,
            ) => InProgress::Rebase,
            Ok(RepositoryState::Merge) => InProgress::Merge,
            _ => InProgress::None,
        }
    }

    fn conflicted_files(&self, repo: &Path) -> Result<Vec<String>> {
        let repo = Self::open(repo)?;
        let index = repo.index()?;
        if !index.has_conflicts() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for conflict in index.conflicts()? {
            let conflict = conflict?;
            let entry = conflict
                .our
                .or(conflict.their)
                .or(conflict.ancestor);
            if let Some(entry) = entry {
                let path = String::from_utf8_lossy(&entry.path).into_owned();
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_version(&self, repo: &Path, path: &str, version: Version) -> Result<Option<Vec<u8>>> {
        let (stage, _) = self.stage(repo, version);
        let output = self.run_raw(repo, &["show", &format!(":{stage}:{path}")])?;
        Ok(output.status.success().then_some(output.stdout))
    }

    fn checkout_version(&self, repo: &Path, path: &str, version: Version) -> Result<()> {
        let (_, flag) = self.stage(repo, version);
        if version == Version::Base {
            let content = self.read_version(repo, path, Version::Base)?.unwrap_or_default();
            std::fs::write(repo.join(path), content)?;
            return Ok(());
        }

        let output = self.run_raw(repo, &["checkout", flag, "--", path])?;
        if output.status.success() {
            return Ok(());
        }

        // The chosen side deleted the file
        if self.read_version(repo, path, version)?.is_none() {
            return self.run(repo, &["rm", "--quiet", "--", path]).map(drop);
        }
        Err(Error::Git(format!(
            "checkout {flag} {path} failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }

    fn mark_resolved(&self, repo: &Path, path: &str) -> Result<()> {
        if repo.join(path).symlink_metadata().is_ok() {
            self.run(repo, &["add", "--", path]).map(drop)
        } else {
            self.run(repo, &["rm", "--quiet", "--cached", "--", path])
                .map(drop)
        }
    }

    fn reset_hard(&self, repo: &Path, target: &str) -> Result<()> {
        self.run(repo, &["reset", "--hard", "--quiet", target])
            .map(drop)
    }

    fn clean_untracked(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["clean", "-fd", "--quiet"]).map(drop)
    }

    fn stash(&self, repo: &Path, message: &str) -> Result<bool> {
        if self.changed_files(repo)?.is_empty() {
            return Ok(false);
        }
        self.run(
            repo,
            &["stash", "push", "--include-untracked", "--quiet", "-m", message],
        )?;
        Ok(true)
    }

    fn fsck(&self, repo: &Path) -> Result<()> {
        let output = self.run_raw(repo, &["fsck", "--no-progress", "--no-dangling"])?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::RepositoryCorrupted {
                path: repo.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    fn gc(&self, repo: &Path) -> Result<()> {
        self.run(repo, &["gc", "--quiet"]).map(drop)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;

    #[test]
    fn test_classify_auth_failures() {
        let err = classify_remote_error(
            "git@github.com: Permission denied (publickey).\nfatal: Could not read from remote repository.",
        );
        assert!(matches!(err, Error::AuthenticationFailed(_)));

        let err = classify_remote_error(
            "remote: HTTP Basic: Access denied\nfatal: Authentication failed for 'https://x'",
        );
        assert!(matches!(err, Error::AuthenticationFailed(_)));
    }

    #[test]
    fn test_classify_unreachable() {
        let err = classify_remote_error(
            "ssh: Could not resolve hostname nowhere.invalid: Name or service not known\nfatal: Could not read from remote repository.",
        );
        assert!(matches!(err, Error::NetworkUnreachable(_)));

        let err = classify_remote_error("fatal: '/nope' does not appear to be a git repository");
        assert!(matches!(err, Error::NetworkUnreachable(_)));
    }

    #[test]
    fn test_classify_other() {
        let err = classify_remote_error(" ! [rejected]        main -> main (fetch first)");
        assert!(matches!(err, Error::Git(_)));
    }

    #[test]
    fn test_ahead_behind_diverged() {
        assert!(AheadBehind { ahead: 1, behind: 2 }.diverged());
        assert!(!AheadBehind { ahead: 0, behind: 2 }.diverged());
    }
}
