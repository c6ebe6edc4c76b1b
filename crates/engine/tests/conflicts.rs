//! Conflict resolution on real merge conflicts

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Machine, Remote, ScriptedPrompt};
use mentat_engine::conflict::Resolution;
use mentat_engine::{ConflictResolver, Journal, MergeStrategy};
use std::fs;

const SETTINGS: &str = "home/.config/app/settings.json";

/// `m2` ends up mid-merge with `file` conflicted: `m1`'s version is remote,
/// `m2`'s is local
fn conflicted_pair(file: &str, local: &str, remote_content: &str) -> (Remote, Machine, Machine) {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write(file, remote_content);
    m1.commit_all("remote change");
    m1.git(&["push", "--quiet", "origin", "main"]);

    m2.write(file, local);
    m2.commit_all("local change");
    m2.git(&["fetch", "--quiet", "origin"]);
    let merge = duct::cmd!("git", "merge", "--no-edit", "origin/main")
        .dir(&m2.repo)
        .stdout_null()
        .stderr_null()
        .unchecked()
        .run()
        .unwrap();
    assert!(!merge.status.success(), "merge should conflict");
    (remote, m1, m2)
}

#[test]
fn test_prefer_remote_takes_remote_bytes() {
    let remote_version = "{\n  \"theme\": \"light\"\n}\n";
    let (_remote, _m1, m2) = conflicted_pair(SETTINGS, "{\n  \"theme\": \"solarized\"\n}\n", remote_version);
    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    let resolver = ConflictResolver::new(&ws, &prompt);

    assert_eq!(resolver.detect().unwrap(), vec![SETTINGS.to_string()]);
    let resolution = resolver
        .resolve(SETTINGS, Some(MergeStrategy::PreferRemote))
        .unwrap();

    assert_eq!(resolution, Resolution::Resolved(MergeStrategy::PreferRemote));
    assert_eq!(fs::read(m2.repo.join(SETTINGS)).unwrap(), remote_version.as_bytes());
    assert!(resolver.detect().unwrap().is_empty());
    assert!(prompt.untouched());
    assert!(m2.state.journal_contains(
        Journal::Conflicts,
        &format!("resolved file={SETTINGS} strategy=prefer-remote")
    ));
}

#[test]
fn test_backup_written_before_resolution() {
    let (_remote, _m1, m2) = conflicted_pair(SETTINGS, "local\n", "remote\n");
    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    ConflictResolver::new(&ws, &prompt)
        .resolve(SETTINGS, Some(MergeStrategy::PreferLocal))
        .unwrap();

    let backups = m2.backups_named("-conflict");
    assert_eq!(backups.len(), 1);
    let base = backups[0].join(SETTINGS);
    let read = |suffix: &str| fs::read_to_string(format!("{}.{suffix}", base.display())).unwrap();
    assert_eq!(read("ours"), "local\n");
    assert_eq!(read("theirs"), "remote\n");
    assert_eq!(read("base"), "{\n  \"theme\": \"dark\"\n}\n");
    assert!(read("conflict").contains("<<<<<<< "));
    assert_eq!(m2.read(SETTINGS), "local\n");
}

#[test]
fn test_policy_unions_shell_rc() {
    let (_remote, _m1, m2) = conflicted_pair(
        "home/.bashrc",
        "export EDITOR=vi\nalias ll='ls -l'\nalias gs='git status'\n",
        "export EDITOR=vi\nalias ll='ls -l'\nexport PAGER=less\n",
    );
    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    let report = ConflictResolver::new(&ws, &prompt).resolve_all(None).unwrap();

    assert_eq!(
        report.resolved,
        vec![("home/.bashrc".to_string(), MergeStrategy::Union)]
    );
    assert!(report.completed);
    assert!(report.remaining.is_empty());
    assert_eq!(
        m2.read("home/.bashrc"),
        "export EDITOR=vi\nalias ll='ls -l'\nalias gs='git status'\nexport PAGER=less\n"
    );
    // The merge commit was made
    assert_eq!(m2.git(&["rev-list", "--parents", "-n", "1", "HEAD"]).split(' ').count(), 3);
}

#[test]
fn test_interactive_skip_leaves_file_unmerged() {
    let (_remote, _m1, m2) = conflicted_pair("home/notes.md", "# mine\n", "# theirs\n");
    let ws = m2.workspace();
    // View diff, then skip
    let prompt = ScriptedPrompt::with_selections(&[2, 5]);
    let report = ConflictResolver::new(&ws, &prompt).resolve_all(None).unwrap();

    assert_eq!(report.skipped, vec!["home/notes.md".to_string()]);
    assert!(!report.completed);
    assert_eq!(report.remaining, vec!["home/notes.md".to_string()]);
    assert!(prompt.shown.borrow().iter().any(|s| s.contains("+# theirs")));
}

#[test]
fn test_prevent_check_reports_overlap() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write("home/.bashrc", "remote\n");
    m1.commit_all("remote");
    m1.git(&["push", "--quiet", "origin", "main"]);
    m2.write("home/.bashrc", "local\n");
    m2.write("home/.vimrc", "local\n");
    m2.commit_all("local");

    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    let report = ConflictResolver::new(&ws, &prompt).prevent_check().unwrap();

    assert_eq!((report.ahead, report.behind), (1, 1));
    assert_eq!(report.overlapping, vec!["home/.bashrc".to_string()]);
    assert!(report.at_risk());
    // Nothing was merged
    assert_eq!(m2.read("home/.bashrc"), "local\n");
    assert!(m2.state.journal_contains(Journal::Conflicts, "overlapping changes"));
}

#[test]
fn test_analyze_counts_resolutions() {
    let (_remote, _m1, m2) = conflicted_pair(SETTINGS, "a\n", "b\n");
    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    let resolver = ConflictResolver::new(&ws, &prompt);
    resolver.resolve_all(None).unwrap();

    let analysis = resolver.analyze(7).unwrap();
    assert_eq!(analysis.total, 1);
    assert_eq!(analysis.by_file.first().map(|(f, n)| (f.as_str(), *n)), Some((SETTINGS, 1)));

    // Nothing is old enough to prune yet
    assert_eq!(resolver.clean(30).unwrap(), 0);
    assert_eq!(m2.backups_named("-conflict").len(), 1);
}

#[test]
fn test_manual_edit_needs_clean_file_and_confirmation() {
    let (_remote, _m1, m2) = conflicted_pair("home/notes.md", "# mine\n", "# theirs\n");
    let ws = m2.workspace();
    // Edit three times: markers left behind, then declined, then accepted
    let prompt = ScriptedPrompt::with_selections(&[3, 3, 3])
        .then_edit(&[
            "<<<<<<< HEAD\n# mine\n=======\n# theirs\n>>>>>>> origin/main\n",
            "# merged\n",
            "# merged by hand\n",
        ])
        .then_confirm(&[false, true]);
    let resolution = ConflictResolver::new(&ws, &prompt)
        .resolve("home/notes.md", Some(MergeStrategy::Interactive))
        .unwrap();

    assert_eq!(resolution, Resolution::Resolved(MergeStrategy::Interactive));
    assert_eq!(m2.read("home/notes.md"), "# merged by hand\n");
    assert!(
        prompt
            .shown
            .borrow()
            .iter()
            .any(|s| s.contains("still contains conflict markers"))
    );
    let confirmations = prompt
        .asked
        .borrow()
        .iter()
        .filter(|q| q.starts_with("Mark home/notes.md as resolved"))
        .count();
    assert_eq!(confirmations, 2);
    assert!(ConflictResolver::new(&ws, &prompt).detect().unwrap().is_empty());
}

#[test]
fn test_declined_manual_edit_stays_unmerged() {
    let (_remote, _m1, m2) = conflicted_pair("home/notes.md", "# mine\n", "# theirs\n");
    let ws = m2.workspace();
    let prompt = ScriptedPrompt::with_selections(&[3, 5])
        .then_edit(&["# merged\n"])
        .then_confirm(&[false]);
    let resolver = ConflictResolver::new(&ws, &prompt);

    let resolution = resolver
        .resolve("home/notes.md", Some(MergeStrategy::Interactive))
        .unwrap();

    assert_eq!(resolution, Resolution::Skipped);
    assert_eq!(resolver.detect().unwrap(), vec!["home/notes.md".to_string()]);
    assert!(m2.state.journal_contains(Journal::Conflicts, "skipped file=home/notes.md"));
}

#[test]
fn test_policy_merges_gitconfig_by_section() {
    let (_remote, _m1, m2) = conflicted_pair(
        "home/.gitconfig",
        "[user]\n\tname = m2\n[core]\n\teditor = vim\n",
        "[user]\n\tname = m1\n[alias]\n\tst = status\n",
    );
    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    let report = ConflictResolver::new(&ws, &prompt).resolve_all(None).unwrap();

    assert_eq!(
        report.resolved,
        vec![("home/.gitconfig".to_string(), MergeStrategy::Section)]
    );
    assert!(report.completed);
    assert!(prompt.untouched());
    assert_eq!(
        m2.read("home/.gitconfig"),
        "[user]\n\tname = m2\n[core]\n\teditor = vim\n\n[alias]\n\tst = status\n"
    );
}

#[test]
fn test_resolve_all_continues_paused_rebase() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write("home/.bashrc", "export EDITOR=nano\n");
    m1.commit_all("remote change");
    m1.git(&["push", "--quiet", "origin", "main"]);

    m2.write("home/.bashrc", "export EDITOR=emacs\n");
    m2.commit_all("local change");
    m2.git(&["fetch", "--quiet", "origin"]);
    let rebase = duct::cmd!("git", "rebase", "origin/main")
        .dir(&m2.repo)
        .stdout_null()
        .stderr_null()
        .unchecked()
        .run()
        .unwrap();
    assert!(!rebase.status.success(), "rebase should stop on the conflict");

    let ws = m2.workspace();
    let prompt = ScriptedPrompt::new();
    let report = ConflictResolver::new(&ws, &prompt)
        .resolve_all(Some(MergeStrategy::PreferLocal))
        .unwrap();

    assert!(report.completed);
    assert!(report.remaining.is_empty());
    // Local means this machine's commit, even though git calls it "theirs"
    // while rebasing
    assert_eq!(m2.read("home/.bashrc"), "export EDITOR=emacs\n");
    assert!(!m2.repo.join(".git/rebase-merge").exists());
    assert!(!m2.repo.join(".git/rebase-apply").exists());
    // Linear history on top of the remote tip
    assert_eq!(m2.git(&["rev-parse", "HEAD~1"]), remote.head());
    assert_eq!(m2.git(&["rev-list", "--parents", "-n", "1", "HEAD"]).split(' ').count(), 2);
    assert!(m2.state.journal_contains(
        Journal::Conflicts,
        "resolved file=home/.bashrc strategy=prefer-local"
    ));
}
