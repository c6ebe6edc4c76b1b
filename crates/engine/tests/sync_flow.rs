//! End-to-end sync cycles against a real bare remote

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Machine, Remote, ScriptedPrompt};
use mentat_engine::registry::MachineRegistry;
use mentat_engine::sync::{PullOutcome, PushOutcome, SyncState};
use mentat_engine::{Error, Journal, SyncMode, SyncOrchestrator};
use std::fs;

fn sync(machine: &Machine, mode: SyncMode) -> mentat_engine::Result<mentat_engine::SyncReport> {
    let ws = machine.workspace();
    let prompt = ScriptedPrompt::new();
    SyncOrchestrator::new(&ws, &prompt).run(mode)
}

#[test]
fn test_two_machines_converge() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write("home/.vimrc", "set number\n");
    m2.write("home/.gitconfig", "[user]\n  name = me\n");

    let first = sync(&m1, SyncMode::Full).unwrap();
    assert!(first.is_clean(), "{:?}", first.steps);
    let second = sync(&m2, SyncMode::Full).unwrap();
    assert!(matches!(second.pull, Some(PullOutcome::Rebased { .. })));
    sync(&m1, SyncMode::Pull).unwrap();

    assert_eq!(m1.head(), m2.head());
    assert_eq!(m1.head(), remote.head());
    assert_eq!(m1.read("home/.gitconfig"), "[user]\n  name = me\n");
    assert_eq!(m2.read("home/.vimrc"), "set number\n");

    let r1 = MachineRegistry::load(&m1.repo).unwrap();
    let r2 = MachineRegistry::load(&m2.repo).unwrap();
    assert_eq!(r1, r2);
    assert!(r1.last_seen("m1").is_some());
    assert!(r1.last_seen("m2").is_some());

    // Pulled files are linked into place
    assert_eq!(
        fs::read_link(m1.home.join(".gitconfig")).unwrap(),
        m1.repo.join("home/.gitconfig")
    );
}

#[test]
fn test_full_cycle_walks_every_state() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");

    let report = sync(&m1, SyncMode::Full).unwrap();
    assert_eq!(
        report.transitions,
        vec![
            SyncState::Idle,
            SyncState::LockAcquired,
            SyncState::HealthChecked,
            SyncState::Pushing,
            SyncState::Pulling,
            SyncState::SymlinksVerified,
            SyncState::RegistryUpdated,
            SyncState::Idle,
        ]
    );
    assert!(report.health.is_some());
    assert!(!m1.state_root.join("sync.lock").exists());
    assert!(m1.state.journal_contains(Journal::Sync, "sync full completed"));
}

#[test]
fn test_push_without_changes_is_noop() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let before = m1.head();

    let report = sync(&m1, SyncMode::Push).unwrap();

    assert_eq!(report.push, Some(PushOutcome::NothingToCommit));
    assert_eq!(m1.head(), before);
    assert_eq!(remote.head(), before);
    assert!(m1.state.journal_contains(Journal::Sync, "no changes to commit"));
}

#[test]
fn test_push_commits_with_machine_message() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    m1.write("home/.bashrc", "export EDITOR=nvim\n");

    let report = sync(&m1, SyncMode::Push).unwrap();

    let Some(PushOutcome::Pushed { commit: Some(message) }) = report.push else {
        panic!("expected a commit, got {:?}", report.push);
    };
    assert!(message.starts_with("sync(m1): "), "{message}");
    assert!(message.ends_with(" - .bashrc"), "{message}");
    assert_eq!(m1.git(&["log", "-1", "--format=%s"]), message);
    assert_eq!(remote.head(), m1.head());
}

#[test]
fn test_push_sends_pending_commits_on_clean_tree() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    m1.write("home/.inputrc", "set editing-mode vi\n");
    m1.commit_all("local work");

    let report = sync(&m1, SyncMode::Push).unwrap();

    assert_eq!(report.push, Some(PushOutcome::Pushed { commit: None }));
    assert_eq!(remote.head(), m1.head());
}

#[test]
fn test_pull_resolves_config_conflict_with_remote() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write("home/.config/app/settings.json", "{\n  \"theme\": \"light\"\n}\n");
    sync(&m1, SyncMode::Push).unwrap();

    m2.write("home/.config/app/settings.json", "{\n  \"theme\": \"solarized\"\n}\n");
    m2.commit_all("local theme");
    let report = sync(&m2, SyncMode::Pull).unwrap();

    let Some(PullOutcome::Rebased { resolved }) = report.pull else {
        panic!("expected a rebase, got {:?}", report.pull);
    };
    assert_eq!(resolved, vec!["home/.config/app/settings.json".to_string()]);
    assert_eq!(
        m2.read("home/.config/app/settings.json"),
        "{\n  \"theme\": \"light\"\n}\n"
    );
    assert!(m2.git(&["status", "--porcelain"]).is_empty());
    assert_eq!(m2.backups_named("-conflict").len(), 1);
}

#[test]
fn test_pull_aborts_rebase_when_manual_resolution_needed() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write("home/notes.md", "# notes\nfrom m1\n");
    sync(&m1, SyncMode::Push).unwrap();

    m2.write("home/notes.md", "# notes\nfrom m2\n");
    m2.commit_all("m2 notes");
    let before = m2.head();

    let err = sync(&m2, SyncMode::Pull).unwrap_err();

    match err {
        Error::ManualResolutionRequired { files } => {
            assert_eq!(files, vec!["home/notes.md".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(m2.head(), before);
    assert!(!m2.repo.join(".git/rebase-merge").exists());
    assert!(!m2.repo.join(".git/rebase-apply").exists());
    assert_eq!(m2.read("home/notes.md"), "# notes\nfrom m2\n");
    assert!(!m2.state_root.join("sync.lock").exists());
}

#[test]
fn test_full_mode_treats_pull_failure_as_soft() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let m2 = Machine::clone_from(&remote, "m2");

    m1.write("home/notes.md", "# notes\nfrom m1\n");
    sync(&m1, SyncMode::Push).unwrap();
    m2.write("home/notes.md", "# notes\nfrom m2\n");

    let report = sync(&m2, SyncMode::Full).unwrap();

    let failed: Vec<SyncState> = report.failures().map(|s| s.step).collect();
    assert!(failed.contains(&SyncState::Pulling), "{failed:?}");
    assert_eq!(report.transitions.last(), Some(&SyncState::Idle));
    assert!(report.transitions.contains(&SyncState::RegistryUpdated));
}

#[test]
fn test_lock_held_by_live_process_times_out() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let lock = m1.state_root.join("sync.lock");
    fs::create_dir_all(&lock).unwrap();
    fs::write(lock.join("pid"), std::process::id().to_string()).unwrap();

    let err = sync(&m1, SyncMode::Push).unwrap_err();

    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_retryable());
    assert!(lock.exists());
}

#[test]
fn test_stale_lock_is_reclaimed() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let lock = m1.state_root.join("sync.lock");
    fs::create_dir_all(&lock).unwrap();
    // Beyond any real pid_max
    fs::write(lock.join("pid"), "4194305").unwrap();

    sync(&m1, SyncMode::Push).unwrap();
    assert!(!lock.exists());
}
