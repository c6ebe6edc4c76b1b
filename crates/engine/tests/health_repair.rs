//! Auto-repair against a real checkout

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{Machine, Remote};
use mentat_engine::health::GIT_LOCK_GRACE;
use mentat_engine::{Error, HealthEvaluator, Journal};
use std::fs;
use std::time::{Duration, SystemTime};

fn age(path: &std::path::Path, by: Duration) {
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::now() - by)
        .unwrap();
}

#[test]
fn test_repair_refuses_while_sync_holds_lock() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let ws = m1.workspace();
    let index_lock = m1.repo.join(".git/index.lock");
    fs::write(&index_lock, "").unwrap();
    age(&index_lock, 2 * GIT_LOCK_GRACE);

    let held = ws.lock_manager().acquire(Duration::from_secs(1)).unwrap();
    let evaluator = HealthEvaluator::new(&ws).with_network_probe(false);
    let err = evaluator.repair_locked(Duration::ZERO).unwrap_err();

    assert!(err.is_retryable());
    assert!(matches!(err, Error::LockTimeout { .. }));
    // Even an old git lock is left for the lock holder
    assert!(index_lock.exists());
    held.release().unwrap();

    let report = evaluator.repair_locked(Duration::from_secs(1)).unwrap();
    assert!(!index_lock.exists());
    assert!(report.actions.contains(&"removed .git/index.lock".to_string()));
    assert!(ws.lock_manager().holder().is_none());
    assert!(m1.state.journal_contains(Journal::Health, "auto-repair: removed .git/index.lock"));
}

#[test]
fn test_repair_keeps_fresh_git_lock() {
    let remote = Remote::new();
    let m1 = Machine::clone_from(&remote, "m1");
    let ws = m1.workspace();
    let index_lock = m1.repo.join(".git/index.lock");
    fs::write(&index_lock, "").unwrap();

    let report = HealthEvaluator::new(&ws)
        .with_network_probe(false)
        .repair_locked(Duration::from_secs(1))
        .unwrap();

    assert!(index_lock.exists());
    assert!(!report.actions.iter().any(|a| a.contains("index.lock")));
    assert!(report.failures.is_empty(), "{:?}", report.failures);
}
