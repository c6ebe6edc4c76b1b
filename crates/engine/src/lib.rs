//! # Mentat sync engine
//!
//! Keeps a dotfiles repository consistent across machines:
//!
//! - **Lock Manager**: one sync cycle per machine, stale locks reclaimed
//! - **Symlink Manager**: links the repository's `home/` tree into place
//! - **Health Evaluator**: five sub-scores, auto-repair below 70
//! - **Conflict Resolver**: policy-driven merge strategies with backups
//! - **Sync Orchestrator**: the lock-protected push/pull/link/registry cycle
//! - **Force-Reset Protocol**: safety-gated replacement of local state
//!
//! Everything touching git, the host or persisted state goes through the
//! capability traits in [`git`], [`state`] and `mentat_core`, so the logic
//! can be driven with fakes.

pub mod backup;
pub mod conflict;
pub mod error;
pub mod git;
pub mod health;
pub mod hooks;
pub mod lock;
pub mod registry;
pub mod reset;
pub mod state;
pub mod symlink;
pub mod sync;
pub mod system;
pub mod workspace;

pub use error::{Error, Result};

pub use conflict::{ConflictResolver, MergeStrategy};
pub use git::{GitCli, GitProvider};
pub use health::{HealthEvaluator, HealthReport, HealthState};
pub use lock::LockManager;
pub use reset::{ForceReset, ResetOptions};
pub use state::{FileStateStore, Journal, MemoryStateStore, StateStore};
pub use symlink::SymlinkManager;
pub use sync::{ForcePull, ForcePullOutcome, SyncMode, SyncOrchestrator, SyncReport};
pub use workspace::Workspace;
