//! Per-invocation wiring
//!
//! A [`Workspace`] bundles the paths, configuration and capabilities one
//! invocation works with. Components borrow it instead of reaching for
//! files, the environment or the process table themselves.

use crate::git::GitProvider;
use crate::health::probe::{DiskProbe, NetworkProbe};
use crate::lock::LockManager;
use crate::state::StateStore;
use crate::symlink::{SymlinkLayout, SymlinkManager};
use mentat_config::{Config, IgnoreMatcher, StatePaths};
use mentat_core::ProcessProbe;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths, configuration and host capabilities for one invocation
pub struct Workspace<'a> {
    /// Local checkout of the dotfiles repository
    pub repo: PathBuf,
    /// Directory the linked subtree is mirrored into
    pub home: PathBuf,
    /// State directory layout
    pub paths: StatePaths,
    /// Effective configuration (file, environment and flags already merged)
    pub config: Config,
    /// Sanitized identifier of this machine
    pub machine_id: String,
    /// Git access
    pub git: &'a dyn GitProvider,
    /// Journals, manifests and health status
    pub state: &'a dyn StateStore,
    /// Process table access for the sync lock
    pub process: &'a dyn ProcessProbe,
    /// Reachability probes
    pub network: &'a dyn NetworkProbe,
    /// Disk usage probe
    pub disk: &'a dyn DiskProbe,
}

impl<'a> Workspace<'a> {
    /// Remote name
    pub fn remote(&self) -> &str {
        &self.config.sync.remote
    }

    /// Branch being synced
    pub fn branch(&self) -> &str {
        &self.config.sync_branch
    }

    /// Repository checkout
    pub fn repo(&self) -> &Path {
        &self.repo
    }

    /// How long to wait for the sync lock
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.config.sync.lock_timeout_secs)
    }

    /// Sync lock for this state directory
    pub fn lock_manager(&self) -> LockManager<&'a dyn ProcessProbe> {
        LockManager::new(self.paths.lock_dir(), self.process)
    }

    /// Link layout derived from the config
    pub fn symlink_layout(&self) -> SymlinkLayout {
        SymlinkLayout {
            source_root: self.repo.join(&self.config.symlinks.source_subdir),
            repo_root: self.repo.clone(),
            target_root: self.home.clone(),
            backups_root: self.paths.backups_dir(),
        }
    }

    /// Symlink manager for this workspace
    pub fn symlinks(&self) -> SymlinkManager<'_> {
        SymlinkManager::new(
            self.symlink_layout(),
            IgnoreMatcher::from_settings(&self.config.symlinks.ignore),
            self.state,
        )
    }
}
