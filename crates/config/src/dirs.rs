//! Directory layout for mentat
//!
//! The state root (`~/.mentat` by default) holds the configuration, the sync
//! lock, journals, health status and backups. The dotfiles repository lives
//! separately (`~/dotfiles` by default) and its `home/` subtree is linked
//! into the home directory.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the repository path
pub const DOTFILES_DIR_ENV: &str = "MENTAT_DOTFILES_DIR";
/// Environment variable overriding the sync branch
pub const SYNC_BRANCH_ENV: &str = "MENTAT_SYNC_BRANCH";
/// Environment variable overriding the state root
pub const STATE_DIR_ENV: &str = "MENTAT_STATE_DIR";
/// Environment variable overriding the machine identifier
pub const MACHINE_ID_ENV: &str = "MENTAT_MACHINE_ID";

/// Default state root: `~/.mentat`
#[must_use]
pub fn default_state_dir() -> Option<PathBuf> {
    ::dirs::home_dir().map(|home| home.join(".mentat"))
}

/// Default repository checkout: `~/dotfiles`
#[must_use]
pub fn default_dotfiles_dir() -> Option<PathBuf> {
    ::dirs::home_dir().map(|home| home.join("dotfiles"))
}

/// Create a directory (and parents) readable only by the owner
pub fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }

    Ok(())
}

/// Well-known files under the state root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Paths under `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root of the state directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `config.json`
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    /// Lock directory; its existence is the lock
    #[must_use]
    pub fn lock_dir(&self) -> PathBuf {
        self.root.join("sync.lock")
    }

    /// Latest health evaluation, overwritten each time
    #[must_use]
    pub fn health_status(&self) -> PathBuf {
        self.root.join("health.status")
    }

    /// Record of every link the symlink manager created
    #[must_use]
    pub fn link_manifest(&self) -> PathBuf {
        self.root.join("symlinks.json")
    }

    /// Timestamped backup directories
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Append-only journal file by name (`sync.log`, `health.log`, ...)
    #[must_use]
    pub fn journal(&self, file_name: &str) -> PathBuf {
        self.root.join(file_name)
    }
}
