//! Configuration management
//!
//! This module loads and saves `config.json` from the state directory.
//! Every field has a default, so a missing or partial file is valid; the
//! file never holds credentials.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

/// Repository visibility, recorded at setup time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    /// Only this machine's owner can read the remote
    #[default]
    Private,
    /// Anyone can read the remote
    Public,
}

/// How the remote is authenticated (credentials themselves live in the
/// SSH agent or the git credential helper)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// SSH keys via the agent
    #[default]
    Ssh,
    /// HTTPS via the git credential helper
    Https,
}

/// Sync cycle tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Seconds to wait for the sync lock before giving up
    pub lock_timeout_secs: u64,
    /// Total push attempts, including the first
    pub push_attempts: u32,
    /// Fixed delay between push attempts
    pub retry_backoff_secs: u64,
    /// Deadline for any single network operation
    pub network_timeout_secs: u64,
    /// Name of the remote to sync with
    pub remote: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lock_timeout_secs: 30,
            push_attempts: 3,
            retry_backoff_secs: 5,
            network_timeout_secs: 60,
            remote: "origin".to_string(),
        }
    }
}

/// Ignore patterns for the linked subtree, per platform
///
/// Patterns are gitignore-like; a leading `!` re-includes a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IgnoreSettings {
    /// Patterns applied on every platform
    pub global: Vec<String>,
    /// macOS-only patterns
    pub darwin: Vec<String>,
    /// Linux-only patterns
    pub linux: Vec<String>,
    /// Windows-only patterns
    pub windows: Vec<String>,
}

/// Symlink layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymlinkSettings {
    /// Subdirectory of the repository mirrored into the home directory
    pub source_subdir: String,
    /// Files never linked into the home directory
    pub ignore: IgnoreSettings,
}

impl Default for SymlinkSettings {
    fn default() -> Self {
        Self {
            source_subdir: "home".to_string(),
            ignore: IgnoreSettings::default(),
        }
    }
}

/// Health monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    /// Default interval for `health monitor`
    pub monitor_interval_secs: u64,
    /// Repository size above which the disk score is penalised
    pub max_repo_size_mb: u64,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            monitor_interval_secs: 300,
            max_repo_size_mb: 500,
        }
    }
}

/// Conflict backup retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictSettings {
    /// Backups older than this are removed by `resolve-conflicts clean`
    pub backup_retention_days: u32,
}

impl Default for ConflictSettings {
    fn default() -> Self {
        Self {
            backup_retention_days: 30,
        }
    }
}

/// Commands run after a force reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HookSettings {
    /// Reinstalls tracked packages; only run when explicitly requested
    pub reinstall_packages: Option<String>,
    /// Shell commands run in the repository after every reset
    pub post_reset: Vec<String>,
}

/// Root of `config.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Remote repository URL
    pub dotfiles_repo: String,
    /// Visibility of the remote repository
    pub repo_type: RepoType,
    /// How git authenticates to the remote
    pub auth_method: AuthMethod,
    /// Branch every machine syncs to
    pub sync_branch: String,
    /// Whether scheduled syncs are enabled
    pub auto_sync: bool,
    /// Daemon interval in seconds
    pub sync_interval: u64,
    /// Set once initial setup has completed
    pub configured: bool,

    /// Sync cycle tuning
    pub sync: SyncSettings,
    /// Link farm layout
    pub symlinks: SymlinkSettings,
    /// Health thresholds
    pub health: HealthSettings,
    /// Conflict backups
    pub conflicts: ConflictSettings,
    /// Post-reset hooks
    pub hooks: HookSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dotfiles_repo: String::new(),
            repo_type: RepoType::default(),
            auth_method: AuthMethod::default(),
            sync_branch: "main".to_string(),
            auto_sync: true,
            sync_interval: 1800,
            configured: false,
            sync: SyncSettings::default(),
            symlinks: SymlinkSettings::default(),
            health: HealthSettings::default(),
            conflicts: ConflictSettings::default(),
            hooks: HookSettings::default(),
        }
    }
}

static SCP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[A-Za-z0-9._~/-]+$").expect("valid regex")
});

static SSH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^ssh://([A-Za-z0-9._-]+@)?[A-Za-z0-9.-]+(:[0-9]+)?/[A-Za-z0-9._~/-]+$")
        .expect("valid regex")
});

static HTTPS_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://[A-Za-z0-9.-]+(:[0-9]+)?(/[A-Za-z0-9._~-]+)+/?$").expect("valid regex")
});

static LOCAL_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(file://)?/[A-Za-z0-9._~/ +-]*$").expect("valid regex"));

static BRANCH_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("valid regex"));

/// Validate a remote repository URL
///
/// Accepts scp-like SSH (`git@host:owner/repo.git`), `ssh://`, `https://`,
/// `file://` and absolute local paths. Rejects path traversal, doubled
/// slashes and anything carrying shell metacharacters.
pub fn validate_repo_url(url: &str) -> Result<()> {
    let invalid = |reason: &str| Err(Error::InvalidConfig(format!("{reason}: {url}")));

    if url.is_empty() {
        return invalid("repository URL is empty");
    }
    if url.contains("..") {
        return invalid("repository URL contains path traversal");
    }

    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let after_scheme = after_scheme.strip_prefix('/').unwrap_or(after_scheme);
    if after_scheme.contains("//") {
        return invalid("repository URL contains an empty path segment");
    }

    if SCP_URL.is_match(url)
        || SSH_URL.is_match(url)
        || HTTPS_URL.is_match(url)
        || LOCAL_URL.is_match(url)
    {
        Ok(())
    } else {
        invalid("unsupported repository URL")
    }
}

/// Validate a branch name well enough to pass it to git safely
pub fn validate_branch(branch: &str) -> Result<()> {
    if BRANCH_NAME.is_match(branch) && !branch.contains("..") && !branch.ends_with(".lock") {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("invalid branch name: {branch}")))
    }
}

impl Config {
    /// Load configuration from a file
    ///
    /// A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration, creating the parent directory as private
    ///
    /// The file is written with mode 0600.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;

        if let Some(parent) = path.parent() {
            crate::dirs::ensure_private_dir(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Message(format!("failed to serialize config: {e}")))?;
        fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Check field-level invariants
    pub fn validate(&self) -> Result<()> {
        if !self.dotfiles_repo.is_empty() {
            validate_repo_url(&self.dotfiles_repo)?;
        }
        validate_branch(&self.sync_branch)?;
        if self.sync.push_attempts == 0 {
            return Err(Error::InvalidConfig(
                "sync.push_attempts must be at least 1".to_string(),
            ));
        }
        if self.sync_interval == 0 {
            return Err(Error::InvalidConfig(
                "sync_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
