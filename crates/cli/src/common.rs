//! Common utilities and types shared across CLI commands

use anyhow::{Context, Result, anyhow};
use mentat_config::{Config, StatePaths};
use mentat_engine::Workspace;
use mentat_engine::git::GitCli;
use mentat_engine::health::probe::{StatvfsProbe, TcpProbe};
use mentat_engine::state::FileStateStore;
use mentat_engine::system::HostProcessProbe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use crate::ui::TerminalPrompt;

/// Resolved locations for one invocation
///
/// Each path comes from its flag, then its environment variable (clap
/// folds both into the same option), then the built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    /// Local checkout of the dotfiles repository
    pub repo: PathBuf,
    /// Directory the linked subtree is mirrored into
    pub home: PathBuf,
    /// State root layout
    pub state: StatePaths,
}

impl ResolvedPaths {
    /// Fill in defaults for any location not given explicitly
    ///
    /// # Errors
    ///
    /// Returns an error if a default is needed and the home directory
    /// cannot be determined.
    pub fn resolve(
        repo: Option<&Path>,
        home: Option<&Path>,
        state_dir: Option<&Path>,
    ) -> Result<Self> {
        let repo = repo
            .map(Path::to_path_buf)
            .or_else(mentat_config::default_dotfiles_dir)
            .ok_or_else(|| {
                anyhow!("Could not determine the dotfiles directory. Pass --repo or set MENTAT_DOTFILES_DIR.")
            })?;
        let home = home
            .map(Path::to_path_buf)
            .or_else(::dirs::home_dir)
            .ok_or_else(|| anyhow!("Could not determine the home directory. Pass --home."))?;
        let state_root = state_dir
            .map(Path::to_path_buf)
            .or_else(mentat_config::default_state_dir)
            .ok_or_else(|| {
                anyhow!("Could not determine the state directory. Pass --state-dir or set MENTAT_STATE_DIR.")
            })?;

        Ok(Self {
            repo,
            home,
            state: StatePaths::new(state_root),
        })
    }
}

/// Load `config.json` from the state root and apply the branch override
///
/// # Errors
///
/// Returns an error if the file is invalid or the override is not a
/// usable branch name.
pub fn load_config(paths: &StatePaths, branch: Option<&str>) -> Result<Config> {
    let config_file = paths.config_file();
    let mut config = Config::load(&config_file)
        .with_context(|| format!("Failed to load {}", config_file.display()))?;

    if let Some(branch) = branch {
        mentat_config::config::validate_branch(branch)?;
        config.sync_branch = branch.to_string();
    }
    Ok(config)
}

/// Runtime context passed to every command
///
/// Owns the host implementations of the engine's capabilities; commands
/// borrow them through [`RuntimeContext::workspace`].
pub struct RuntimeContext {
    /// Effective configuration
    pub config: Config,
    /// Resolved locations
    pub paths: ResolvedPaths,
    /// Sanitized identifier of this machine
    pub machine_id: String,
    /// Interactive prompt on the controlling terminal
    pub prompt: TerminalPrompt,
    git: GitCli,
    state: FileStateStore,
    process: HostProcessProbe,
    network: TcpProbe,
    disk: StatvfsProbe,
    stop: Arc<AtomicBool>,
}

impl RuntimeContext {
    /// Create a context, opening (and if needed creating) the state root
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be created.
    pub fn new(config: Config, paths: ResolvedPaths) -> Result<Self> {
        let state = FileStateStore::open(paths.state.clone())
            .with_context(|| format!("Failed to open state directory {}", paths.state.root().display()))?;

        Ok(Self {
            git: GitCli::new(Duration::from_secs(config.sync.network_timeout_secs)),
            machine_id: mentat_engine::registry::machine_id(),
            config,
            paths,
            prompt: TerminalPrompt,
            state,
            process: HostProcessProbe,
            network: TcpProbe::default(),
            disk: StatvfsProbe,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use `stop` as the termination flag for long-running commands
    #[must_use]
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Set once a termination signal arrives
    pub fn stop_flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Borrow everything as an engine workspace
    pub fn workspace(&self) -> Workspace<'_> {
        Workspace {
            repo: self.paths.repo.clone(),
            home: self.paths.home.clone(),
            paths: self.paths.state.clone(),
            config: self.config.clone(),
            machine_id: self.machine_id.clone(),
            git: &self.git,
            state: &self.state,
            process: &self.process,
            network: &self.network,
            disk: &self.disk,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_paths_win() {
        let resolved = ResolvedPaths::resolve(
            Some(Path::new("/srv/dotfiles")),
            Some(Path::new("/home/alt")),
            Some(Path::new("/var/lib/mentat")),
        )
        .unwrap();

        assert_eq!(resolved.repo, PathBuf::from("/srv/dotfiles"));
        assert_eq!(resolved.home, PathBuf::from("/home/alt"));
        assert_eq!(resolved.state.root(), Path::new("/var/lib/mentat"));
    }

    #[test]
    fn test_defaults_live_under_home() {
        let resolved = ResolvedPaths::resolve(None, None, None).unwrap();
        assert!(resolved.repo.ends_with("dotfiles"));
        assert!(resolved.state.root().ends_with(".mentat"));
    }

    #[test]
    fn test_branch_override_applies_and_validates() {
        let temp = TempDir::new().unwrap();
        let paths = StatePaths::new(temp.path());

        let config = load_config(&paths, None).unwrap();
        assert_eq!(config.sync_branch, "main");

        let config = load_config(&paths, Some("laptop/dev")).unwrap();
        assert_eq!(config.sync_branch, "laptop/dev");

        assert!(load_config(&paths, Some("-rf")).is_err());
        assert!(load_config(&paths, Some("a..b")).is_err());
    }

    #[test]
    fn test_workspace_wires_context() {
        let temp = TempDir::new().unwrap();
        let paths = ResolvedPaths::resolve(
            Some(&temp.path().join("repo")),
            Some(&temp.path().join("home")),
            Some(&temp.path().join("state")),
        )
        .unwrap();
        let context = RuntimeContext::new(Config::default(), paths).unwrap();
        assert!(temp.path().join("state").is_dir());

        let ws = context.workspace();
        assert_eq!(ws.repo(), temp.path().join("repo"));
        assert_eq!(ws.branch(), "main");
        assert_eq!(ws.remote(), "origin");
        assert_eq!(
            ws.symlink_layout().source_root,
            temp.path().join("repo/home")
        );
    }
}
