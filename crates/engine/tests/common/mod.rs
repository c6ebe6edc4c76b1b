//! Shared fixtures: a bare "remote", machines cloned from it, and scripted
//! doubles for the host capabilities

#![allow(dead_code, clippy::unwrap_used, clippy::panic)]

use mentat_config::{Config, StatePaths};
use mentat_core::{InvocationContext, UserPrompt};
use mentat_engine::health::probe::{DiskProbe, NetworkProbe};
use mentat_engine::system::HostProcessProbe;
use mentat_engine::{GitCli, MemoryStateStore, Workspace};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Run git in `dir`, panicking on failure; returns trimmed stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = duct::cmd("git", args)
        .dir(dir)
        .env("GIT_AUTHOR_NAME", "Fixture")
        .env("GIT_AUTHOR_EMAIL", "fixture@example.com")
        .env("GIT_COMMITTER_NAME", "Fixture")
        .env("GIT_COMMITTER_EMAIL", "fixture@example.com")
        .stdout_capture()
        .stderr_capture()
        .unchecked()
        .run()
        .unwrap();
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Bare repository seeded with a small dotfiles tree on `main`
pub struct Remote {
    _dir: TempDir,
    pub path: PathBuf,
}

impl Remote {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("remote.git");
        fs::create_dir(&path).unwrap();
        git(&path, &["init", "--quiet", "--bare", "--initial-branch=main"]);

        let seed = dir.path().join("seed");
        fs::create_dir(&seed).unwrap();
        git(&seed, &["init", "--quiet", "--initial-branch=main"]);
        write(&seed, "home/.bashrc", "export EDITOR=vi\nalias ll='ls -l'\n");
        write(&seed, "home/.config/app/settings.json", "{\n  \"theme\": \"dark\"\n}\n");
        write(&seed, "home/notes.md", "# notes\n");
        git(&seed, &["add", "--all"]);
        git(&seed, &["commit", "--quiet", "-m", "initial"]);
        git(&seed, &["remote", "add", "origin", path.to_str().unwrap()]);
        git(&seed, &["push", "--quiet", "origin", "main"]);

        Self { _dir: dir, path }
    }

    pub fn head(&self) -> String {
        git(&self.path, &["rev-parse", "refs/heads/main"])
    }
}

pub fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// Every TCP probe succeeds
pub struct Online;

impl NetworkProbe for Online {
    fn can_connect(&self, _host: &str, _port: u16) -> bool {
        true
    }
}

/// Fixed volume utilization
pub struct FixedDisk(pub u8);

impl DiskProbe for FixedDisk {
    fn used_percent(&self, _path: &Path) -> Option<u8> {
        Some(self.0)
    }
}

/// One participating machine: a clone, a home directory and a state root
pub struct Machine {
    dir: TempDir,
    pub id: String,
    pub repo: PathBuf,
    pub home: PathBuf,
    pub state_root: PathBuf,
    pub config: Config,
    pub state: MemoryStateStore,
    git: GitCli,
    process: HostProcessProbe,
    network: Online,
    disk: FixedDisk,
}

impl Machine {
    pub fn clone_from(remote: &Remote, id: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("dotfiles");
        let home = dir.path().join("home");
        let state_root = dir.path().join("state");
        fs::create_dir_all(&home).unwrap();
        fs::create_dir_all(&state_root).unwrap();

        git(
            dir.path(),
            &["clone", "--quiet", remote.path.to_str().unwrap(), "dotfiles"],
        );
        git(&repo, &["config", "user.name", id]);
        git(&repo, &["config", "user.email", &format!("{id}@example.com")]);
        git(&repo, &["config", "commit.gpgsign", "false"]);

        let mut config = Config::default();
        config.dotfiles_repo = remote.path.to_string_lossy().into_owned();
        config.sync.retry_backoff_secs = 0;
        config.sync.lock_timeout_secs = 1;

        Self {
            dir,
            id: id.to_string(),
            repo,
            home,
            state_root,
            config,
            state: MemoryStateStore::new(),
            git: GitCli::new(Duration::from_secs(30)),
            process: HostProcessProbe,
            network: Online,
            disk: FixedDisk(40),
        }
    }

    /// Directory holding the clone, home and state root
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn workspace(&self) -> Workspace<'_> {
        Workspace {
            repo: self.repo.clone(),
            home: self.home.clone(),
            paths: StatePaths::new(&self.state_root),
            config: self.config.clone(),
            machine_id: self.id.clone(),
            git: &self.git,
            state: &self.state,
            process: &self.process,
            network: &self.network,
            disk: &self.disk,
        }
    }

    pub fn backups(&self) -> PathBuf {
        self.state_root.join("backups")
    }

    /// Backup directories whose name ends with `suffix`
    pub fn backups_named(&self, suffix: &str) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(self.backups()) else {
            return Vec::new();
        };
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(suffix))
            .collect();
        dirs.sort();
        dirs
    }

    pub fn write(&self, rel: &str, content: &str) {
        write(&self.repo, rel, content);
    }

    pub fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.repo.join(rel)).unwrap()
    }

    pub fn git(&self, args: &[&str]) -> String {
        git(&self.repo, args)
    }

    pub fn commit_all(&self, message: &str) {
        self.git(&["add", "--all"]);
        self.git(&["commit", "--quiet", "-m", message]);
    }

    pub fn head(&self) -> String {
        self.git(&["rev-parse", "HEAD"])
    }
}

/// Prompt double replaying scripted answers
#[derive(Default)]
pub struct ScriptedPrompt {
    inputs: RefCell<VecDeque<String>>,
    selections: RefCell<VecDeque<usize>>,
    confirms: RefCell<VecDeque<bool>>,
    /// Contents written by successive `edit_file` calls
    edits: RefCell<VecDeque<String>>,
    pub shown: RefCell<Vec<String>>,
    pub asked: RefCell<Vec<String>>,
}

impl ScriptedPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_inputs(inputs: &[&str]) -> Self {
        let prompt = Self::default();
        prompt
            .inputs
            .borrow_mut()
            .extend(inputs.iter().map(|s| (*s).to_string()));
        prompt
    }

    pub fn with_selections(selections: &[usize]) -> Self {
        let prompt = Self::default();
        prompt.selections.borrow_mut().extend(selections);
        prompt
    }

    #[must_use]
    pub fn then_confirm(self, answers: &[bool]) -> Self {
        self.confirms.borrow_mut().extend(answers);
        self
    }

    #[must_use]
    pub fn then_edit(self, contents: &[&str]) -> Self {
        self.edits
            .borrow_mut()
            .extend(contents.iter().map(|s| (*s).to_string()));
        self
    }

    /// Whether the prompt was used at all
    pub fn untouched(&self) -> bool {
        self.shown.borrow().is_empty() && self.asked.borrow().is_empty()
    }
}

impl UserPrompt for ScriptedPrompt {
    fn select(&self, prompt: &str, _items: &[&str]) -> mentat_core::Result<usize> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.selections
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| mentat_core::Error::Prompt(format!("unexpected menu: {prompt}")))
    }

    fn confirm(&self, prompt: &str, default: bool) -> mentat_core::Result<bool> {
        self.asked.borrow_mut().push(prompt.to_string());
        Ok(self.confirms.borrow_mut().pop_front().unwrap_or(default))
    }

    fn input(&self, prompt: &str) -> mentat_core::Result<String> {
        self.asked.borrow_mut().push(prompt.to_string());
        self.inputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| mentat_core::Error::Prompt(format!("unexpected input: {prompt}")))
    }

    fn edit_file(&self, path: &Path) -> mentat_core::Result<()> {
        if let Some(content) = self.edits.borrow_mut().pop_front() {
            fs::write(path, content)?;
        }
        Ok(())
    }

    fn show(&self, text: &str) {
        self.shown.borrow_mut().push(text.to_string());
    }
}

/// Invocation double
pub struct FakeInvocation {
    pub terminal: bool,
    pub parent: Option<String>,
    pub env: HashMap<String, String>,
}

impl FakeInvocation {
    /// A person at an interactive shell
    pub fn human() -> Self {
        Self {
            terminal: true,
            parent: Some("zsh".to_string()),
            env: HashMap::new(),
        }
    }

    pub fn launched_by(parent: &str) -> Self {
        Self {
            parent: Some(parent.to_string()),
            ..Self::human()
        }
    }

    pub fn with_env(key: &str, value: &str) -> Self {
        let mut ctx = Self::human();
        ctx.env.insert(key.to_string(), value.to_string());
        ctx
    }
}

impl InvocationContext for FakeInvocation {
    fn stdin_is_terminal(&self) -> bool {
        self.terminal
    }

    fn stdout_is_terminal(&self) -> bool {
        self.terminal
    }

    fn parent_process_name(&self) -> Option<String> {
        self.parent.clone()
    }

    fn env_var(&self, key: &str) -> Option<String> {
        self.env.get(key).cloned()
    }
}
